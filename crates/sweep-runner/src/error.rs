use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepError>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("file_not_found: '{}' not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("directory_state: '{}' {reason}", .path.display())]
    DirectoryState { path: PathBuf, reason: String },

    #[error("missing_template_file: '{}' {detail}", .path.display())]
    MissingTemplateFile { path: PathBuf, detail: String },

    #[error("unsupported_file: cannot read '{file}' as a parameter file (editable: {allowed:?})")]
    UnsupportedFile { file: String, allowed: Vec<String> },

    #[error("missing_parameter: could not find '{key}' in '{file}'")]
    MissingParameter { file: String, key: String },

    #[error("parameter_out_of_range: slot {index} value {value} outside [{min}, {max}]")]
    ParameterOutOfRange {
        index: usize,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("parameter_count: expected {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    #[error("type_mismatch: entry {id} in '{}' cannot hold a number", .file.display())]
    TypeMismatch { file: PathBuf, id: usize },

    #[error("process_timeout: run {index} exceeded {timeout:?}")]
    ProcessTimeout { index: usize, timeout: Duration },

    #[error("process_crash: '{}' {detail}", .path.display())]
    ProcessCrash { path: PathBuf, detail: String },

    #[error("reference_row_parse: line {line}: {detail}")]
    ReferenceRowParse { line: usize, detail: String },

    #[error("empty_reference: '{}' contains no usable comparison rows", .0.display())]
    EmptyReference(PathBuf),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SweepError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SweepError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attaches a path-flavoured context to raw `std::io` results.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| SweepError::io(context(), e))
    }
}
