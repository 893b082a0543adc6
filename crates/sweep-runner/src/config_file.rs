//! Format-preserving reader/writer for the solver's keyed numeric input files.
//!
//! Each line is either `<number> <spaces> !<key>` or anything else. Numeric
//! lines keep enough formatting metadata to be rendered back exactly as they
//! were read; every other line is carried through verbatim. All `!` markers
//! are re-aligned on save to the column found on the first line.

use crate::error::{Result, SweepError};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Number::Int(_))
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{}", v),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

/// How a number was spelled in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    Integer,
    Float {
        places: usize,
        exponent: bool,
        /// Token ended in a bare `.` (e.g. `5.`).
        bare_point: bool,
    },
}

impl NumberFormat {
    /// Renders `value` the way printf's `%d` / `%.Nf` / `%.Ne` would, minus
    /// any `+` in the exponent.
    pub fn render(&self, value: Number) -> String {
        match *self {
            NumberFormat::Integer => match value {
                Number::Int(v) => v.to_string(),
                Number::Float(v) => (v.trunc() as i64).to_string(),
            },
            NumberFormat::Float {
                places,
                exponent,
                bare_point,
            } => {
                let v = value.as_f64();
                if exponent {
                    let raw = format!("{:.*e}", places, v);
                    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
                    let exp: i32 = exp.parse().unwrap_or(0);
                    let sign = if exp < 0 { "-" } else { "" };
                    let point = if bare_point && places == 0 { "." } else { "" };
                    format!("{}{}e{}{:02}", mantissa, point, sign, exp.abs())
                } else {
                    let mut out = format!("{:.*}", places, v);
                    if bare_point && places == 0 {
                        out.push('.');
                    }
                    out
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericEntry {
    pub value: Number,
    pub key: String,
    pub format: NumberFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Entry(NumericEntry),
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    width: usize,
    lines: Vec<Line>,
    trailing_newline: bool,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SweepError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(SweepError::io(format!("reading {}", path.display()), e)),
        };
        Ok(Self::parse(path, &text))
    }

    pub fn parse(path: &Path, text: &str) -> Self {
        let mut raw_lines: Vec<&str> = text.split('\n').collect();
        let trailing_newline = text.ends_with('\n');
        if trailing_newline {
            raw_lines.pop();
        }
        if text.is_empty() {
            raw_lines.clear();
        }

        let width = raw_lines.first().and_then(|l| marker_offset(l)).unwrap_or(0);
        for (idx, line) in raw_lines.iter().enumerate() {
            if let Some(offset) = marker_offset(line) {
                if offset != width {
                    warn!(
                        "{} line {}: '!' at column {} instead of {}",
                        path.display(),
                        idx + 1,
                        offset,
                        width
                    );
                }
            }
        }

        let lines = raw_lines
            .into_iter()
            .map(|line| match parse_entry(line) {
                Some(entry) => Line::Entry(entry),
                None => Line::Raw(line.to_string()),
            })
            .collect();

        Self {
            path: path.to_path_buf(),
            width,
            lines,
            trailing_newline,
        }
    }

    /// Discards in-memory edits by re-reading the file from disk.
    pub fn reload(&mut self) -> Result<()> {
        *self = Self::load(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Index of the first entry keyed `key`.
    pub fn get_id(&self, key: &str) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| matches!(line, Line::Entry(e) if e.key == key))
    }

    pub fn get_value(&self, id: usize) -> Option<Number> {
        match self.lines.get(id) {
            Some(Line::Entry(e)) => Some(e.value),
            _ => None,
        }
    }

    /// Stores `value` coerced to the entry's existing numeric type.
    pub fn set_value(&mut self, id: usize, value: Number) -> Result<()> {
        match self.lines.get_mut(id) {
            Some(Line::Entry(entry)) => {
                entry.value = match entry.value {
                    Number::Int(_) => match value {
                        Number::Int(v) => Number::Int(v),
                        Number::Float(v) => Number::Int(v.trunc() as i64),
                    },
                    Number::Float(_) => Number::Float(value.as_f64()),
                };
                Ok(())
            }
            _ => {
                warn!(
                    "could not write {} to entry {} of {}",
                    value,
                    id,
                    self.path.display()
                );
                Err(SweepError::TypeMismatch {
                    file: self.path.clone(),
                    id,
                })
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            match line {
                Line::Entry(entry) => {
                    let number = entry.format.render(entry.value);
                    out.push_str(&format!(
                        "{:<width$}!{}",
                        number,
                        entry.key,
                        width = self.width
                    ));
                }
                Line::Raw(raw) => out.push_str(raw),
            }
        }
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .map_err(|e| SweepError::io(format!("writing {}", path.display()), e))
    }
}

fn marker_offset(line: &str) -> Option<usize> {
    line.chars().position(|c| c == '!')
}

fn parse_entry(line: &str) -> Option<NumericEntry> {
    let body = line.trim_start();
    let token_len = scan_number(body)?;
    let (token, rest) = body.split_at(token_len);
    let after_gap = rest.trim_start();
    if after_gap.len() == rest.len() {
        return None;
    }
    let key = after_gap.strip_prefix('!')?;
    if key.is_empty() {
        return None;
    }
    let (value, format) = classify(token)?;
    Some(NumericEntry {
        value,
        key: key.to_string(),
        format,
    })
}

/// Length of the numeric literal at the start of `s`:
/// `[+-]digits[.digits][(e|E)[+-]digits]` with at least one mantissa digit.
fn scan_number(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        pos += 1;
    }
    let int_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let mut digits = pos - int_start;
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        let frac_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        digits += pos - frac_start;
    }
    if digits == 0 {
        return None;
    }
    if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        let exp_digits = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > exp_digits {
            pos = exp;
        }
    }
    Some(pos)
}

fn classify(token: &str) -> Option<(Number, NumberFormat)> {
    match token.find('.') {
        Some(dot) => {
            let places = token[dot + 1..]
                .bytes()
                .take_while(|b| b.is_ascii_digit())
                .count();
            let exponent = token.contains(['e', 'E']);
            let value: f64 = token.parse().ok().filter(|v: &f64| v.is_finite())?;
            Some((
                Number::Float(value),
                NumberFormat::Float {
                    places,
                    exponent,
                    bare_point: places == 0,
                },
            ))
        }
        None => {
            let value: i64 = token.parse().ok()?;
            Some((Number::Int(value), NumberFormat::Integer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    fn aligned(number: &str, key: &str) -> String {
        format!("{:<14}!{}", number, key)
    }

    fn sample() -> String {
        [
            aligned("0.5000", "first key"),
            aligned("12", "count"),
            aligned("1.500e-03", "rate"),
            aligned("-4.25e12", "big"),
            "free text without a marker".to_string(),
            aligned("3.", "bare"),
            aligned("7", "count"),
        ]
        .join("\n")
            + "\n"
    }

    fn parsed(text: &str) -> ConfigFile {
        ConfigFile::parse(Path::new("itapeERC"), text)
    }

    #[test]
    fn unmodified_file_renders_byte_identical() {
        let text = sample();
        let file = parsed(&text);
        assert_eq!(file.width(), 14);
        assert_eq!(file.render(), text);
    }

    #[test]
    fn classifies_integer_and_float_tokens() {
        let file = parsed(&sample());
        assert_eq!(file.get_value(0), Some(Number::Float(0.5)));
        assert_eq!(file.get_value(1), Some(Number::Int(12)));
        assert_eq!(file.get_value(2), Some(Number::Float(1.5e-3)));
        assert_eq!(file.get_value(4), None);
        match &file.lines()[2] {
            Line::Entry(e) => assert_eq!(
                e.format,
                NumberFormat::Float {
                    places: 3,
                    exponent: true,
                    bare_point: false
                }
            ),
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn exponent_plus_sign_is_dropped_on_save() {
        let file = parsed(&format!("{}\n", aligned("2.5e+05", "k")));
        assert_eq!(file.render(), format!("{}\n", aligned("2.5e05", "k")));
    }

    #[test]
    fn misaligned_marker_is_normalized_to_first_line_column() {
        let text = format!("{}\n2.0   !loose\n", aligned("1.0", "a"));
        let file = parsed(&text);
        assert_eq!(
            file.render(),
            format!("{}\n{}\n", aligned("1.0", "a"), aligned("2.0", "loose"))
        );
    }

    #[test]
    fn get_id_returns_first_match_or_none() {
        let file = parsed(&sample());
        assert_eq!(file.get_id("count"), Some(1));
        assert_eq!(file.get_id("bare"), Some(5));
        assert_eq!(file.get_id("free text without a marker"), None);
        assert_eq!(file.get_id("absent"), None);
    }

    #[test]
    fn set_value_preserves_entry_type() {
        let mut file = parsed(&sample());
        file.set_value(1, Number::Float(2.7)).expect("int entry");
        assert_eq!(file.get_value(1), Some(Number::Int(2)));
        file.set_value(0, Number::Int(3)).expect("float entry");
        assert_eq!(file.get_value(0), Some(Number::Float(3.0)));
        let rendered = file.render();
        assert!(rendered.starts_with(&aligned("3.0000", "first key")));
        assert!(rendered.contains(&aligned("2", "count")));
    }

    #[test]
    fn set_value_on_raw_line_is_type_mismatch() {
        let mut file = parsed(&sample());
        let err = file.set_value(4, Number::Int(1)).expect_err("raw line");
        assert!(matches!(err, SweepError::TypeMismatch { id: 4, .. }));
        assert_eq!(file.lines()[4], Line::Raw("free text without a marker".into()));
        assert!(file.set_value(99, Number::Int(1)).is_err());
    }

    #[test]
    fn lines_without_whitespace_before_marker_stay_raw() {
        let file = parsed("1.0!tight\nabc 5 !x\n1e5 !no point\n");
        assert!(file.lines().iter().take(2).all(|l| matches!(l, Line::Raw(_))));
        // an exponent without a decimal point is not an integer
        assert!(matches!(file.lines()[2], Line::Raw(_)));
    }

    #[test]
    fn overflowing_float_stays_raw_and_round_trips() {
        let text = "1.0e999   !big\n2.5       !ok\n";
        let file = parsed(text);
        assert_eq!(file.lines()[0], Line::Raw("1.0e999   !big".into()));
        assert_eq!(file.get_id("big"), None);
        assert_eq!(file.render(), text);
    }

    #[test]
    fn exponent_formatting_pads_to_two_digits() {
        let fmt = NumberFormat::Float {
            places: 2,
            exponent: true,
            bare_point: false,
        };
        assert_eq!(fmt.render(Number::Float(1234.0)), "1.23e03");
        assert_eq!(fmt.render(Number::Float(0.000123)), "1.23e-04");
        assert_eq!(fmt.render(Number::Float(5.0e120)), "5.00e120");
    }

    #[test]
    fn load_missing_file_and_reload_discards_edits() {
        let dir = scratch_dir("config_file_reload");
        let missing = ConfigFile::load(&dir.join("nope")).expect_err("missing");
        assert!(matches!(missing, SweepError::FileNotFound(_)));

        let path = dir.join("itapeRs");
        fs::write(&path, sample()).expect("write sample");
        let mut file = ConfigFile::load(&path).expect("load");
        file.set_value(1, Number::Int(99)).expect("set");
        let copy = dir.join("copy");
        file.save(&copy).expect("save");
        assert!(fs::read_to_string(&copy).expect("read").contains(&aligned("99", "count")));

        file.reload().expect("reload");
        assert_eq!(file.get_value(1), Some(Number::Int(12)));
        let _ = fs::remove_dir_all(dir);
    }
}
