use crate::error::{Result, SweepError};
use crate::parameters::ParameterDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub reference_file: PathBuf,
    pub solver: SolverLayout,
    pub run: RunPolicy,
    pub parameters: Vec<ParameterDescriptor>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("../work"),
            log_dir: PathBuf::from("../log"),
            reference_file: PathBuf::from("../ext/Detalierte Mechanismus.csv"),
            solver: SolverLayout::default(),
            run: RunPolicy::default(),
            parameters: Vec::new(),
        }
    }
}

/// Where the solver lives and which of its inputs the engine touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverLayout {
    pub dir: PathBuf,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub input_files: Vec<String>,
    pub editable_files: Vec<String>,
    pub output_file: String,
    pub temperature_patch: TemperaturePatch,
}

impl Default for SolverLayout {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("../ext"),
            executable: PathBuf::from("kiva_0D"),
            args: Vec::new(),
            input_files: ["itape17", "itape5", "itapeERC", "itapeRs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            editable_files: vec!["itapeERC".to_string(), "itapeRs".to_string()],
            output_file: "T_ign.dat".to_string(),
            temperature_patch: TemperaturePatch::default(),
        }
    }
}

impl SolverLayout {
    pub fn executable_path(&self) -> PathBuf {
        self.dir.join(&self.executable)
    }
}

/// Line-indexed rewrite of the initial temperature inside a solver input
/// file whose layout is not otherwise modelled.
///
/// The defaults describe revision 1 of the `itape5` layout: line 230 holds
/// `'tempi',` followed by the temperature with one decimal place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperaturePatch {
    pub file: String,
    /// 1-based.
    pub line: usize,
    pub prefix: String,
}

impl Default for TemperaturePatch {
    fn default() -> Self {
        Self {
            file: "itape5".to_string(),
            line: 230,
            prefix: "'tempi',     ".to_string(),
        }
    }
}

impl TemperaturePatch {
    pub fn render(&self, temperature: f64) -> String {
        format!("{}{:.1}\n", self.prefix, temperature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    pub timeout_seconds: f64,
    pub max_attempts: u32,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            timeout_seconds: 120.0,
            max_attempts: 1,
        }
    }
}

impl RunPolicy {
    /// Fails for negative, NaN, or unrepresentably large values.
    pub fn timeout(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.timeout_seconds).map_err(|e| {
            SweepError::Config(format!("timeout_seconds {}: {}", self.timeout_seconds, e))
        })
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl SweepConfig {
    /// Reads a YAML config; relative paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SweepError::FileNotFound(path.to_path_buf()),
            _ => SweepError::io(format!("reading {}", path.display()), e),
        })?;
        let config: SweepConfig = serde_yaml::from_str(&raw)
            .map_err(|e| SweepError::Config(format!("{}: {}", path.display(), e)))?;
        config.run.timeout()?;
        let base = path.parent().unwrap_or(Path::new("."));
        Ok(config.resolved_against(base))
    }

    pub fn resolved_against(mut self, base: &Path) -> Self {
        self.working_dir = base.join(&self.working_dir);
        self.log_dir = base.join(&self.log_dir);
        self.reference_file = base.join(&self.reference_file);
        self.solver.dir = base.join(&self.solver.dir);
        self
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| SweepError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn defaults_describe_the_stock_solver_layout() {
        let config = SweepConfig::default();
        assert_eq!(config.solver.input_files.len(), 4);
        assert_eq!(config.solver.output_file, "T_ign.dat");
        assert_eq!(config.run.timeout().expect("timeout"), Duration::from_secs(120));
        assert_eq!(
            config.solver.temperature_patch.render(1000.0),
            "'tempi',     1000.0\n"
        );
    }

    #[test]
    fn load_fills_defaults_and_resolves_relative_paths() {
        let dir = scratch_dir("config_load");
        let path = dir.join("sweep.yaml");
        fs::write(
            &path,
            "working_dir: work\nsolver:\n  dir: /opt/solver\nrun:\n  max_attempts: 3\nparameters:\n  - { file: itapeERC, key: rate, min: 0.5, max: 2 }\n",
        )
        .expect("write config");
        let config = SweepConfig::load(&path).expect("load");
        assert_eq!(config.working_dir, dir.join("work"));
        assert_eq!(config.solver.dir, PathBuf::from("/opt/solver"));
        assert_eq!(config.solver.executable_path(), PathBuf::from("/opt/solver/kiva_0D"));
        assert_eq!(config.run.attempts(), 3);
        assert_eq!(config.run.timeout_seconds, 120.0);
        assert_eq!(config.parameters[0].max, 2.0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let dir = scratch_dir("config_bad");
        let path = dir.join("sweep.yaml");
        fs::write(&path, "run: [not, a, map]\n").expect("write config");
        assert!(matches!(SweepConfig::load(&path), Err(SweepError::Config(_))));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn generated_default_config_loads_back() {
        let dir = scratch_dir("config_generated");
        let path = dir.join("sweep.yaml");
        fs::write(&path, SweepConfig::default().to_yaml().expect("yaml")).expect("write config");
        let loaded = SweepConfig::load(&path).expect("load");
        assert_eq!(loaded, SweepConfig::default().resolved_against(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unrepresentable_timeouts_are_config_errors() {
        for seconds in [f64::INFINITY, f64::NAN, 1e20, -1.0] {
            let policy = RunPolicy {
                timeout_seconds: seconds,
                max_attempts: 1,
            };
            assert!(
                matches!(policy.timeout(), Err(SweepError::Config(_))),
                "timeout_seconds {}",
                seconds
            );
        }

        let dir = scratch_dir("config_inf_timeout");
        let path = dir.join("sweep.yaml");
        fs::write(&path, "run:\n  timeout_seconds: .inf\n").expect("write config");
        assert!(matches!(SweepConfig::load(&path), Err(SweepError::Config(_))));
        let _ = fs::remove_dir_all(dir);
    }
}
