use crate::config_file::{ConfigFile, Number};
use crate::error::{Result, SweepError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error};

/// One tunable value: which solver file, which `!` key, and its allowed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub file: String,
    pub key: String,
    pub min: f64,
    pub max: f64,
}

/// Range an optimizer may draw a gene from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlleleRange {
    pub min: f64,
    pub max: f64,
    pub integer: bool,
}

pub type ParameterVector = Vec<Option<Number>>;

pub struct ParameterStore {
    solver_dir: PathBuf,
    input_files: Vec<String>,
    editable_files: Vec<String>,
    descriptors: Vec<ParameterDescriptor>,
    files: BTreeMap<String, ConfigFile>,
    values: ParameterVector,
}

impl ParameterStore {
    pub fn new(
        solver_dir: PathBuf,
        input_files: Vec<String>,
        editable_files: Vec<String>,
        descriptors: Vec<ParameterDescriptor>,
    ) -> Self {
        debug!("parameter descriptors: {:?}", descriptors);
        Self {
            solver_dir,
            input_files,
            editable_files,
            descriptors,
            files: BTreeMap::new(),
            values: Vec::new(),
        }
    }

    /// Rebuilds the parameter vector from the pristine files on disk.
    ///
    /// A key that cannot be found, or a value outside its bounds, leaves a
    /// `None` in its slot so positions keep lining up with the descriptors.
    pub fn load_parameters(&mut self) -> Result<()> {
        for file in self.files.values_mut() {
            file.reload()?;
        }
        let mut values = Vec::with_capacity(self.descriptors.len());
        for idx in 0..self.descriptors.len() {
            let descriptor = self.descriptors[idx].clone();
            let file = self.open_file(&descriptor.file)?;
            let value = match file.get_id(&descriptor.key) {
                Some(id) => file.get_value(id),
                None => {
                    let err = SweepError::MissingParameter {
                        file: descriptor.file.clone(),
                        key: descriptor.key.clone(),
                    };
                    error!("{}", err);
                    None
                }
            };
            values.push(value.and_then(|v| check_parameter(v, &descriptor)));
        }
        self.values = values;
        Ok(())
    }

    fn open_file(&mut self, name: &str) -> Result<&ConfigFile> {
        if !self.files.contains_key(name) {
            if !self.input_files.iter().any(|f| f == name)
                || !self.editable_files.iter().any(|f| f == name)
            {
                let err = SweepError::UnsupportedFile {
                    file: name.to_string(),
                    allowed: self.editable_files.clone(),
                };
                error!("{}", err);
                return Err(err);
            }
            let file = ConfigFile::load(&self.solver_dir.join(name))?;
            self.files.insert(name.to_string(), file);
        }
        self.files
            .get(name)
            .ok_or_else(|| SweepError::Config(format!("parameter file '{}' not loaded", name)))
    }

    /// Replaces the stored vector, all or nothing.
    pub fn set_parameters(&mut self, parameters: &[Number]) -> Result<()> {
        if parameters.len() != self.descriptors.len() {
            let err = SweepError::ParameterCount {
                expected: self.descriptors.len(),
                actual: parameters.len(),
            };
            error!("{}", err);
            return Err(err);
        }
        for (index, (value, descriptor)) in parameters.iter().zip(&self.descriptors).enumerate() {
            if check_parameter(*value, descriptor).is_none() {
                return Err(SweepError::ParameterOutOfRange {
                    index,
                    value: value.as_f64(),
                    min: descriptor.min,
                    max: descriptor.max,
                });
            }
        }
        self.values = parameters.iter().copied().map(Some).collect();
        Ok(())
    }

    /// Writes the stored vector into the loaded files. Empty slots keep the
    /// file's current value.
    pub fn apply(&mut self) -> Result<()> {
        for (descriptor, value) in self.descriptors.iter().zip(&self.values) {
            let Some(value) = value else { continue };
            let Some(file) = self.files.get_mut(&descriptor.file) else {
                continue;
            };
            match file.get_id(&descriptor.key) {
                Some(id) => file.set_value(id, *value)?,
                None => debug!(
                    "skipping '{}' in '{}': key not present",
                    descriptor.key, descriptor.file
                ),
            }
        }
        Ok(())
    }

    pub fn parameters(&self) -> &ParameterVector {
        &self.values
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    pub fn files(&self) -> &BTreeMap<String, ConfigFile> {
        &self.files
    }

    pub fn allele_ranges(&self) -> Vec<AlleleRange> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(idx, d)| AlleleRange {
                min: d.min,
                max: d.max,
                integer: self.slot_is_integer(idx),
            })
            .collect()
    }

    /// Converts raw genes to numbers typed like the loaded slot values.
    pub fn coerce_genome(&self, genome: &[f64]) -> Vec<Number> {
        genome
            .iter()
            .enumerate()
            .map(|(idx, gene)| {
                if self.slot_is_integer(idx) {
                    Number::Int(gene.round() as i64)
                } else {
                    Number::Float(*gene)
                }
            })
            .collect()
    }

    fn slot_is_integer(&self, idx: usize) -> bool {
        if let Some(Some(value)) = self.values.get(idx) {
            return value.is_integer();
        }
        let Some(d) = self.descriptors.get(idx) else {
            return false;
        };
        let loaded = self
            .files
            .get(&d.file)
            .and_then(|f| f.get_id(&d.key).and_then(|id| f.get_value(id)));
        match loaded {
            Some(value) => value.is_integer(),
            None => d.min.fract() == 0.0 && d.max.fract() == 0.0,
        }
    }
}

/// Inclusive range check; `None` when the value falls outside `[min, max]`.
pub fn check_parameter(value: Number, descriptor: &ParameterDescriptor) -> Option<Number> {
    let v = value.as_f64();
    if v.is_nan() {
        error!("NaN is not a valid value for '{}'", descriptor.key);
        return None;
    }
    if v < descriptor.min {
        error!("{} < {} (min) for '{}'", value, descriptor.min, descriptor.key);
        return None;
    }
    if v > descriptor.max {
        error!("{} > {} (max) for '{}'", value, descriptor.max, descriptor.key);
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;
    use std::fs;
    use std::path::Path;

    fn descriptor(file: &str, key: &str, min: f64, max: f64) -> ParameterDescriptor {
        ParameterDescriptor {
            file: file.to_string(),
            key: key.to_string(),
            min,
            max,
        }
    }

    fn solver_fixture(name: &str) -> PathBuf {
        let dir = scratch_dir(name);
        fs::write(
            dir.join("itapeERC"),
            format!(
                "{:<12}!activation\n{:<12}!steps\n{:<12}!too big\n",
                "1.250", "40", "9.0"
            ),
        )
        .expect("write itapeERC");
        fs::write(dir.join("itapeRs"), format!("{:<10}!scale\n", "2.0e-01")).expect("write itapeRs");
        fs::write(dir.join("itape5"), "plain\n").expect("write itape5");
        dir
    }

    fn store(dir: &Path, descriptors: Vec<ParameterDescriptor>) -> ParameterStore {
        ParameterStore::new(
            dir.to_path_buf(),
            vec!["itape5".into(), "itapeERC".into(), "itapeRs".into()],
            vec!["itapeERC".into(), "itapeRs".into()],
            descriptors,
        )
    }

    #[test]
    fn check_parameter_includes_both_bounds() {
        let d = descriptor("itapeERC", "k", 1.0, 2.0);
        assert_eq!(check_parameter(Number::Float(1.0), &d), Some(Number::Float(1.0)));
        assert_eq!(check_parameter(Number::Float(2.0), &d), Some(Number::Float(2.0)));
        assert_eq!(check_parameter(Number::Int(1), &d), Some(Number::Int(1)));
        assert_eq!(check_parameter(Number::Float(0.999), &d), None);
        assert_eq!(check_parameter(Number::Float(2.001), &d), None);
        assert_eq!(check_parameter(Number::Float(f64::NAN), &d), None);
    }

    #[test]
    fn load_keeps_positions_for_missing_and_out_of_range_values() {
        let dir = solver_fixture("parameters_load");
        let mut store = store(
            &dir,
            vec![
                descriptor("itapeERC", "activation", 0.0, 5.0),
                descriptor("itapeERC", "absent", 0.0, 5.0),
                descriptor("itapeERC", "too big", 0.0, 5.0),
                descriptor("itapeRs", "scale", 0.0, 1.0),
                descriptor("itapeERC", "steps", 1.0, 100.0),
            ],
        );
        store.load_parameters().expect("load");
        assert_eq!(
            store.parameters(),
            &vec![
                Some(Number::Float(1.25)),
                None,
                None,
                Some(Number::Float(0.2)),
                Some(Number::Int(40)),
            ]
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn descriptors_outside_editable_files_are_rejected() {
        let dir = solver_fixture("parameters_unsupported");
        let mut s = store(&dir, vec![descriptor("itape5", "anything", 0.0, 1.0)]);
        assert!(matches!(
            s.load_parameters(),
            Err(SweepError::UnsupportedFile { .. })
        ));
        let mut s = store(&dir, vec![descriptor("itape99", "anything", 0.0, 1.0)]);
        assert!(matches!(
            s.load_parameters(),
            Err(SweepError::UnsupportedFile { .. })
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn set_parameters_is_atomic() {
        let dir = solver_fixture("parameters_atomic");
        let mut store = store(
            &dir,
            vec![
                descriptor("itapeERC", "activation", 0.0, 5.0),
                descriptor("itapeERC", "steps", 1.0, 100.0),
            ],
        );
        store.load_parameters().expect("load");
        let before = store.parameters().clone();

        let err = store
            .set_parameters(&[Number::Float(4.0), Number::Int(500)])
            .expect_err("out of range");
        assert!(matches!(err, SweepError::ParameterOutOfRange { index: 1, .. }));
        assert_eq!(store.parameters(), &before);

        let err = store.set_parameters(&[Number::Float(4.0)]).expect_err("short");
        assert!(matches!(err, SweepError::ParameterCount { expected: 2, actual: 1 }));
        assert_eq!(store.parameters(), &before);

        store
            .set_parameters(&[Number::Float(4.0), Number::Int(60)])
            .expect("valid");
        assert_eq!(
            store.parameters(),
            &vec![Some(Number::Float(4.0)), Some(Number::Int(60))]
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn apply_writes_values_and_reload_restores_baseline() {
        let dir = solver_fixture("parameters_apply");
        let mut store = store(
            &dir,
            vec![
                descriptor("itapeERC", "activation", 0.0, 5.0),
                descriptor("itapeERC", "steps", 1.0, 100.0),
            ],
        );
        store.load_parameters().expect("load");
        store
            .set_parameters(&[Number::Float(3.5), Number::Float(61.9)])
            .expect("valid");
        store.apply().expect("apply");
        let erc = &store.files()["itapeERC"];
        assert!(erc.render().starts_with(&format!("{:<12}!activation\n{:<12}!steps", "3.500", "61")));

        store.load_parameters().expect("reload");
        let erc = &store.files()["itapeERC"];
        assert_eq!(erc.get_value(0), Some(Number::Float(1.25)));
        assert_eq!(erc.get_value(1), Some(Number::Int(40)));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn allele_ranges_follow_loaded_types() {
        let dir = solver_fixture("parameters_alleles");
        let mut store = store(
            &dir,
            vec![
                descriptor("itapeERC", "activation", 0.0, 5.0),
                descriptor("itapeERC", "steps", 1.0, 100.0),
            ],
        );
        store.load_parameters().expect("load");
        let ranges = store.allele_ranges();
        assert!(!ranges[0].integer);
        assert!(ranges[1].integer);
        assert_eq!(
            store.coerce_genome(&[2.5, 41.6]),
            vec![Number::Float(2.5), Number::Int(42)]
        );
        let _ = fs::remove_dir_all(dir);
    }
}
