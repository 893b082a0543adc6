use crate::config::SweepConfig;
use crate::config_file::Number;
use crate::error::{Result, SweepError};
use crate::orchestrator::{BatchReport, Orchestrator, SolverCommand};
use crate::parameters::{AlleleRange, ParameterDescriptor, ParameterStore, ParameterVector};
use crate::results::{collect, fitness, read_reference_file, ComparisonPoint, RunResult};
use crate::workdir::WorkingDirectory;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub results: Vec<RunResult>,
    pub fitness: f64,
    pub report: BatchReport,
}

/// What an external optimizer needs from the engine: gene ranges and a score
/// per candidate.
pub trait Objective {
    fn allele_ranges(&self) -> Vec<AlleleRange>;
    fn fitness(&mut self, genome: &[f64]) -> Result<f64>;
}

/// Evaluation context built once per optimization and handed to every
/// evaluation by `&mut`.
pub struct SweepEngine {
    config: SweepConfig,
    points: Vec<ComparisonPoint>,
    params: ParameterStore,
    workdir: WorkingDirectory,
    orchestrator: Orchestrator,
}

impl SweepEngine {
    /// Validates the whole on-disk layout up front; nothing runs if any
    /// structural check fails.
    pub fn new(config: SweepConfig) -> Result<Self> {
        config.run.timeout()?;
        let workdir = WorkingDirectory::open(&config.working_dir)?;
        if !config.log_dir.is_dir() {
            return Err(SweepError::DirectoryState {
                path: config.log_dir.clone(),
                reason: "does not exist".to_string(),
            });
        }

        let executable = config.solver.executable_path();
        let mut required: Vec<PathBuf> = vec![config.reference_file.clone(), executable.clone()];
        required.extend(config.solver.input_files.iter().map(|f| config.solver.dir.join(f)));
        let missing: Vec<PathBuf> = required.into_iter().filter(|p| !p.is_file()).collect();
        for path in &missing {
            error!("'{}' not found", path.display());
        }
        if let Some(first) = missing.into_iter().next() {
            return Err(SweepError::FileNotFound(first));
        }

        let points = read_reference_file(&config.reference_file)?;
        if points.is_empty() {
            return Err(SweepError::EmptyReference(config.reference_file.clone()));
        }
        debug!("{} comparison points", points.len());

        let mut params = ParameterStore::new(
            config.solver.dir.clone(),
            config.solver.input_files.clone(),
            config.solver.editable_files.clone(),
            config.parameters.clone(),
        );
        params.load_parameters()?;

        let program = executable
            .canonicalize()
            .map_err(|e| SweepError::io(format!("resolving {}", executable.display()), e))?;
        let orchestrator = Orchestrator::new(
            SolverCommand {
                program,
                args: config.solver.args.clone(),
            },
            config.solver.output_file.clone(),
            config.log_dir.clone(),
        )?;

        Ok(Self {
            config,
            points,
            params,
            workdir,
            orchestrator,
        })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn points(&self) -> &[ComparisonPoint] {
        &self.points
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        self.params.descriptors()
    }

    pub fn parameters(&self) -> &ParameterVector {
        self.params.parameters()
    }

    pub fn coerce_genome(&self, genome: &[f64]) -> Vec<Number> {
        self.params.coerce_genome(genome)
    }

    /// Throws away the current vector and re-reads the defaults from disk.
    pub fn reset_parameters(&mut self) -> Result<()> {
        self.params.load_parameters()
    }

    /// Scores `parameters`. A vector that fails validation is rejected
    /// before anything touches the working directory.
    pub fn evaluate(&mut self, parameters: &[Number]) -> Result<Evaluation> {
        debug!("testing parameters: {:?}", parameters);
        self.params.set_parameters(parameters)?;
        self.run_batch()
    }

    /// Scores the vector currently held, typically the defaults read from
    /// the solver files.
    pub fn evaluate_current(&mut self) -> Result<Evaluation> {
        let current: Option<Vec<Number>> = self.params.parameters().iter().copied().collect();
        match current {
            Some(values) => self.evaluate(&values),
            None => {
                let idx = self
                    .params
                    .parameters()
                    .iter()
                    .position(Option::is_none)
                    .unwrap_or(0);
                let d = &self.params.descriptors()[idx];
                Err(SweepError::MissingParameter {
                    file: d.file.clone(),
                    key: d.key.clone(),
                })
            }
        }
    }

    fn run_batch(&mut self) -> Result<Evaluation> {
        let timeout = self.config.run.timeout()?;
        self.params.apply()?;
        let layout = &self.config.solver;
        let files = self.params.files();
        let points = &self.points;
        let workdir = &self.workdir;

        let mut slots = workdir.setup(layout, files, points)?;
        let report = self.orchestrator.run(
            &mut slots,
            timeout,
            self.config.run.attempts(),
            |slot| {
                let point = points.get(slot.index).ok_or_else(|| {
                    SweepError::Config(format!("no comparison point for run {}", slot.index))
                })?;
                workdir.rematerialize(slot.index, layout, files, point)
            },
        )?;

        let results = collect(points, &slots, self.orchestrator.output_file());
        let score = fitness(&results);
        info!(
            "fitness {} ({} of {} runs succeeded)",
            score,
            report.succeeded.len(),
            slots.len()
        );
        Ok(Evaluation {
            results,
            fitness: score,
            report,
        })
    }
}

impl Objective for SweepEngine {
    fn allele_ranges(&self) -> Vec<AlleleRange> {
        self.params.allele_ranges()
    }

    fn fitness(&mut self, genome: &[f64]) -> Result<f64> {
        let parameters = self.params.coerce_genome(genome);
        Ok(self.evaluate(&parameters)?.fitness)
    }
}
