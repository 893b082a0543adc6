//! Parameter-sweep execution engine for an external ignition-delay solver.
//!
//! A [`SweepEngine`] takes one candidate parameter vector, writes it into the
//! solver's keyed input files, runs the solver once per reference
//! temperature in isolated directories, and reduces the outputs to a single
//! fitness value for an outer optimizer.

pub mod config;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod parameters;
pub mod results;
pub mod workdir;

pub use config::{RunPolicy, SolverLayout, SweepConfig, TemperaturePatch};
pub use config_file::{ConfigFile, Line, Number, NumberFormat, NumericEntry};
pub use engine::{Evaluation, Objective, SweepEngine};
pub use error::{Result, SweepError};
pub use orchestrator::{BatchReport, Orchestrator, RunInstance, SlotState, SolverCommand};
pub use parameters::{check_parameter, AlleleRange, ParameterDescriptor, ParameterStore, ParameterVector};
pub use results::{
    collect, fitness, parse_reference, read_output, read_reference_file, ComparisonPoint,
    RunResult, FITNESS_CAP,
};
pub use workdir::{patch_line, WorkingDirectory, MARKER_FILE};
