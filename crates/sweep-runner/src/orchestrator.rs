//! Launches one solver process per run directory and supervises the batch.
//!
//! All processes of an attempt share one deadline. Completions are awaited
//! in whatever order they happen; when the deadline passes every process
//! still alive is killed. Slots that timed out or crashed are rebuilt and
//! relaunched until they run out of attempts, then their artifacts are moved
//! into a timestamped quarantine directory under the log root.

use crate::error::{IoContext, Result, SweepError};
use crate::results::read_output;
use crate::workdir::move_path;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Pending,
    Running,
    Succeeded,
    TimedOut,
    Crashed,
    /// Out of attempts.
    Failed,
}

#[derive(Debug, Clone)]
pub struct RunInstance {
    pub index: usize,
    pub directory: PathBuf,
    pub log_path: PathBuf,
    pub error_path: PathBuf,
    pub attempts: u32,
    pub state: SlotState,
    pub quarantine: Option<PathBuf>,
}

impl RunInstance {
    pub fn new(index: usize, directory: PathBuf, log_path: PathBuf, error_path: PathBuf) -> Self {
        Self {
            index,
            directory,
            log_path,
            error_path,
            attempts: 0,
            state: SlotState::Pending,
            quarantine: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<usize>,
    pub failed: Vec<usize>,
    pub quarantine_dir: Option<PathBuf>,
}

#[derive(Debug)]
enum Outcome {
    Exited,
    TimedOut,
    Crashed(String),
}

struct Launch {
    pos: usize,
    index: usize,
    directory: PathBuf,
    log_path: PathBuf,
    error_path: PathBuf,
}

/// Must not be driven from inside another tokio runtime: it blocks the
/// calling thread on its own current-thread runtime.
pub struct Orchestrator {
    command: SolverCommand,
    output_file: String,
    log_dir: PathBuf,
    runtime: tokio::runtime::Runtime,
}

impl Orchestrator {
    pub fn new(command: SolverCommand, output_file: String, log_dir: PathBuf) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .io_context(|| "starting process supervisor".to_string())?;
        Ok(Self {
            command,
            output_file,
            log_dir,
            runtime,
        })
    }

    pub fn output_file(&self) -> &str {
        &self.output_file
    }

    /// Runs every slot to a terminal state.
    ///
    /// `rematerialize` rebuilds a slot's run directory before a retry; an
    /// error from it aborts the batch.
    pub fn run<F>(
        &self,
        slots: &mut [RunInstance],
        timeout: Duration,
        max_attempts: u32,
        mut rematerialize: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&RunInstance) -> Result<()>,
    {
        let max_attempts = max_attempts.max(1);
        for slot in slots.iter_mut() {
            slot.attempts = 0;
            slot.state = SlotState::Pending;
            slot.quarantine = None;
        }

        loop {
            let pending: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state == SlotState::Pending)
                .map(|(pos, _)| pos)
                .collect();
            if pending.is_empty() {
                break;
            }
            self.run_attempt(slots, &pending, timeout)?;

            for pos in pending {
                let slot = &mut slots[pos];
                match slot.state {
                    SlotState::Succeeded => {}
                    SlotState::TimedOut | SlotState::Crashed if slot.attempts < max_attempts => {
                        warn!(
                            "retrying run {} (attempt {} of {})",
                            slot.index,
                            slot.attempts + 1,
                            max_attempts
                        );
                        rematerialize(&*slot)?;
                        slot.state = SlotState::Pending;
                    }
                    _ => slot.state = SlotState::Failed,
                }
            }
        }

        let mut report = BatchReport::default();
        let mut failed_positions = Vec::new();
        for (pos, slot) in slots.iter().enumerate() {
            if slot.state == SlotState::Succeeded {
                report.succeeded.push(slot.index);
            } else {
                report.failed.push(slot.index);
                failed_positions.push(pos);
            }
        }
        report.quarantine_dir = self.quarantine(slots, &failed_positions)?;
        Ok(report)
    }

    fn run_attempt(
        &self,
        slots: &mut [RunInstance],
        pending: &[usize],
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            SweepError::Config(format!("timeout {:?} is out of range", timeout))
        })?;
        let launches: Vec<Launch> = pending
            .iter()
            .map(|&pos| {
                let slot = &mut slots[pos];
                slot.attempts += 1;
                slot.state = SlotState::Running;
                Launch {
                    pos,
                    index: slot.index,
                    directory: slot.directory.clone(),
                    log_path: slot.log_path.clone(),
                    error_path: slot.error_path.clone(),
                }
            })
            .collect();

        let outcomes = self.runtime.block_on(self.supervise(launches, deadline, timeout));

        for (pos, outcome) in outcomes {
            let slot = &mut slots[pos];
            slot.state = match outcome {
                Outcome::Exited => match read_output(&slot.directory.join(&self.output_file)) {
                    Ok(_) => SlotState::Succeeded,
                    Err(err) => {
                        error!("run {}: {}", slot.index, err);
                        SlotState::Crashed
                    }
                },
                Outcome::TimedOut => SlotState::TimedOut,
                Outcome::Crashed(detail) => {
                    error!("run {} crashed: {}", slot.index, detail);
                    SlotState::Crashed
                }
            };
        }
        for &pos in pending {
            if slots[pos].state == SlotState::Running {
                slots[pos].state = SlotState::Crashed;
            }
        }
        Ok(())
    }

    async fn supervise(
        &self,
        launches: Vec<Launch>,
        deadline: Instant,
        timeout: Duration,
    ) -> Vec<(usize, Outcome)> {
        let mut outcomes = Vec::with_capacity(launches.len());
        let mut running = JoinSet::new();
        for launch in launches {
            match self.spawn(&launch) {
                Ok(child) => {
                    debug!("solver in '{}' spawned", launch.directory.display());
                    running.spawn(wait_for_exit(launch, child, deadline, timeout));
                }
                Err(err) => outcomes.push((launch.pos, Outcome::Crashed(err.to_string()))),
            }
        }
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!("supervisor task failed: {}", err),
            }
        }
        outcomes
    }

    fn spawn(&self, launch: &Launch) -> Result<Child> {
        let log = fs::File::create(&launch.log_path)
            .io_context(|| format!("creating {}", launch.log_path.display()))?;
        let err = fs::File::create(&launch.error_path)
            .io_context(|| format!("creating {}", launch.error_path.display()))?;
        Command::new(&self.command.program)
            .args(&self.command.args)
            .current_dir(&launch.directory)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(err)
            .kill_on_drop(true)
            .spawn()
            .io_context(|| format!("spawning {}", self.command.program.display()))
    }

    fn quarantine(&self, slots: &mut [RunInstance], failed: &[usize]) -> Result<Option<PathBuf>> {
        if failed.is_empty() {
            return Ok(None);
        }
        let dir = self.create_quarantine_dir()?;
        for &pos in failed {
            let slot = &mut slots[pos];
            for src in [&slot.directory, &slot.log_path, &slot.error_path] {
                if src.exists() {
                    let name = src.file_name().unwrap_or(src.as_os_str());
                    move_path(src, &dir.join(name))?;
                }
            }
            error!(
                "run {} failed after {} attempt(s); artifacts in '{}'",
                slot.index,
                slot.attempts,
                dir.display()
            );
            slot.quarantine = Some(dir.clone());
        }
        Ok(Some(dir))
    }

    fn create_quarantine_dir(&self) -> Result<PathBuf> {
        let stamp = Utc::now().timestamp();
        let mut candidate = self.log_dir.join(stamp.to_string());
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self.log_dir.join(format!("{}-{}", stamp, suffix));
            suffix += 1;
        }
        fs::create_dir_all(&candidate).io_context(|| format!("creating {}", candidate.display()))?;
        Ok(candidate)
    }
}

async fn wait_for_exit(
    launch: Launch,
    mut child: Child,
    deadline: Instant,
    timeout: Duration,
) -> (usize, Outcome) {
    let outcome = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            debug!("solver in '{}' terminated", launch.directory.display());
            Outcome::Exited
        }
        Ok(Ok(status)) => Outcome::Crashed(format!("exit status {}", status)),
        Ok(Err(err)) => Outcome::Crashed(format!("wait failed: {}", err)),
        Err(_) => {
            warn!(
                "{}",
                SweepError::ProcessTimeout {
                    index: launch.index,
                    timeout
                }
            );
            if let Err(err) = child.kill().await {
                warn!("could not kill solver in '{}': {}", launch.directory.display(), err);
            } else {
                warn!("solver in '{}' killed", launch.directory.display());
            }
            Outcome::TimedOut
        }
    };
    (launch.pos, outcome)
}

pub(crate) fn run_paths(root: &Path, index: usize) -> (PathBuf, PathBuf, PathBuf) {
    (
        root.join(format!("run{}", index)),
        root.join(format!("run{}.log", index)),
        root.join(format!("run{}.error", index)),
    )
}
