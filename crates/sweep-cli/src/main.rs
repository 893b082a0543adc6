use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use sweep_runner::{Evaluation, SweepConfig, SweepEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version, about = "Solver parameter-sweep runner")]
struct Cli {
    /// Log per-run progress.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Describe {
        #[arg(long, default_value = "sweep.yaml")]
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Evaluate {
        #[arg(long, default_value = "sweep.yaml")]
        config: PathBuf,
        #[arg(long = "set")]
        set_values: Vec<String>,
        #[arg(long)]
        timeout_seconds: Option<f64>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    InitConfig {
        #[arg(long, default_value = "sweep.yaml")]
        config: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    enable_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn enable_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Describe { config, json } => {
            let engine = SweepEngine::new(SweepConfig::load(&config)?)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": describe_to_json(&engine),
                })));
            }
            print_description(&engine);
        }
        Commands::Evaluate {
            config,
            set_values,
            timeout_seconds,
            max_attempts,
            json,
        } => {
            let mut cfg = SweepConfig::load(&config)?;
            if let Some(t) = timeout_seconds {
                cfg.run.timeout_seconds = t;
            }
            if let Some(n) = max_attempts {
                cfg.run.max_attempts = n;
            }
            let mut engine = SweepEngine::new(cfg)?;
            let overrides = parse_set_bindings(&set_values)?;
            let genome = build_genome(&engine, &overrides)?;
            let parameters = engine.coerce_genome(&genome);
            let evaluation = engine.evaluate(&parameters)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "evaluate",
                    "parameters": parameters.iter().map(|p| p.as_f64()).collect::<Vec<_>>(),
                    "evaluation": serde_json::to_value(&evaluation)?,
                })));
            }
            print_evaluation(&evaluation);
        }
        Commands::InitConfig { config, force } => {
            write_default_config(&config, force)?;
            println!("config: {}", config.display());
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Describe { json, .. } | Commands::Evaluate { json, .. } => *json,
        Commands::InitConfig { .. } => false,
    }
}

fn parse_set_bindings(values: &[String]) -> Result<BTreeMap<String, f64>> {
    let mut out = BTreeMap::new();
    for raw in values {
        let (key, val_raw) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --set '{}': expected key=value", raw))?;
        if key.trim().is_empty() {
            return Err(anyhow!("invalid --set '{}': key cannot be empty", raw));
        }
        let value: f64 = val_raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid --set '{}': value is not a number", raw))?;
        out.insert(key.to_string(), value);
    }
    Ok(out)
}

/// Current parameter vector with `--set` overrides applied, keyed by the
/// descriptor key.
fn build_genome(engine: &SweepEngine, overrides: &BTreeMap<String, f64>) -> Result<Vec<f64>> {
    let descriptors = engine.descriptors();
    for key in overrides.keys() {
        if !descriptors.iter().any(|d| &d.key == key) {
            return Err(anyhow!("--set references unknown parameter '{}'", key));
        }
    }
    descriptors
        .iter()
        .zip(engine.parameters())
        .map(|(d, current)| match (overrides.get(&d.key), current) {
            (Some(v), _) => Ok(*v),
            (None, Some(v)) => Ok(v.as_f64()),
            (None, None) => Err(anyhow!(
                "parameter '{}' in '{}' has no valid default; pass --set",
                d.key,
                d.file
            )),
        })
        .collect()
}

fn describe_to_json(engine: &SweepEngine) -> Value {
    let config = engine.config();
    json!({
        "working_dir": config.working_dir.display().to_string(),
        "log_dir": config.log_dir.display().to_string(),
        "reference_file": config.reference_file.display().to_string(),
        "solver": config.solver.executable_path().display().to_string(),
        "timeout_seconds": config.run.timeout_seconds,
        "max_attempts": config.run.attempts(),
        "comparison_points": engine.points(),
        "parameters": engine
            .descriptors()
            .iter()
            .zip(engine.parameters())
            .map(|(d, v)| json!({
                "file": d.file,
                "key": d.key,
                "min": d.min,
                "max": d.max,
                "value": v.map(|v| v.as_f64()),
            }))
            .collect::<Vec<_>>(),
    })
}

fn print_description(engine: &SweepEngine) {
    let config = engine.config();
    println!("working_dir: {}", config.working_dir.display());
    println!("log_dir: {}", config.log_dir.display());
    println!("reference_file: {}", config.reference_file.display());
    println!("solver: {}", config.solver.executable_path().display());
    println!("timeout_seconds: {}", config.run.timeout_seconds);
    println!("max_attempts: {}", config.run.attempts());
    println!("comparison_points: {}", engine.points().len());
    for point in engine.points() {
        println!("  T={} reference={}", point.temperature, point.reference_time);
    }
    println!("parameters: {}", engine.descriptors().len());
    for (d, v) in engine.descriptors().iter().zip(engine.parameters()) {
        let value = v
            .map(|v| v.to_string())
            .unwrap_or_else(|| "invalid".to_string());
        println!("  {}:{} = {} [{}, {}]", d.file, d.key, value, d.min, d.max);
    }
}

fn print_evaluation(evaluation: &Evaluation) {
    for r in &evaluation.results {
        println!(
            "T={} expected={} computed={} abs_error={}",
            r.temperature,
            r.reference_time,
            r.computed_delay,
            r.abs_error()
        );
    }
    println!("succeeded: {:?}", evaluation.report.succeeded);
    println!("failed: {:?}", evaluation.report.failed);
    if let Some(dir) = &evaluation.report.quarantine_dir {
        println!("quarantine: {}", dir.display());
    }
    println!("fitness: {}", evaluation.fitness);
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "'{}' already exists (use --force to overwrite)",
            path.display()
        ));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let yaml = SweepConfig::default().to_yaml()?;
    std::fs::write(path, yaml)?;
    Ok(())
}
