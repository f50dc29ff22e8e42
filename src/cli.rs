//! Command dispatch: `run` drives a simulation with a live terminal summary,
//! `serve` runs it behind the HTTP display boundary, `plan` prints the chunk
//! plan for a trial count without dispatching anything.

use std::env;

use crate::aggregate::SharedAggregate;
use crate::backend::{CpuBackend, WorkerPool};
use crate::config::{load_config, RunConfig};
use crate::orchestrator::{CancelFlag, Orchestrator, RunMode};
use crate::planner;
use crate::progress;
use crate::server::{self, ServerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Run,
    Serve,
    Plan,
}

pub fn parse_command(args: &[String]) -> Option<Command> {
    match args.get(1).map(String::as_str) {
        Some("run") => Some(Command::Run),
        Some("serve") => Some(Command::Serve),
        Some("plan") => Some(Command::Plan),
        _ => None,
    }
}

pub fn run_with_args(args: &[String]) -> i32 {
    match parse_command(args) {
        Some(Command::Run) => handle_run(args),
        Some(Command::Serve) => handle_serve(args),
        Some(Command::Plan) => handle_plan(args),
        None => {
            eprintln!("usage: graveler <run|serve|plan> [trials] [--continuous] [--config <path>] [--chunk <n>] [--workers <n>]");
            2
        }
    }
}

/// Build the effective config from an optional `--config` file plus CLI
/// overrides. The first non-flag argument after the command is the trial
/// count.
fn config_from_args(args: &[String]) -> Result<RunConfig, String> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => load_config(path).map_err(|err| format!("config '{path}': {err}"))?,
        None => RunConfig::default(),
    };

    if let Some(trials) = args.get(2).filter(|a| !a.starts_with("--")) {
        config.total_trials = trials
            .parse::<u64>()
            .map_err(|_| format!("invalid trial count '{trials}'"))?;
    }
    if args.iter().any(|a| a == "--continuous") {
        config.continuous = true;
    }
    if let Some(chunk) = flag_value(args, "--chunk") {
        config.chunk_size = chunk
            .parse::<usize>()
            .map_err(|_| format!("invalid --chunk '{chunk}'"))?;
    }
    if let Some(workers) = flag_value(args, "--workers") {
        config.workers = workers
            .parse::<usize>()
            .map_err(|_| format!("invalid --workers '{workers}'"))?;
    }

    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn handle_run(args: &[String]) -> i32 {
    let config = match config_from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return 1;
        }
    };
    runtime.block_on(run_simulation(config))
}

async fn run_simulation(config: RunConfig) -> i32 {
    let pool = match WorkerPool::with_workers(config.workers) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to build worker pool: {err}");
            return 1;
        }
    };
    let backend = CpuBackend::new(config.unit_group_size, pool);
    let shared = SharedAggregate::new();
    let cancel = CancelFlag::new();
    let mode = if config.continuous {
        RunMode::Continuous
    } else {
        RunMode::FixedCount(config.total_trials)
    };

    // Ctrl-C flips the cancel flag; the orchestrator unwinds at its next
    // suspension point.
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("cancellation requested");
                cancel.cancel();
            }
        }
    });

    // Live summary on stderr, refreshed on a fixed interval.
    let display = tokio::spawn({
        let shared = shared.clone();
        let interval = std::time::Duration::from_millis(config.display_interval_ms.max(50));
        let target = config.target_trials;
        async move {
            loop {
                tokio::time::sleep(interval).await;
                let snapshot = progress::snapshot_shared(&shared, target);
                eprintln!("{}", progress::summary_line(&snapshot));
            }
        }
    });

    let mut orchestrator = Orchestrator::new(backend, config.clone(), shared.clone(), cancel);
    let result = orchestrator.run(mode).await;
    display.abort();

    match result {
        Ok(report) => {
            let snapshot = progress::snapshot_shared(&shared, config.target_trials);
            let payload = serde_json::json!({
                "report": report,
                "summary": snapshot,
                "histogram": shared.histogram_snapshot(),
            });
            match serde_json::to_string_pretty(&payload) {
                Ok(json) => {
                    println!("{json}");
                    0
                }
                Err(err) => {
                    eprintln!("failed to serialize run result: {err}");
                    1
                }
            }
        }
        Err(err) => {
            eprintln!("run failed: {err}");
            1
        }
    }
}

fn handle_serve(args: &[String]) -> i32 {
    let config = match config_from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    let bind_addr = env::var("GRAVELER_BIND").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return 1;
        }
    };

    let pool = match WorkerPool::with_workers(config.workers) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to build worker pool: {err}");
            return 1;
        }
    };
    let shared = SharedAggregate::new();
    let cancel = CancelFlag::new();
    let ctx = ServerContext {
        shared: shared.clone(),
        target_trials: config.target_trials,
    };

    let mode = if config.continuous {
        RunMode::Continuous
    } else {
        RunMode::FixedCount(config.total_trials)
    };
    let backend = CpuBackend::new(config.unit_group_size, pool);
    runtime.spawn(async move {
        let mut orchestrator = Orchestrator::new(backend, config, shared, cancel);
        match orchestrator.run(mode).await {
            Ok(report) => eprintln!(
                "simulation finished: {} trials in {} chunks ({} failed)",
                report.trials_completed, report.chunks_completed, report.chunks_failed
            ),
            Err(err) => eprintln!("simulation failed: {err}"),
        }
    });

    match server::run_server(&bind_addr, ctx) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("server error: {err}");
            1
        }
    }
}

fn handle_plan(args: &[String]) -> i32 {
    let config = match config_from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let descriptors = match planner::plan(
        config.total_trials,
        config.effective_chunk_ceiling(),
        config.execution_unit_ceiling,
        config.unit_group_size,
    ) {
        Ok(descriptors) => descriptors,
        Err(err) => {
            eprintln!("planning failed: {err}");
            return 1;
        }
    };

    let payload = serde_json::json!({
        "total_trials": config.total_trials,
        "chunks": descriptors.len(),
        "descriptors": descriptors,
    });
    match serde_json::to_string_pretty(&payload) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(err) => {
            eprintln!("failed to serialize plan: {err}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn known_commands_parse() {
        assert_eq!(parse_command(&args(&["graveler", "run"])), Some(Command::Run));
        assert_eq!(parse_command(&args(&["graveler", "serve"])), Some(Command::Serve));
        assert_eq!(parse_command(&args(&["graveler", "plan"])), Some(Command::Plan));
        assert_eq!(parse_command(&args(&["graveler", "nope"])), None);
        assert_eq!(parse_command(&args(&["graveler"])), None);
    }

    #[test]
    fn positional_trials_and_flags_override_defaults() {
        let config = config_from_args(&args(&[
            "graveler",
            "run",
            "2500",
            "--chunk",
            "500",
            "--workers",
            "2",
        ]))
        .expect("config");
        assert_eq!(config.total_trials, 2_500);
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.workers, 2);
        assert!(!config.continuous);
    }

    #[test]
    fn continuous_flag_sets_mode() {
        let config = config_from_args(&args(&["graveler", "run", "--continuous"])).expect("config");
        assert!(config.continuous);
        assert_eq!(config.total_trials, RunConfig::default().total_trials);
    }

    #[test]
    fn bad_trial_count_is_an_error() {
        assert!(config_from_args(&args(&["graveler", "run", "many"])).is_err());
    }
}
