//! CLI smoke entry point.
//!
//! # Responsibility
//! - Bootstrap `taskboard_core` from an optional TOML config path.
//! - Run startup maintenance and sync once, then print a board summary.

use log::error;
use std::path::PathBuf;
use std::process::ExitCode;
use taskboard_core::{core_version, CoreConfig, TaskboardRuntime};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => match CoreConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("taskboard: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => CoreConfig::default(),
    };

    let runtime = match TaskboardRuntime::bootstrap(config, None) {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("event=cli_start module=cli status=error error={err}");
            eprintln!("taskboard: {err}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.orchestrator().startup().await;
    let counts = runtime.store().lock().counts();
    let status = runtime.orchestrator().status();

    println!("taskboard_core version={}", core_version());
    println!("device_id={}", runtime.device_id());
    println!(
        "tasks={} notes={} subtasks={}",
        counts.tasks, counts.notes, counts.subtasks
    );
    println!("startup_sync={outcome:?} phase={:?}", status.phase);
    if let Some(last_error) = status.last_error {
        println!("last_error={last_error}");
    }
    ExitCode::SUCCESS
}
