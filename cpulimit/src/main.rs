//! Limit the CPU usage of a process.
//!
//! # Usage
//!
//! Limit process `4562` to 10% of one core:
//!
//! ```console
//! cpulimit --pid 4562 --limit 10
//! ```
//!
//! Or launch and limit a command, including its descendant tree:
//!
//! ```console
//! cpulimit --command "make -j8" --limit 200 --include-children
//! ```
//!
//! Run `cpulimit --help` to list all the available options.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use cpulimiter::{CancelToken, Controller, ControllerConfig, Selector};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// Percentage of one core allowed, from 0 to 100 * number of cores.
    #[clap(short, long, default_value_t = 150)]
    limit: i64,

    /// Exit rather than retry on attach failure or target death.
    #[clap(long)]
    lazy: bool,

    /// Also limit the CPU usage of the process's descendant tree.
    #[clap(short = 'i', long)]
    include_children: bool,

    /// Control period, in milliseconds.
    #[clap(long, default_value_t = 100)]
    duration: u64,

    /// Target by pid.
    #[clap(short, long, default_value_t = 0)]
    pid: u32,

    /// Target the first process whose executable name matches exactly.
    #[clap(short, long, default_value = "")]
    name: String,

    /// Launch this shell command and limit it.
    #[clap(short, long, default_value = "")]
    command: String,
}

fn build_selector(args: &Args) -> cpulimiter::Result<Selector> {
    let command = (!args.command.is_empty()).then(|| args.command.clone());
    let pid = (args.pid > 0).then_some(args.pid);
    let name = (!args.name.is_empty()).then(|| args.name.clone());
    Selector::new(command, pid, name)
}

#[cfg(unix)]
fn provider() -> cpulimiter::PosixProvider {
    cpulimiter::PosixProvider
}

#[cfg(windows)]
fn provider() -> cpulimiter::WindowsProvider {
    if let Err(err) = cpulimiter::raise_own_process_priority() {
        log::warn!("failed to raise the controller's own priority: {err}");
    }
    cpulimiter::WindowsProvider
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let selector = match build_selector(&args) {
        Ok(selector) => selector,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let config = ControllerConfig::new(
        args.limit as f64 / 100.0,
        Duration::from_millis(args.duration),
        args.lazy,
        args.include_children,
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::info!("signal received, shutting down");
        handler_token.cancel();
    }) {
        log::warn!("failed to install the signal handler: {err}");
    }

    let controller = Controller::new(provider(), selector, config);
    match controller.run(&cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
