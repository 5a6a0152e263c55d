//! Cargo Lens - run cargo tasks and report their diagnostics.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cargo_lens::config::{ConfigLoader, RunnerConfig};
use cargo_lens::diagnostics::Severity;
use cargo_lens::display;
use cargo_lens::sink::{
    CollectingDiagnostics, ConsoleDiagnostics, ConsoleNotifier, ConsoleText, DiagnosticSink, Notice,
    Notifier,
};
use cargo_lens::task::{
    CheckTarget, Invocation, Sinks, TaskCoordinator, TaskOutcome, TaskReport, TaskRequest,
    TaskTicket,
};

#[derive(Parser)]
#[command(
    name = "cargo-lens",
    about = "Run cargo tasks and report their diagnostics",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory to run cargo in.
    #[arg(short = 'C', long = "dir", global = true)]
    dir: Option<PathBuf>,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `cargo build`.
    Build {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run `cargo check`.
    Check {
        /// Only check the library target.
        #[arg(long)]
        lib: bool,
    },
    /// Run `cargo clippy`.
    Clippy {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run `cargo run`.
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run `cargo test`.
    Test {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run any cargo subcommand.
    Exec {
        /// The cargo subcommand.
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Read commands from stdin: `build`, `!build` (forced), `stop`, `quit`.
    Interactive,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Option<RunnerConfig> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load() {
        Ok(config) => Some(config),
        Err(e) => {
            display::print_error(&e.to_string());
            None
        }
    }
}

fn resolve_working_dir(dir: Option<PathBuf>, notifier: &dyn Notifier) -> Option<PathBuf> {
    let dir = match dir {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                notifier.notify(Notice::WorkingDirectoryUnresolved {
                    reason: e.to_string(),
                });
                return None;
            }
        },
    };
    if dir.is_dir() {
        Some(dir)
    } else {
        notifier.notify(Notice::WorkingDirectoryUnresolved {
            reason: format!("{} is not a directory", dir.display()),
        });
        None
    }
}

fn print_diagnostics(collected: &CollectingDiagnostics) {
    for (path, diagnostics) in collected.by_file() {
        for diagnostic in &diagnostics {
            display::print_diagnostic(&path, diagnostic);
        }
    }
    let errors = collected.count(Severity::Error);
    let warnings = collected.count(Severity::Warning);
    display::print_summary(errors, warnings, collected.len().saturating_sub(errors + warnings));
}

/// Split an interactive line into (force, command, args).
fn parse_command_line(line: &str) -> Option<(bool, String, Vec<String>)> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    let (force, command) = match first.strip_prefix('!') {
        Some(command) if !command.is_empty() => (true, command),
        Some(_) => return None,
        None => (false, first),
    };
    Some((force, command.to_string(), words.map(String::from).collect()))
}

fn exit_code(report: &TaskReport) -> ExitCode {
    match report.outcome {
        TaskOutcome::Exited { code: Some(0), .. } => ExitCode::SUCCESS,
        TaskOutcome::Exited { code: Some(code), .. } => {
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        TaskOutcome::Exited { code: None, .. } | TaskOutcome::Cancelled => ExitCode::FAILURE,
    }
}

async fn run_once(
    coordinator: &TaskCoordinator,
    collected: &CollectingDiagnostics,
    invocation: Invocation,
) -> ExitCode {
    let Some(ticket) = invocation.ticket() else {
        return ExitCode::FAILURE;
    };

    tokio::select! {
        report = ticket.wait() => match report {
            Ok(report) => {
                if !report.is_cancelled() {
                    print_diagnostics(collected);
                }
                exit_code(&report)
            }
            Err(e) => {
                display::print_error(&e.to_string());
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            if let Err(e) = coordinator.stop().await {
                display::print_error(&e.to_string());
            }
            ExitCode::from(130)
        }
    }
}

/// Console sinks. Diagnostics are collected for a summary when `collected`
/// is given, otherwise printed as they arrive.
fn console_sinks(collected: Option<&Arc<CollectingDiagnostics>>) -> Sinks {
    let diagnostics: Arc<dyn DiagnosticSink> = match collected {
        Some(collected) => collected.clone(),
        None => Arc::new(ConsoleDiagnostics),
    };
    Sinks {
        diagnostics,
        text: Arc::new(ConsoleText),
        notifier: Arc::new(ConsoleNotifier),
    }
}

fn watch_ticket(ticket: TaskTicket) {
    tokio::spawn(async move {
        match ticket.wait().await {
            Ok(report) if !report.is_cancelled() => {
                display::print_diagnostic_count(report.diagnostics);
            }
            Ok(_) => {}
            Err(e) => display::print_error(&e.to_string()),
        }
    });
}

async fn interactive(coordinator: &TaskCoordinator, working_dir: &Path) -> ExitCode {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = coordinator.stop().await {
                    display::print_error(&e.to_string());
                }
                continue;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                display::print_error(&e.to_string());
                break;
            }
        };
        let Some((force, command, args)) = parse_command_line(&line) else {
            continue;
        };

        let invocation = match command.as_str() {
            "quit" | "exit" => break,
            "stop" => {
                if let Err(e) = coordinator.stop().await {
                    display::print_error(&e.to_string());
                }
                continue;
            }
            "check" => coordinator.check(working_dir, None, force).await,
            _ => {
                coordinator
                    .invoke(
                        TaskRequest::new(command.clone(), working_dir)
                            .args(args)
                            .force(force),
                    )
                    .await
            }
        };

        match invocation {
            Ok(Invocation::Started(ticket)) => watch_ticket(ticket),
            Ok(Invocation::Dropped) => {
                display::print_notice("A task is already running; prefix with `!` to restart it");
            }
            Err(e) => tracing::debug!(error = %e, "Task did not start"),
        }
    }

    if let Err(e) = coordinator.stop().await {
        display::print_error(&e.to_string());
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(config) = load_config(cli.config) else {
        return ExitCode::from(2);
    };
    let Some(working_dir) = resolve_working_dir(cli.dir, &ConsoleNotifier) else {
        return ExitCode::from(2);
    };

    let collected = Arc::new(CollectingDiagnostics::new());
    let streaming = matches!(cli.command, Commands::Interactive);
    let coordinator = TaskCoordinator::new(
        &config,
        console_sinks((!streaming).then_some(&collected)),
    );
    tracing::info!(
        cargo = %config.cargo_path,
        dir = %working_dir.display(),
        "Starting cargo-lens"
    );

    let invocation = match cli.command {
        Commands::Interactive => {
            return interactive(&coordinator, &working_dir).await;
        }
        Commands::Check { lib } => {
            let target = lib.then_some(CheckTarget::Library);
            coordinator.check(&working_dir, target, false).await
        }
        Commands::Build { args } => {
            coordinator
                .invoke(TaskRequest::new("build", &working_dir).args(args))
                .await
        }
        Commands::Clippy { args } => {
            coordinator
                .invoke(TaskRequest::new("clippy", &working_dir).args(args))
                .await
        }
        Commands::Run { args } => {
            coordinator
                .invoke(TaskRequest::new("run", &working_dir).args(args))
                .await
        }
        Commands::Test { args } => {
            coordinator
                .invoke(TaskRequest::new("test", &working_dir).args(args))
                .await
        }
        Commands::Exec { command, args } => {
            coordinator
                .invoke(TaskRequest::new(command, &working_dir).args(args))
                .await
        }
    };

    match invocation {
        Ok(invocation) => run_once(&coordinator, &collected, invocation).await,
        Err(e) => {
            tracing::debug!(error = %e, "Task did not start");
            ExitCode::FAILURE
        }
    }
}
