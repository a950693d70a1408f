//! Waymark Command-Line Client
//!
//! Runs, reverses, creates and lists migrations in a directory.

mod formatter;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use formatter::{create_formatter, Formatter, OutputFormat};
use tokio::sync::broadcast;
use waymark_core::environment::{DEFAULT_MIGRATIONS_PATH, STORAGE_FILE_OPTION};
use waymark_core::{Direction, Environment, OpenSledWard, Orchestrator, RunEvent, RunOptions};

/// Waymark Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(version, about = "Ordered, reversible migrations")]
pub struct Args {
    /// Migration directory
    #[arg(short = 'p', long, global = true, default_value = DEFAULT_MIGRATIONS_PATH)]
    pub path: PathBuf,

    /// State file name inside the migration directory
    #[arg(long, global = true)]
    pub state_file: Option<String>,

    /// Keep completed state in a sled database at this path
    #[arg(long, global = true, conflicts_with = "state_file")]
    pub sled: Option<PathBuf>,

    /// Extra option passed to migration scripts (KEY=VALUE)
    #[arg(short = 'o', long = "option", global = true, value_parser = parse_option)]
    pub options: Vec<(String, String)>,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run pending migrations
    Up(RunArgs),
    /// Reverse completed migrations
    Down(RunArgs),
    /// Create a new migration file
    Create {
        /// Label appended to the timestamp
        name: String,
        /// Template file to copy instead of the empty script
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// Show applied and pending migrations
    Status,
}

#[derive(clap::Args, Debug, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Run every available migration, ignoring completed state
    #[arg(short, long)]
    pub force: bool,

    /// Do not persist completed state
    #[arg(long)]
    pub nosave: bool,
}

impl From<&RunArgs> for RunOptions {
    fn from(args: &RunArgs) -> Self {
        RunOptions::default()
            .with_force(args.force)
            .with_nosave(args.nosave)
    }
}

impl Args {
    /// Build the migration environment described by the arguments.
    pub fn to_environment(&self) -> Environment {
        let mut env = Environment::new(&self.path);

        if let Some(state_file) = &self.state_file {
            env = env.with_option(STORAGE_FILE_OPTION, state_file.as_str());
        }
        for (key, value) in &self.options {
            env = env.with_option(key.as_str(), value.as_str());
        }
        if let Some(sled) = &self.sled {
            env = env.with_ward(OpenSledWard::new(sled));
        }

        env
    }
}

fn parse_option(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("waymark=info,waymark_core=info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let formatter = create_formatter(args.format);
    let mut orchestrator = Orchestrator::new(args.to_environment());

    match &args.command {
        Command::Up(run_args) => run_direction(orchestrator, Direction::Up, run_args, formatter).await,
        Command::Down(run_args) => {
            run_direction(orchestrator, Direction::Down, run_args, formatter).await
        }
        Command::Create { name, template } => {
            let path = orchestrator.create(name, template.as_deref()).await?;
            println!("{}", formatter.format_created(&path));
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let statuses = orchestrator.status().await?;
            println!("{}", formatter.format_status(&statuses));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_direction(
    mut orchestrator: Orchestrator,
    direction: Direction,
    run_args: &RunArgs,
    formatter: Box<dyn Formatter>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let formatter: std::sync::Arc<dyn Formatter> = formatter.into();
    let printer = tokio::spawn(print_events(orchestrator.subscribe(), formatter.clone()));

    let result = orchestrator.run(direction, run_args.into()).await;
    // Closing the sender ends the printer once it has drained.
    drop(orchestrator);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "event printer failed");
    }

    let report = result?;
    let summary = formatter.format_report(&report);
    if !summary.is_empty() {
        println!("{}", summary);
    }

    Ok(if report.is_halted() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn print_events(
    mut events: broadcast::Receiver<RunEvent>,
    formatter: std::sync::Arc<dyn Formatter>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = formatter.format_event(&event) {
                    println!("{}", line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event output lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
