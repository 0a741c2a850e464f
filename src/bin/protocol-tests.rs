//! Glider protocol verification CLI.
//!
//! Usage:
//!   protocol-tests replay logs/DeepApex0009041714.txt --report logs/results.txt
//!   protocol-tests live 7818711051 --modem-port /dev/ttyUSB0
//!   protocol-tests live twr-dockserver.example.com:6565
//!   protocol-tests catalogue

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use glider_protocol_tests::config::MODEM_PORT_ENV;
use glider_protocol_tests::session::StepStatus;
use glider_protocol_tests::{
    dial_with_retries, replay_file, Catalogue, Destination, DialupTransport, LineTransport,
    LiveConfig, ReportFormat, ReportRecord, ReportSink, Script, SessionReport, SessionRunner,
    SocketTransport, StreamSink, Tally,
};

#[derive(Parser)]
#[command(name = "protocol-tests")]
#[command(about = "Verify the glider command-line protocol live or from transcripts")]
struct Cli {
    /// Show library diagnostics (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check captured transcripts against the command catalogue
    Replay {
        /// Transcript files, one session each
        #[arg(required = true)]
        transcripts: Vec<PathBuf>,

        /// Append records to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Report format
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Catalogue TOML (default: built-in APEX catalogue)
        #[arg(long)]
        catalogue: Option<PathBuf>,

        /// Only verify these blocks
        #[arg(long = "block")]
        blocks: Vec<String>,
    },

    /// Dial or connect to a glider and run a session script
    Live {
        /// Phone number, or host:port of a dockserver
        destination: String,

        /// Live configuration TOML
        #[arg(long)]
        config: Option<PathBuf>,

        /// Serial port of the modem
        #[arg(long)]
        modem_port: Option<String>,

        /// Session script TOML (default: built-in glider script)
        #[arg(long)]
        script: Option<PathBuf>,

        /// Use the built-in script that also reaches a CTD in pass-through mode
        #[arg(long, conflicts_with = "script")]
        passthrough: bool,

        /// The modem is already connected; do not dial or hang up
        #[arg(long)]
        skip_dial: bool,

        /// Dial attempts before giving up
        #[arg(long)]
        dial_attempts: Option<u32>,

        /// Pause between steps in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Print the session report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the blocks and fields of a catalogue
    Catalogue {
        /// Catalogue TOML (default: built-in APEX catalogue)
        #[arg(long)]
        catalogue: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Replay {
            transcripts,
            report,
            format,
            catalogue,
            blocks,
        } => {
            let mut catalogue = load_catalogue(catalogue.as_deref())?;
            if !blocks.is_empty() {
                catalogue.retain(&blocks);
                if catalogue.is_empty() {
                    anyhow::bail!("None of the requested blocks exist: {}", blocks.join(", "));
                }
            }
            let passed = run_replay(&catalogue, &transcripts, report.as_deref(), format)?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Commands::Live {
            destination,
            config,
            modem_port,
            script,
            passthrough,
            skip_dial,
            dial_attempts,
            settle_ms,
            json,
        } => {
            let mut live = match config {
                Some(path) => LiveConfig::load(&path)?,
                None => LiveConfig::from_env(),
            };
            if modem_port.is_some() {
                live.modem_port = modem_port;
            }
            if let Some(n) = dial_attempts {
                live.dial_attempts = n;
            }
            if let Some(ms) = settle_ms {
                live.settle = Duration::from_millis(ms);
            }
            let script = match script {
                Some(path) => Script::load(&path)?,
                None if passthrough => Script::glider_passthrough()?,
                None => Script::glider()?,
            };
            let destination = Destination::parse(&destination)?;

            let passed = run_live(&destination, &live, &script, skip_dial, json)?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Commands::Catalogue { catalogue } => {
            let catalogue = load_catalogue(catalogue.as_deref())?;
            list_catalogue(&catalogue);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_catalogue(path: Option<&Path>) -> Result<Catalogue> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Reading {}", path.display()))?;
            Catalogue::from_toml_str(&text).with_context(|| format!("Loading {}", path.display()))
        }
        None => Catalogue::builtin().context("Loading built-in catalogue"),
    }
}

/// Prints each record to the terminal and forwards it to the report file.
struct ConsoleSink {
    file: Option<StreamSink<std::fs::File>>,
}

impl ReportSink for ConsoleSink {
    fn record(&mut self, record: &ReportRecord) -> io::Result<()> {
        if record.passed() {
            println!("  {} {}", "[PASS]".green().bold(), record);
        } else {
            println!("  {} {}", "[FAIL]".red().bold(), record);
        }
        match self.file.as_mut() {
            Some(file) => file.record(record),
            None => Ok(()),
        }
    }
}

fn run_replay(
    catalogue: &Catalogue,
    transcripts: &[PathBuf],
    report: Option<&Path>,
    format: ReportFormat,
) -> Result<bool> {
    let file = match report {
        Some(path) => Some(
            StreamSink::open_append(path, format)
                .with_context(|| format!("Opening report {}", path.display()))?,
        ),
        None => None,
    };
    let mut sink = ConsoleSink { file };

    let mut total = Tally::default();
    for path in transcripts {
        println!("{}", format!("Replaying {}", path.display()).bold());
        let tally = replay_file(catalogue, path, &mut sink)?;
        if tally.passed + tally.failed == 0 {
            println!("  {}", "no catalogue commands found".yellow());
        }
        total.passed += tally.passed;
        total.failed += tally.failed;
    }

    println!();
    let summary = format!("{} passed, {} failed", total.passed, total.failed);
    if total.all_passed() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
    Ok(total.all_passed())
}

fn run_live(
    destination: &Destination,
    config: &LiveConfig,
    script: &Script,
    skip_dial: bool,
    json: bool,
) -> Result<bool> {
    println!("{}", format!("Live session with {}", destination).bold());

    let report = match destination {
        Destination::Dial(number) => {
            let port = config.modem_port.clone().ok_or_else(|| {
                anyhow!("No modem port: pass --modem-port or set {}", MODEM_PORT_ENV)
            })?;
            let mut modem = match DialupTransport::open(&port, config) {
                Ok(modem) => modem,
                Err(e) => return Ok(transport_failed(&e)),
            };

            if !skip_dial {
                let dial = dial_with_retries(&mut modem, number, config.dial_attempts)?;
                if dial.connected {
                    println!("  {} {}", "[PASS]".green().bold(), dial.summary());
                } else {
                    println!("  {} {}", "[FAIL]".red().bold(), dial.summary());
                    return Ok(false);
                }
            }

            let mut runner = SessionRunner::new(modem, config);
            let report = runner.run(script);
            let mut modem = runner.into_transport();
            if !skip_dial && !modem.hang_up()? {
                println!("  {}", "modem did not acknowledge hang-up".yellow());
            }
            report
        }
        Destination::Socket { .. } => {
            let socket = match SocketTransport::connect(&destination.to_string(), config.connect_timeout) {
                Ok(socket) => socket,
                Err(e) => return Ok(transport_failed(&e)),
            };
            let mut runner = SessionRunner::new(socket, config);
            let report = runner.run(script);
            let mut socket = runner.into_transport();
            socket.reset();
            socket.close();
            report
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_session(&report);
    }
    Ok(report.passed())
}

fn transport_failed(error: &dyn std::error::Error) -> bool {
    println!("  {} transport: {}", "[FAIL]".red().bold(), error);
    false
}

fn print_session(report: &SessionReport) {
    if let Some(branch) = &report.branch {
        println!("  branch: {}", branch.cyan());
    }
    for step in &report.steps {
        let marker = if step.passed() {
            "[PASS]".green().bold()
        } else {
            "[FAIL]".red().bold()
        };
        let shown = if step.command.is_empty() {
            "<CR>"
        } else {
            step.command.as_str()
        };
        let detail = step.detail.as_deref().unwrap_or("");
        match step.status {
            StepStatus::Passed => println!("  {} {} -> {}", marker, shown, detail),
            ref status => println!(
                "  {} {} -> {:?} (expected '{}') {}",
                marker, shown, status, step.expect, detail
            ),
        }
    }
    println!();
    match &report.failure {
        None => println!("{}", "Session passed".green().bold()),
        Some(failure) => println!("{} {}", "Session failed:".red().bold(), failure),
    }
}

fn list_catalogue(catalogue: &Catalogue) {
    println!("{}", "Command catalogue".bold());
    for block in catalogue.blocks() {
        println!();
        let mut header = format!("{} (anchor '{}'", block.name, block.anchor);
        if !block.closers.is_empty() {
            header.push_str(&format!(", closed by {}", block.closers.join(", ")));
        }
        if block.strict {
            header.push_str(", strict");
        }
        header.push(')');
        println!("{}", header.blue().bold());

        for field in &block.fields {
            let mut notes = Vec::new();
            if let Some(kind) = field.kind {
                notes.push(kind.to_string());
            }
            if let Some(req) = &field.require {
                notes.push(format!("= {}", req));
            }
            if field.gated {
                notes.push("gated".to_string());
            }
            if field.terminal {
                notes.push("terminal".to_string());
            }
            println!("  {:3}. {:<28} {}", field.ordinal, field.token, notes.join(", ").dimmed());
        }
    }
}
