//! Tally CLI
//!
//! Entry point for the `tally` command-line tool.

use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tally::wire::{schema, Message};
use tally::{Client, ClientOptions};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Inspect and submit captured test results", version)]
struct Cli {
    #[command(flatten)]
    options: OptionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OptionArgs {
    /// Path to a TOML config file (default: $TALLY_CONFIG_FILE)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// API key used to authenticate with the server
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Server URL, optionally followed by /@/team/suite/version
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[arg(long, global = true)]
    team: Option<String>,

    #[arg(long, global = true)]
    suite: Option<String>,

    /// Version of the code under test
    #[arg(long, global = true)]
    revision: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a binary results file as JSON
    Inspect {
        /// Binary results file
        file: PathBuf,

        /// Print compact JSON instead of pretty-printed
        #[arg(long)]
        compact: bool,
    },

    /// Submit binary results files to the server
    Post {
        /// Files or directories to search for *.bin files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Mark the configured version as complete
    Seal,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TALLY_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { file, compact } => run_inspect(&file, compact),
        Commands::Post { paths } => run_post(&cli.options, &paths),
        Commands::Seal => run_seal(&cli.options),
    }
}

fn fail(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, error);
    process::exit(1);
}

fn run_inspect(file: &Path, compact: bool) {
    let bytes = match fs::read(file) {
        Ok(b) => b,
        Err(e) => fail(&format!("Error reading {}", file.display()), e),
    };

    let messages = match decode_file(&bytes) {
        Ok(m) => m,
        Err(e) => fail(&format!("Error decoding {}", file.display()), e),
    };

    let output = serde_json::Value::Array(messages.iter().map(Message::to_json).collect());
    let rendered = if compact {
        serde_json::to_string(&output)
    } else {
        serde_json::to_string_pretty(&output)
    };
    match rendered {
        Ok(json) => println!("{}", json),
        Err(e) => fail("Error serializing output", e),
    }
}

/// Accept both `Messages` envelopes and bare `Message` buffers.
fn decode_file(bytes: &[u8]) -> Result<Vec<Message>, tally::wire::WireError> {
    match schema::decode_messages(bytes) {
        Ok(messages) => Ok(messages),
        Err(envelope_err) => Message::from_bytes(bytes)
            .map(|m| vec![m])
            .map_err(|_| envelope_err),
    }
}

fn online_client(args: &OptionArgs) -> Client {
    let loaded = match ClientOptions::load(args.config.as_deref()) {
        Ok(o) => o,
        Err(e) => fail("Error loading configuration", e),
    };

    let mut flags = ClientOptions::new();
    flags.api_key = args.api_key.clone();
    flags.api_url = args.api_url.clone();
    flags.team = args.team.clone();
    flags.suite = args.suite.clone();
    flags.version = args.revision.clone();

    let options = match ClientOptions::layered(&[loaded, flags]) {
        Ok(o) => o,
        Err(e) => fail("Configuration error", e),
    };

    let client = Client::new();
    if let Err(e) = client.configure(options) {
        fail("Configuration error", e);
    }
    if !client.is_online() {
        fail(
            "Configuration error",
            "api_key and api_url are required and offline must be off",
        );
    }
    client
}

fn collect_binaries(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            match entry {
                Ok(entry) => {
                    let p = entry.path();
                    if entry.file_type().is_file() && p.extension().is_some_and(|e| e == "bin") {
                        files.push(p.to_path_buf());
                    }
                }
                Err(e) => fail("Error walking directory", e),
            }
        }
    }
    files
}

fn run_post(args: &OptionArgs, paths: &[PathBuf]) {
    let files = collect_binaries(paths);
    if files.is_empty() {
        fail("Nothing to submit", "no *.bin files found");
    }

    let client = online_client(args);
    let mut failed = 0;
    for file in &files {
        let bytes = match fs::read(file) {
            Ok(b) => b,
            Err(e) => fail(&format!("Error reading {}", file.display()), e),
        };
        let buffers: Vec<Vec<u8>> = match schema::split_messages(&bytes) {
            Ok(parts) => parts.into_iter().map(<[u8]>::to_vec).collect(),
            Err(_) if Message::from_bytes(&bytes).is_ok() => vec![bytes.clone()],
            Err(e) => {
                eprintln!("Skipping {}: {}", file.display(), e);
                failed += 1;
                continue;
            }
        };

        match client.submit_buffers(&buffers) {
            Ok(status) => println!("{:>5}  {}", status, file.display()),
            Err(e) => {
                eprintln!("Error submitting {}: {}", file.display(), e);
                failed += 1;
            }
        }
    }

    println!("Submitted {}/{} files", files.len() - failed, files.len());
    if failed > 0 {
        process::exit(1);
    }
}

fn run_seal(args: &OptionArgs) {
    let client = online_client(args);
    match client.seal() {
        Ok(()) => {
            if let Some(options) = client.options() {
                println!(
                    "Sealed {}/{}/{}",
                    options.team, options.suite, options.version
                );
            }
        }
        Err(e) => fail("Error sealing version", e),
    }
}
