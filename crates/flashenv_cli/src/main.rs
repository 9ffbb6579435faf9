//! flashenv CLI
//!
//! Offline maintenance tool for raw flash images holding a flashenv
//! environment.
//!
//! # Commands
//!
//! - `format` - Create an erased image and initialize the environment
//! - `inspect` - Display the active sector, usage and boot report
//! - `verify` - Walk both sectors and report every record
//! - `list`, `get`, `set`, `delete` - Read and edit the environment
//! - `compact` - Rotate the live records into the standby sector

mod commands;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use commands::{CliResult, ImageArgs};

/// flashenv command-line image tools.
#[derive(Parser)]
#[command(name = "flashenv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the raw flash image
    #[arg(global = true, short, long)]
    image: Option<PathBuf>,

    /// Image size in bytes
    #[arg(global = true, long, default_value_t = 16 * 1024)]
    size: u32,

    /// Erase granularity in bytes
    #[arg(global = true, long, default_value_t = 4096)]
    erase_size: u32,

    /// Write granularity in bytes
    #[arg(global = true, long, default_value_t = 1)]
    write_size: u32,

    /// Offset of the environment partition
    #[arg(global = true, long, default_value_t = 0)]
    partition_offset: u32,

    /// Length of the environment partition (default: rest of the image)
    #[arg(global = true, long)]
    partition_len: Option<u32>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an erased image and initialize the environment
    Format,

    /// Display the active sector, usage and boot report
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Walk both sectors and report every record
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print every key and value
    List,

    /// Print one value
    Get {
        /// Key to read
        key: String,

        /// Print the value as hex bytes
        #[arg(long)]
        hex: bool,
    },

    /// Store a value
    Set {
        /// Key to write
        key: String,
        /// Value to store
        value: String,
    },

    /// Remove a key
    Delete {
        /// Key to remove
        key: String,
    },

    /// Rotate the live records into the standby sector
    Compact,
}

impl Cli {
    fn image_args(&self) -> Result<ImageArgs, String> {
        let path = self
            .image
            .clone()
            .ok_or("Image path required (--image <path>)")?;
        Ok(ImageArgs {
            path,
            size: self.size,
            erase_size: self.erase_size,
            write_size: self.write_size,
            partition_offset: self.partition_offset,
            partition_len: self.partition_len,
        })
    }
}

fn run(cli: &Cli, args: &ImageArgs, out: &mut impl Write) -> CliResult<bool> {
    match &cli.command {
        Commands::Format => commands::format::run(args, out)?,
        Commands::Inspect { format } => commands::inspect::run(args, format, out)?,
        Commands::Verify { format } => return commands::verify::run(args, format, out),
        Commands::List => commands::env::list(args, out)?,
        Commands::Get { key, hex } => commands::env::get(args, key, *hex, out)?,
        Commands::Set { key, value } => commands::env::set(args, key, value)?,
        Commands::Delete { key } => commands::env::delete(args, key)?,
        Commands::Compact => commands::compact::run(args, out)?,
    }
    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = match cli.image_args() {
        Ok(args) => args,
        Err(message) => {
            error!("{message}");
            return ExitCode::from(2);
        }
    };

    let mut stdout = std::io::stdout().lock();
    match run(&cli, &args, &mut stdout) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
