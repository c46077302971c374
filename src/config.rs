//! Configuration for the openocd-rpc client

use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};

/// Default TCL RPC host
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default TCL RPC port
pub const DEFAULT_PORT: u16 = 6666;
/// Default receive chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "openocd-rpc")]
#[command(about = "Talk to a running OpenOCD over its TCL RPC socket")]
#[command(version)]
pub struct Args {
    /// OpenOCD host
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// OpenOCD TCL port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log raw bytes sent and received
    #[arg(short, long)]
    pub verbose: bool,

    /// Receive chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Per-read/write deadline in milliseconds (blocks indefinitely if omitted)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file path (defaults to stderr)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Cmd,
}

/// Operations exposed on the command line
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Cmd {
    /// Send a raw TCL command and print the reply
    Send {
        command: String,
    },
    /// Read one 32-bit word (mdw)
    ReadVar {
        address: String,
    },
    /// Write one 32-bit word (mww)
    WriteVar {
        address: String,
        value: String,
    },
    /// Read a block of words (read_memory)
    ReadMem {
        address: String,
        count: u32,
        /// Word width in bits (8, 16, 32, 64)
        #[arg(long, default_value_t = 32)]
        width: u32,
    },
    /// Write a block of words (write_memory)
    WriteMem {
        address: String,
        #[arg(required = true)]
        values: Vec<String>,
        /// Word width in bits (8, 16, 32, 64)
        #[arg(long, default_value_t = 32)]
        width: u32,
    },
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Emit raw traffic through the log
    pub verbose: bool,
    /// Maximum bytes requested per socket read
    pub chunk_size: usize,
    /// Deadline applied to each write and read; `None` blocks indefinitely
    pub io_timeout: Option<Duration>,
}

impl Config {
    pub fn from_args(args: &Args) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            verbose: args.verbose,
            chunk_size: args.chunk_size,
            io_timeout: args.timeout_ms.map(Duration::from_millis),
        }
    }

    /// `host:port` form used for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            verbose: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            io_timeout: None,
        }
    }
}
