//! openocd-rpc command line entry point

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

use openocd_rpc::config::Cmd;
use openocd_rpc::memory::parse_address;
use openocd_rpc::{Args, Config, RpcError, RpcSession, Word, WordWidth};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("Starting openocd-rpc v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args);
    let mut session = RpcSession::connect(&config).await.inspect_err(|e| {
        error!("Connect error: {}", e);
    })?;

    let result = run(&mut session, &args.command).await;
    session.close().await;

    match result {
        Ok(output) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_plain(&output);
            }
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            Err(e.into())
        }
    }
}

/// Result of one CLI command
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Output {
    Send { command: String, response: String },
    ReadVar { address: u64, value: Option<Word> },
    ReadMem { address: u64, width: u32, words: Vec<Word> },
    Write { address: u64, width: u32, words: Vec<Word> },
}

async fn run(session: &mut RpcSession, command: &Cmd) -> openocd_rpc::Result<Output> {
    match command {
        Cmd::Send { command } => {
            let response = session.send(command).await?;
            Ok(Output::Send { command: command.clone(), response })
        }
        Cmd::ReadVar { address } => {
            let address = parse_address(address)?;
            let value = session.read_variable(address).await?;
            Ok(Output::ReadVar { address, value })
        }
        Cmd::WriteVar { address, value } => {
            let address = parse_address(address)?;
            let value = parse_address(value)?;
            let value = u32::try_from(value).map_err(|_| {
                RpcError::InvalidArgument(format!("Value 0x{:x} does not fit in 32 bits", value))
            })?;
            session.write_variable(address, value).await?;
            Ok(Output::Write { address, width: 32, words: vec![value as Word] })
        }
        Cmd::ReadMem { address, count, width } => {
            let width = WordWidth::try_from(*width)?;
            let address = parse_address(address)?;
            let words = session.read_memory(width, address, *count).await?;
            Ok(Output::ReadMem { address, width: width.bits(), words })
        }
        Cmd::WriteMem { address, values, width } => {
            let width = WordWidth::try_from(*width)?;
            let address = parse_address(address)?;
            let words = values
                .iter()
                .map(|v| parse_address(v))
                .collect::<openocd_rpc::Result<Vec<Word>>>()?;
            session.write_memory(width, address, &words).await?;
            Ok(Output::Write { address, width: width.bits(), words })
        }
    }
}

/// Human-readable rendering; zero-padding is display only
fn print_plain(output: &Output) {
    match output {
        Output::Send { response, .. } => println!("{}", response.trim_end()),
        Output::ReadVar { address, value: Some(v) } => {
            println!("variable @ 0x{:08x}: 0x{:08x}", address, v)
        }
        Output::ReadVar { address, value: None } => {
            println!("variable @ 0x{:08x}: <None>", address)
        }
        Output::ReadMem { address, words, .. } => {
            let formatted: Vec<String> = words.iter().map(|w| format!("0x{:08x}", w)).collect();
            println!("memory @ 0x{:08x} ({} words): {}", address, words.len(), formatted.join(" "));
        }
        Output::Write { address, width, words } => {
            println!("wrote {} {}-bit word(s) to 0x{:08x}", words.len(), width, address)
        }
    }
}

fn init_logging(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", args.log_level);
    Ok(())
}
