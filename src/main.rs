use clap::{Parser, ValueEnum};
use config::Config;
use rustrelay::client;
use rustrelay::relay::bootstrap::{parse_port, resolve, wildcard_candidates};
use rustrelay::RelayServer;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// Process exit codes
const EXIT_USAGE: u8 = 1;
const EXIT_INVALID_PORT: u8 = 2;
const EXIT_STARTUP: u8 = 3;
const EXIT_CONNECT: u8 = 4;
const EXIT_RUNTIME: u8 = 5;

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing for the rustrelay crate based on verbosity level
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace", // 3 or more
    };

    let filter = format!("rustrelay={}", level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Server,
    Client,
}

#[derive(Parser)]
#[command(author, version, about = "TCP broadcast relay", long_about = None)]
struct Args {
    /// Run the relay server or an interactive client
    #[arg(value_enum)]
    mode: Mode,

    /// Server host to connect to (client mode; the server binds all addresses)
    host: String,

    /// Port to listen on or connect to (1024-65535)
    port: String,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (TOML format)
    #[arg(long)]
    config: Option<String>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(args.verbose);

    let port = match parse_port(&args.port) {
        Ok(port) => port,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_INVALID_PORT);
        }
    };

    match args.mode {
        Mode::Server => run_server(args.config.as_deref(), port),
        Mode::Client => run_client(&args.host, port),
    }
}

fn run_server(config_path: Option<&str>, port: u16) -> ExitCode {
    // Create config - load from file if specified, otherwise use defaults
    let config = if let Some(config_path) = config_path {
        match Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
        {
            Ok(c) => c,
            Err(err) => {
                eprintln!("Failed to load config file '{}': {}", config_path, err);
                return ExitCode::from(EXIT_STARTUP);
            }
        }
    } else {
        Config::default()
    };

    let mut server = match RelayServer::new(&config, wildcard_candidates(port)) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Failed to start relay: {err}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    println!("Relay listening on {}", server.local_addr());

    // The single-threaded event loop. Only returns on a fatal error.
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Fatal error in relay loop: {err}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn run_client(host: &str, port: u16) -> ExitCode {
    let stream = match resolve(host, port).and_then(client::connect) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("Failed to connect to {host}:{port}: {err}");
            return ExitCode::from(EXIT_CONNECT);
        }
    };

    let input = io::BufReader::new(io::stdin());
    match client::run(stream, input, io::stdout()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Client error: {err}");
            ExitCode::from(EXIT_CONNECT)
        }
    }
}
