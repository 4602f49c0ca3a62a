//! gitnest - nested transactions over a Git-backed database
//!
//! Command-line entry point: runs a command shell against a database
//! directory, interactively or from `-e`.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use gitnest::db::{Session, SessionConfig, Shell, ShellConfig};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let mut path = PathBuf::from(".gitnest");
    let mut verbose = false;
    let mut execute: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--database" => {
                i += 1;
                match args.get(i) {
                    Some(arg) => path = PathBuf::from(arg),
                    None => {
                        eprintln!("Missing value for {}", args[i - 1]);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "-e" | "--execute" => {
                i += 1;
                match args.get(i) {
                    Some(arg) => execute = Some(arg.clone()),
                    None => {
                        eprintln!("Missing value for {}", args[i - 1]);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("gitnest v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if !arg.starts_with('-') => {
                path = PathBuf::from(arg);
            }
            arg => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    init_tracing(verbose);

    let session = match Session::connect(SessionConfig::new(&path)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match execute {
        Some(script) => {
            let mut shell = Shell::with_config(session, ShellConfig::default().prompt("").echo(verbose));
            shell.run_script(&script, io::stdout().lock())
        }
        None => {
            let mut shell = Shell::new(session);
            println!("gitnest v{} - type .help for commands", env!("CARGO_PKG_VERSION"));
            shell.run(io::stdin().lock(), io::stdout().lock())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise `warn`, or `debug` with `-v`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "gitnest=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_help() {
    println!("gitnest - nested transactions over a Git-backed database");
    println!();
    println!("Usage: gitnest [OPTIONS] [DATABASE]");
    println!();
    println!("Options:");
    println!("  -d, --database PATH    Path to database directory (default: .gitnest)");
    println!("  -e, --execute CMDS     Execute ';'-separated commands and exit");
    println!("  -v, --verbose          Log transaction activity to stderr");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Examples:");
    println!("  gitnest                                   Start the shell on .gitnest");
    println!("  gitnest mydb                              Start the shell on 'mydb'");
    println!("  gitnest -e 'BEGIN; INSERT t k1; COMMIT'   Run commands and exit");
}
