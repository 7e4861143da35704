use std::future::Future;
use std::path::PathBuf;

use shotsync_core::{Error, Result};
use tracing_subscriber::EnvFilter;

mod session;
mod web;

use session::{Command, SessionArgs};

const DEFAULT_PORT: u16 = 8765;

fn main() {
    init_tracing();
    match real_main() {
        Ok(0) => {}
        Ok(_) => std::process::exit(1),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns the number of failures reported while the command ran.
fn real_main() -> Result<usize> {
    let mut args = std::env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(0);
    };

    match cmd.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(0)
        }
        "serve" => {
            let mut port = DEFAULT_PORT;
            let mut db: Option<PathBuf> = None;

            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--port" => {
                        let raw = args.next().unwrap_or_default();
                        port = raw.parse().map_err(|_| {
                            Error::InvalidArgument(format!("--port expects a number, got {raw:?}"))
                        })?;
                    }
                    "--db" => db = args.next().map(PathBuf::from),
                    _ => {
                        return Err(Error::InvalidArgument(format!("unknown arg: {arg}")));
                    }
                }
            }

            let db = match db {
                Some(db) => db,
                None => default_db_path()?,
            };
            block_on(web::run_web_server(port, db))??;
            Ok(0)
        }
        other => match Command::parse(other) {
            Some(command) => {
                let session_args = SessionArgs::parse(args)?;
                block_on(session::run(command, session_args))?
            }
            None => Err(Error::InvalidArgument(format!("unknown command: {cmd}"))),
        },
    }
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::Io)?;
    Ok(runtime.block_on(future))
}

fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("shotsync");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("screenshots.sqlite"))
}

fn print_help() {
    println!(
        r#"shotsync

USAGE:
  shotsync list   --test <id> [STORE]
  shotsync upload --test <id> --platform <key> [--index <n>] [--name <name>] [STORE] <file>...
  shotsync delete --test <id> --platform <key> --index <n> [STORE]
  shotsync rename --test <id> --index <n> --name <name> [STORE]
  shotsync serve  [--port <port>] [--db <sqlite_path>]

STORE:
  --mock                    use the in-memory store with fixture data
  --url <base> --project <id>
                            talk to a screenshot server (defaults from config)
  --config <path>           settings file (defaults to the per-user config)

NOTES:
  - Every command loads the test's screenshots first; mutations are saved
    straight away and the reloaded sets are printed.
  - RUST_LOG controls log verbosity (default: info).
"#
    );
}
