//! stax CLI — change-set driven stack deployments.

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "stax",
    version,
    about = "Declarative stack deployments through reviewed change sets"
)]
struct Cli {
    #[command(flatten)]
    global: stax::cli::GlobalArgs,

    #[command(subcommand)]
    command: stax::cli::Commands,
}

/// Diagnostics go to stderr; `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: bool) {
    let default = if debug { "stax=debug" } else { "stax=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.debug);
    match stax::cli::dispatch(&cli.global, cli.command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            if e.is_run_fatal() {
                eprintln!("no stack was deployed");
            }
            std::process::exit(1);
        }
    }
}
