// Proof-of-work ledger node - CLI entry point

use clap::Parser;
use hashchain::{Cli, CliHandler};

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let handler = CliHandler::from_cli(&cli);

    if let Err(e) = handler.handle(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
