use anyhow::Result;
use clap::{Parser, Subcommand};
use emberchat_backend::config::EmberchatConfig;
use emberchat_backend::node::EmberchatNode;
use emberchat_backend::telemetry;

#[derive(Parser)]
#[command(author, version, about = "Emberchat relay daemon")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP/WebSocket relay server
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();

    let config = EmberchatConfig::from_env()?;
    let node = EmberchatNode::start(config).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => node.run_http_server().await,
    }
}
