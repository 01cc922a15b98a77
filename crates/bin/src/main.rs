use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands, DbCommands};
use output::OutputFormat;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("contextdb=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match &cli.command {
        Commands::Keys(args) => commands::keys::run(args, format),
        Commands::Sign(args) => commands::sign::sign(args, format),
        Commands::Verify(args) => commands::sign::verify(args, format),
        Commands::Uri(args) => commands::uri::run(args, format),
        Commands::Db(DbCommands::List(args)) => commands::db::list(args, format).await,
        Commands::Db(DbCommands::Get(args)) => commands::db::get(args, format).await,
    }
}
