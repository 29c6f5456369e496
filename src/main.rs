use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod app;
mod catalog;
mod cli;
mod config;
mod embeddings;
mod ingest;
mod lock;
mod ranker;
mod service;
mod storage;
#[cfg(test)]
mod tests;

use app::AppFactory;
use cli::Command;

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let base_path = AppFactory::get_base_path()?;
    let command = args.command.unwrap_or(Command::Shell {});

    // listing namespaces needs no model
    if let Command::Namespaces {} = command {
        let config = config::Config::load_with(&base_path)?;
        cli::handle_namespaces(&config.namespace_table());
        return Ok(());
    }

    let service = AppFactory::create_service(&base_path)?;

    match command {
        Command::Shell {} => cli::Shell::new(&service).run(),

        Command::Search {
            phrase,
            count,
            namespace,
            json,
        } => cli::handle_search(&service, phrase, count, namespace, json),

        Command::Build { sources, quiet } => cli::handle_build(&service, &sources, quiet),

        Command::Update { sources, quiet } => cli::handle_update(&service, &sources, quiet),

        Command::Import {
            metadata,
            embeddings,
        } => cli::handle_import(&service, &metadata, &embeddings),

        Command::Namespaces {} => Ok(()),
    }
}
