use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod errors;
mod handlers;
mod render;
mod shell;
mod validation;

pub use errors::CliError;
pub use handlers::*;
pub use shell::{parse_line, Flow, Shell, ShellCommand};

#[derive(Parser, Debug)]
#[command(version, about = "Find ontology class URIs from plain-language phrases", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive search shell. This is the default.
    Shell {},

    /// Search once and exit
    Search {
        /// Phrase to look up
        #[clap(required = true, num_args = 1..)]
        phrase: Vec<String>,

        /// Number of results
        #[clap(short = 'n', long)]
        count: Option<usize>,

        /// Only return classes from this namespace (tag or URI prefix)
        #[clap(long = "ns", alias = "namespace")]
        namespace: Option<String>,

        /// Print results as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Build the catalog from record files, replacing the current one
    #[clap(alias = "rebuild")]
    Build {
        /// CSV or JSON record files. Falls back to `sources` in config.yaml.
        sources: Vec<PathBuf>,

        /// Don't draw a progress bar
        #[clap(short, long, default_value = "false")]
        quiet: bool,
    },

    /// Add records that are not in the catalog yet
    Update {
        /// CSV or JSON record files. Falls back to `sources` in config.yaml.
        sources: Vec<PathBuf>,

        #[clap(short, long, default_value = "false")]
        quiet: bool,
    },

    /// Replace the catalog with precomputed embeddings
    Import {
        /// JSON array of records, one per vector
        #[clap(long)]
        metadata: PathBuf,

        /// JSON array of vectors, same order as the records
        #[clap(long)]
        embeddings: PathBuf,
    },

    /// List the known namespaces
    Namespaces {},
}
