//! Interactive lookup shell.
//!
//! Each line is a search (`<phrase> [-n N] [-ns TAG]`, optionally prefixed
//! with `search`) or one of `build`, `rebuild`, `help`, `quit`/`exit`/`q`.
//! Bad input and failed queries are reported and the prompt comes back;
//! errors that leave the catalog unusable end the session.

use std::io::{self, Write};

use inquire::InquireError;

use crate::cli::errors::{CliError, CliResult};
use crate::cli::render::{render_header, render_results};
use crate::cli::validation::{parse_count, validate_namespace, validate_phrase};
use crate::service::{LookupService, SearchRequest};

#[derive(Debug, Clone)]
pub enum ShellCommand {
    Search(SearchRequest),
    Build,
    Help,
    Quit,
    Empty,
}

/// What the loop should do after a line ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one shell line.
pub fn parse_line(line: &str) -> CliResult<ShellCommand> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return Ok(ShellCommand::Empty);
    };

    // a keyword followed by more words is a phrase, e.g. "exit velocity"
    if tokens.len() == 1 {
        match first.to_lowercase().as_str() {
            "quit" | "exit" | "q" => return Ok(ShellCommand::Quit),
            "help" => return Ok(ShellCommand::Help),
            "build" | "rebuild" => return Ok(ShellCommand::Build),
            _ => {}
        }
    }

    let args = if first.eq_ignore_ascii_case("search") {
        &tokens[1..]
    } else {
        &tokens[..]
    };
    parse_search(args).map(ShellCommand::Search)
}

fn parse_search(args: &[&str]) -> CliResult<SearchRequest> {
    let mut words = Vec::new();
    let mut count = None;
    let mut namespace = None;

    let mut iter = args.iter().copied();
    while let Some(token) = iter.next() {
        match token {
            "-n" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::validation("count", "Missing value for -n parameter"))?;
                count = Some(parse_count(value)?);
            }
            "-ns" | "--ns" => {
                namespace = Some(validate_namespace(iter.next().unwrap_or_default())?);
            }
            word => words.push(word),
        }
    }

    let mut request = SearchRequest::new(validate_phrase(&words)?);
    request.count = count;
    request.namespace = namespace;
    Ok(request)
}

pub struct Shell<'a> {
    service: &'a LookupService,
}

impl<'a> Shell<'a> {
    pub fn new(service: &'a LookupService) -> Self {
        Self { service }
    }

    /// Run one line. `Err` means the session cannot go on.
    pub fn execute(&self, line: &str, out: &mut dyn Write) -> anyhow::Result<Flow> {
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(err) => {
                writeln!(out, "Error: {err}")?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            ShellCommand::Empty => Ok(Flow::Continue),
            ShellCommand::Quit => {
                writeln!(out, "Goodbye!")?;
                Ok(Flow::Quit)
            }
            ShellCommand::Help => {
                write!(out, "{}", self.help())?;
                Ok(Flow::Continue)
            }
            ShellCommand::Build => self.build(out),
            ShellCommand::Search(request) => self.search(&request, out),
        }
    }

    fn search(&self, request: &SearchRequest, out: &mut dyn Write) -> anyhow::Result<Flow> {
        match self.service.search(request) {
            Ok(response) => {
                let namespace = request
                    .namespace
                    .as_deref()
                    .and_then(|ns| self.service.resolve_namespace(ns).ok());
                let count = request
                    .count
                    .unwrap_or(self.service.config().default_results);

                render_header(request.phrase.trim(), namespace.as_deref(), count, out)?;
                render_results(&response, out)?;
                Ok(Flow::Continue)
            }
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                log::debug!("query failed: {err:?}");
                writeln!(out, "Error: {err}")?;
                Ok(Flow::Continue)
            }
        }
    }

    fn build(&self, out: &mut dyn Write) -> anyhow::Result<Flow> {
        match self.service.rebuild(&[], true) {
            Ok(report) => {
                writeln!(
                    out,
                    "Indexed {} classes ({} records rejected)",
                    report.total, report.rejected
                )?;
                Ok(Flow::Continue)
            }
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                writeln!(out, "Error: {err}")?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn help(&self) -> String {
        let mut help = String::from(
            "\nUsage:\n  \
             <phrase> [-n N] [-ns TAG]   search for classes matching a phrase\n  \
             build | rebuild             rebuild the catalog from configured sources\n  \
             help                        show this message\n  \
             quit | exit | q             leave the shell\n\nNamespaces:\n",
        );
        for ns in self.service.namespaces().entries() {
            help.push_str(&format!("  {:<6} {}\n", ns.tag, ns.prefix));
        }
        help
    }

    /// Load the persisted catalog, offering to build one if there is none.
    fn prepare_catalog(&self, out: &mut dyn Write) -> anyhow::Result<()> {
        if self.service.has_persisted_catalog() {
            self.service.load_persisted()?;
            return Ok(());
        }

        writeln!(
            out,
            "No catalog found at {}",
            self.service.catalog_path().display()
        )?;

        let sources = &self.service.config().sources;
        if sources.is_empty() {
            writeln!(
                out,
                "Add record files to `sources` in config.yaml or run `find-my-uri build <FILES>`."
            )?;
            return Ok(());
        }

        let build = inquire::Confirm::new(&format!(
            "Build it now from {} configured source(s)?",
            sources.len()
        ))
        .with_default(true)
        .prompt()
        .unwrap_or(false);

        if build {
            self.build(out)?;
        }
        Ok(())
    }

    /// Prompt until the user quits.
    pub fn run(&self) -> anyhow::Result<()> {
        let mut stdout = io::stdout();
        self.prepare_catalog(&mut stdout)?;

        writeln!(
            stdout,
            "{} classes indexed. Type 'help' for usage.",
            self.service.indexed_count()?
        )?;

        loop {
            let line = match inquire::Text::new("Search:")
                .with_help_message("phrase [-n N] [-ns TAG], 'help' or 'quit'")
                .prompt()
            {
                Ok(line) => line,
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                    writeln!(stdout, "Goodbye!")?;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            if self.execute(&line, &mut stdout)? == Flow::Quit {
                return Ok(());
            }
        }
    }
}
