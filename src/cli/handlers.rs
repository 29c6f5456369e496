use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::catalog::NamespaceTable;
use crate::cli::render::{render_json, render_results};
use crate::service::{BuildReport, LookupError, LookupService, SearchRequest};

fn load_catalog(service: &LookupService) -> Result<()> {
    match service.load_persisted() {
        Ok(count) => {
            log::debug!("catalog ready with {} classes", count);
            Ok(())
        }
        Err(LookupError::MissingCatalog(path)) => {
            bail!("No catalog found at {path}. Run `find-my-uri build <FILES>` first.")
        }
        Err(err) => Err(err.into()),
    }
}

pub fn handle_search(
    service: &LookupService,
    phrase: Vec<String>,
    count: Option<usize>,
    namespace: Option<String>,
    json: bool,
) -> Result<()> {
    load_catalog(service)?;

    let mut request = SearchRequest::new(phrase.join(" "));
    request.count = count;
    request.namespace = namespace;

    let response = service.search(&request)?;

    if json {
        println!("{}", render_json(&response)?);
    } else {
        render_results(&response, &mut io::stdout())?;
    }
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!(
        "{} added, {} already present, {} rejected. Catalog holds {} classes.",
        report.added, report.skipped, report.rejected, report.total
    );
}

pub fn handle_build(service: &LookupService, sources: &[PathBuf], quiet: bool) -> Result<()> {
    let report = service.rebuild(sources, !quiet)?;
    print_report(&report);
    Ok(())
}

pub fn handle_update(service: &LookupService, sources: &[PathBuf], quiet: bool) -> Result<()> {
    if service.has_persisted_catalog() {
        load_catalog(service)?;
    }
    let report = service.update(sources, !quiet)?;
    print_report(&report);
    Ok(())
}

pub fn handle_import(service: &LookupService, metadata: &Path, embeddings: &Path) -> Result<()> {
    let report = service.import(metadata, embeddings)?;
    print_report(&report);
    Ok(())
}

pub fn handle_namespaces(namespaces: &NamespaceTable) {
    for ns in namespaces.entries() {
        if ns.description.is_empty() {
            println!("{:<6} {}", ns.tag, ns.prefix);
        } else {
            println!("{:<6} {}  ({})", ns.tag, ns.prefix, ns.description);
        }
    }
}
