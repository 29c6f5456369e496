use std::io::{self, Write};

use crate::service::{Hit, SearchResponse};

const RULE_WIDTH: usize = 50;

/// Write ranked results in the shell's text layout.
pub fn render_results(response: &SearchResponse, out: &mut dyn Write) -> io::Result<()> {
    if response.is_empty() {
        writeln!(out, "No results found.")?;
        return Ok(());
    }

    for hit in response.hits() {
        render_hit(&hit, out)?;
    }
    Ok(())
}

fn render_hit(hit: &Hit<'_>, out: &mut dyn Write) -> io::Result<()> {
    let item = hit.item;
    writeln!(out, "{:2}. {}", hit.rank, item.short_name)?;
    writeln!(out, "    URI: {}", item.identifier)?;
    writeln!(out, "    Namespace: {}", item.namespace)?;
    if !item.label.is_empty() {
        writeln!(out, "    label: {}", item.label)?;
    }
    writeln!(out, "    Similarity: {:.3}", hit.score)?;
    writeln!(out)
}

/// Header printed before each result listing.
pub fn render_header(
    phrase: &str,
    namespace: Option<&str>,
    count: usize,
    out: &mut dyn Write,
) -> io::Result<()> {
    writeln!(out, "\nSearching for: '{}'", phrase)?;
    if let Some(ns) = namespace {
        writeln!(out, "Filtering by namespace: {}", ns)?;
    }
    writeln!(out, "Showing top {} results:", count)?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))
}

/// Results as a pretty JSON array.
pub fn render_json(response: &SearchResponse) -> serde_json::Result<String> {
    let hits: Vec<Hit<'_>> = response.hits().collect();
    serde_json::to_string_pretty(&hits)
}
