use crate::cli::errors::{CliError, CliResult};

/// Validates and normalizes a search phrase
pub fn validate_phrase(words: &[&str]) -> CliResult<String> {
    let phrase = words.join(" ");
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return Err(CliError::validation("phrase", "Search phrase cannot be empty"));
    }
    Ok(phrase.to_string())
}

/// Parses a result count, which must be a positive integer
pub fn parse_count(value: &str) -> CliResult<usize> {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => usize::try_from(n)
            .map_err(|_| CliError::validation("count", "Result count is too large")),
        Ok(_) => Err(CliError::validation("count", "Result count must be a positive integer")),
        Err(_) => Err(CliError::validation(
            "count",
            format!("Invalid number for -n parameter: '{}'", value),
        )),
    }
}

/// Validates a namespace argument is present and well-formed.
/// Whether it names a known vocabulary is checked against the namespace table later.
pub fn validate_namespace(value: &str) -> CliResult<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') {
        return Err(CliError::validation("namespace", "Missing value for -ns parameter"));
    }
    Ok(value.to_string())
}
