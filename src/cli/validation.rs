use crate::cli::errors::{CliError, CliResult};
use url::Url;

/// Validates tag format
pub fn validate_tags(tags: &str) -> CliResult<()> {
    for tag in tags.split(',') {
        let trimmed = tag.trim();
        if trimmed.len() > 50 {
            return Err(CliError::validation("tags", "Individual tags cannot exceed 50 characters"));
        }
    }
    Ok(())
}

/// Validates title length
pub fn validate_title(title: &str) -> CliResult<()> {
    if title.len() > 500 {
        return Err(CliError::validation("title", "Title cannot exceed 500 characters"));
    }
    Ok(())
}

pub fn validate_deck_name(name: &str) -> CliResult<()> {
    if name.trim().is_empty() {
        return Err(CliError::validation("name", "Deck name cannot be empty"));
    }
    if name.len() > 255 {
        return Err(CliError::validation("name", "Deck name cannot exceed 255 characters"));
    }
    Ok(())
}

pub fn validate_threshold(threshold: f32) -> CliResult<()> {
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(CliError::validation("threshold", "Threshold must be within [-1, 1]"));
    }
    Ok(())
}

pub fn validate_limit(limit: usize) -> CliResult<()> {
    if limit == 0 {
        return Err(CliError::validation("limit", "Limit must be at least 1"));
    }
    Ok(())
}

/// Validates a sync location: a file path or an http(s) url
pub fn validate_location(location: &str) -> CliResult<()> {
    if location.trim().is_empty() {
        return Err(CliError::validation("location", "Location cannot be empty"));
    }

    match location.split_once("://") {
        None | Some(("file" | "dir", _)) => Ok(()),
        Some(("http" | "https", _)) => match Url::parse(location) {
            Ok(url) if url.host().is_some() => Ok(()),
            _ => Err(CliError::validation("location", "Invalid URL format")),
        },
        Some((scheme, _)) => Err(CliError::validation(
            "location",
            format!("Unsupported scheme {scheme:?}, use a path or http(s)://"),
        )),
    }
}
