//! Utility functions and helpers

use regex::Regex;

/// Regex for validating Envoy resource names
/// Names must start with a letter or underscore, followed by letters, numbers, underscores, or hyphens
pub static VALID_NAME_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_-]*$").unwrap());
