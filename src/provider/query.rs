// src/provider/query.rs
//! Provider query construction.
//!
//! The title, and only the title, drives relevance: keyword lists are
//! never concatenated into the query string. Duplicate tokens and
//! generic buzzwords are stripped so the provider receives a precise
//! title-only query.

use std::collections::HashSet;

/// Generic technology/strategy buzzwords that dilute title queries.
const QUERY_DENYLIST: &[&str] = &[
    "digital",
    "transformation",
    "strategy",
    "strategic",
    "innovation",
    "innovative",
    "agile",
    "scrum",
    "cloud",
    "ai",
    "ml",
    "blockchain",
    "web3",
    "synergy",
    "stack",
    "technologies",
    "technology",
    "solutions",
    "enterprise",
];

/// Build the provider query string from a job title.
pub fn build_search_query(title: &str) -> String {
    let mut seen = HashSet::new();
    title
        .split_whitespace()
        .filter(|token| {
            let key: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if key.is_empty() || QUERY_DENYLIST.contains(&key.as_str()) {
                return false;
            }
            seen.insert(key)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_duplicate_tokens() {
        assert_eq!(
            build_search_query("Data Engineer Data Platform"),
            "Data Engineer Platform"
        );
        assert_eq!(build_search_query("engineer Engineer ENGINEER"), "engineer");
    }

    #[test]
    fn test_strips_buzzwords() {
        assert_eq!(
            build_search_query("Digital Transformation Product Manager"),
            "Product Manager"
        );
        assert_eq!(
            build_search_query("Cloud AI Strategy Engineer"),
            "Engineer"
        );
    }

    #[test]
    fn test_plain_title_passes_through() {
        assert_eq!(
            build_search_query("Senior Backend Engineer"),
            "Senior Backend Engineer"
        );
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        assert_eq!(build_search_query(""), "");
        assert_eq!(build_search_query("-- // !!"), "");
    }
}
