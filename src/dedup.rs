// src/dedup.rs
//! Duplicate removal for freshly discovered postings.
//!
//! The matching rule lives here and only here: a normalized
//! (company, title) key for in-batch duplicates, and a first-three-token
//! title prefix for fuzzy matching against previously persisted jobs.
//! Intentionally conservative: dropping a near-duplicate is preferred
//! over flooding the user with re-titled copies of the same posting.

use std::collections::HashSet;
use tracing::warn;

use crate::store::jobs::JobStore;
use crate::types::DiscoveredPosting;

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_part(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// In-batch identity key.
pub fn dedup_key(company: &str, title: &str) -> String {
    format!("{}::{}", normalize_part(company), normalize_part(title))
}

/// First three whitespace-delimited tokens of a normalized title.
/// Catches postings re-titled slightly between scrapes, e.g. a trailing
/// "(Remote)" suffix.
pub fn title_prefix(title: &str) -> String {
    normalize_part(title)
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct Deduplicator;

impl Deduplicator {
    /// Filter a candidate batch down to postings not yet seen.
    ///
    /// First occurrence wins within the batch: batch order reflects the
    /// provider's relevance ranking. Survivors are then checked against
    /// the persisted store. The filter holds no state between calls, so
    /// running it twice over the same inputs yields the same survivors.
    pub async fn filter(
        user_id: &str,
        candidates: Vec<DiscoveredPosting>,
        store: &dyn JobStore,
    ) -> Vec<DiscoveredPosting> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut unique = Vec::new();

        for candidate in candidates {
            let key = dedup_key(&candidate.company, &candidate.title);
            if !seen.insert(key) {
                continue;
            }

            match store
                .exists_similar(user_id, &candidate.title, &candidate.company)
                .await
            {
                Ok(true) => continue,
                Ok(false) => unique.push(candidate),
                Err(e) => {
                    // A lookup failure keeps the candidate: better a
                    // possible duplicate than silently losing a posting.
                    warn!(
                        "Duplicate lookup failed for '{}' at {}: {}",
                        candidate.title, candidate.company, e
                    );
                    unique.push(candidate);
                }
            }
        }

        unique
    }
}
