use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Domain term used to bias transcription and translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub term: String,
    pub category: Option<String>,
}

/// Process-wide set of glossary terms, deduplicated by exact term.
#[derive(Default)]
pub struct GlossaryManager {
    entries: RwLock<HashMap<String, GlossaryEntry>>,
}

impl GlossaryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add terms, returning every entry that was accepted. Blank terms are
    /// dropped; a term that is already present is accepted but left as is.
    pub fn add_terms<I, S>(&self, terms: I, category: Option<&str>) -> Vec<GlossaryEntry>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let category = category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());

        let mut entries = self.entries.write();
        let mut accepted: Vec<GlossaryEntry> = Vec::new();
        let mut added = 0;

        for term in terms {
            let term = term.as_ref().trim();
            if term.is_empty() {
                debug!("Skipping blank glossary term");
                continue;
            }

            let entry = entries.entry(term.to_string()).or_insert_with(|| {
                added += 1;
                GlossaryEntry {
                    term: term.to_string(),
                    category: category.clone(),
                }
            });
            if !accepted.contains(entry) {
                accepted.push(entry.clone());
            }
        }

        if added > 0 {
            info!("Added {} glossary term(s), {} total", added, entries.len());
        }
        accepted
    }

    /// All entries, sorted by term.
    pub fn current_terms(&self) -> Vec<GlossaryEntry> {
        let mut terms: Vec<GlossaryEntry> = self.entries.read().values().cloned().collect();
        terms.sort_by(|a, b| a.term.cmp(&b.term));
        terms
    }

    /// Bare terms handed to collaborators as hints.
    pub fn hints(&self) -> Vec<String> {
        self.current_terms().into_iter().map(|entry| entry.term).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
