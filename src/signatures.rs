//! In-memory signature store: enrolled identities and their embeddings.
//!
//! Built once at startup (from the cache or a rebuild) and read-only
//! afterwards; the recognition stage holds a shared reference and matches
//! probe embeddings against it on every gated frame.
//!
//! Matching is deterministic. Entries keep their insertion order, the scan
//! visits every embedding in order, and only a strictly smaller distance
//! replaces the current best, so at equal distance the earliest enrolled
//! identity wins. Same probe, same store, same outcome.

use serde::{Deserialize, Serialize};

use crate::faces::Embedding;

/// One enrolled identity and its embedding set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

/// Result of matching one probe embedding.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchOutcome {
    Known { name: String, distance: f32 },
    Unknown,
}

#[derive(Clone, Debug, Default)]
pub struct SignatureStore {
    entries: Vec<IdentityEntry>,
}

impl SignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<IdentityEntry>) -> Self {
        Self { entries }
    }

    /// Add or replace an identity. Re-enrollment replaces the embedding
    /// set wholesale and keeps the identity's original position.
    pub fn insert(&mut self, name: impl Into<String>, embeddings: Vec<Embedding>) {
        let name = name.into();
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == name) {
            existing.embeddings = embeddings;
        } else {
            self.entries.push(IdentityEntry { name, embeddings });
        }
    }

    /// Nearest-match lookup. Returns the identity whose closest embedding
    /// is strictly below `tolerance`, or `Unknown`.
    pub fn match_embedding(&self, probe: &Embedding, tolerance: f32) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            for stored in &entry.embeddings {
                let distance = probe.distance(stored);
                let better = match best {
                    // Strict comparison: ties keep the earlier entry.
                    Some((_, best_distance)) => distance < best_distance,
                    None => true,
                };
                if better {
                    best = Some((index, distance));
                }
            }
        }

        match best {
            Some((index, distance)) if distance < tolerance => MatchOutcome::Known {
                name: self.entries[index].name.clone(),
                distance,
            },
            _ => MatchOutcome::Unknown,
        }
    }

    pub fn entries(&self) -> &[IdentityEntry] {
        &self.entries
    }

    pub fn identity_count(&self) -> usize {
        self.entries.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.entries.iter().map(|e| e.embeddings.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
