//! Identity normalizer — maps incoming region spellings to the single
//! canonical name used as the join key in every table.
//!
//! Policy:
//!   - Comparison key = NFC composition, trimmed, whitespace collapsed,
//!     lower-cased. Diacritics are NOT folded: "New Zañiga" and
//!     "New Zaniga" are different regions unless an alias unifies them.
//!   - Spelling drift is resolved only through the explicit alias table.
//!     There is no fuzzy matching.
//!   - Anything matching neither a canonical name nor an alias comes back
//!     as `Resolution::Unknown` for manual review.

use crate::{
    config::{AliasEntry, RegionDirectoryConfig},
    error::{PipelineError, PipelineResult},
    types::RegionName,
};
use std::collections::{BTreeSet, HashMap};
use unicode_normalization::UnicodeNormalization;

/// Outcome of normalizing one raw name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched a canonical name (possibly through an alias).
    Canonical(RegionName),
    /// Matched nothing. Carries the trimmed raw input.
    Unknown(String),
}

impl Resolution {
    pub fn canonical(&self) -> Option<&str> {
        match self {
            Resolution::Canonical(name) => Some(name),
            Resolution::Unknown(_) => None,
        }
    }
}

/// Comparison key for a region spelling.
pub fn comparison_key(raw: &str) -> String {
    let composed: String = raw.nfc().collect();
    composed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct IdentityNormalizer {
    /// key → canonical spelling
    canonical: HashMap<String, RegionName>,
    /// key → canonical spelling, built from the current alias versions
    aliases: HashMap<String, RegionName>,
}

impl IdentityNormalizer {
    /// Build from canonical names and the alias history.
    ///
    /// Fails when two canonical names share a key, when an alias targets a
    /// name outside the canonical set, or when an alias variant would
    /// shadow a different canonical region.
    pub fn new(canonical_names: &[String], alias_history: &[AliasEntry]) -> PipelineResult<Self> {
        let mut canonical: HashMap<String, RegionName> = HashMap::new();
        for name in canonical_names {
            let spelled: String = name.nfc().collect::<String>().trim().to_string();
            let key = comparison_key(&spelled);
            if let Some(existing) = canonical.get(&key) {
                if *existing != spelled {
                    return Err(PipelineError::IdentityCollision {
                        first: existing.clone(),
                        second: spelled,
                    });
                }
            }
            canonical.insert(key, spelled);
        }

        let mut current: HashMap<String, &AliasEntry> = HashMap::new();
        for entry in alias_history {
            let key = comparison_key(&entry.variant);
            match current.get(&key) {
                Some(prev) if prev.version >= entry.version => {}
                _ => {
                    current.insert(key, entry);
                }
            }
        }

        let mut aliases = HashMap::new();
        for (key, entry) in current {
            let target = canonical
                .get(&comparison_key(&entry.canonical))
                .ok_or_else(|| PipelineError::UnknownCanonical {
                    variant: entry.variant.clone(),
                    canonical: entry.canonical.clone(),
                })?;
            if let Some(shadowed) = canonical.get(&key) {
                if shadowed != target {
                    return Err(PipelineError::IdentityCollision {
                        first: entry.variant.clone(),
                        second: shadowed.clone(),
                    });
                }
            }
            aliases.insert(key, target.clone());
        }

        Ok(Self { canonical, aliases })
    }

    pub fn from_config(cfg: &RegionDirectoryConfig) -> PipelineResult<Self> {
        Self::new(&cfg.canonical, &cfg.aliases)
    }

    pub fn normalize(&self, raw: &str) -> Resolution {
        let key = comparison_key(raw);
        if let Some(name) = self.canonical.get(&key).or_else(|| self.aliases.get(&key)) {
            return Resolution::Canonical(name.clone());
        }
        Resolution::Unknown(raw.trim().to_string())
    }

    /// Canonical names in sorted order.
    pub fn canonical_names(&self) -> BTreeSet<RegionName> {
        self.canonical.values().cloned().collect()
    }
}
