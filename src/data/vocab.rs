// ============================================================
// Layer 4 — Vocabulary Configuration
// ============================================================
// The lexical counterfactual overwrites salient content words
// with a placeholder token. Its id depends on the dictionary the
// question ids were produced with, so it is resolved here from
// the dataset version (or given explicitly) instead of being
// scattered through the training code.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Placeholder ids of the published VQA dictionaries.
const KNOWN_PLACEHOLDERS: [(&str, u32); 2] = [("v1", 18329), ("v2", 18455)];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyConfig {
    pub version:           String,
    pub placeholder_token: u32,
}

impl VocabularyConfig {
    /// Resolve the placeholder for `version`. An explicit override always
    /// wins; otherwise the version must be one of the known dictionaries.
    pub fn resolve(version: &str, placeholder_override: Option<u32>) -> Result<Self> {
        let placeholder_token = match placeholder_override {
            Some(token) => token,
            None => match KNOWN_PLACEHOLDERS.iter().find(|(v, _)| *v == version) {
                Some((_, token)) => *token,
                None => bail!(
                    "no placeholder token known for dictionary version '{version}'; pass --placeholder-token"
                ),
            },
        };
        Ok(Self { version: version.to_string(), placeholder_token })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_versions() {
        assert_eq!(VocabularyConfig::resolve("v1", None).unwrap().placeholder_token, 18329);
        assert_eq!(VocabularyConfig::resolve("v2", None).unwrap().placeholder_token, 18455);
    }

    #[test]
    fn test_override_wins() {
        let vocab = VocabularyConfig::resolve("v2", Some(63)).unwrap();
        assert_eq!(vocab.placeholder_token, 63);
    }

    #[test]
    fn test_unknown_version_needs_override() {
        assert!(VocabularyConfig::resolve("cp-v3", None).is_err());
        assert!(VocabularyConfig::resolve("cp-v3", Some(5)).is_ok());
    }
}
