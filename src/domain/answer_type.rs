// ============================================================
// Layer 3 — Answer Types and Category Index
// ============================================================
// AnswerType is the stratification key of the evaluation report.
// CategoryIndex maps arbitrary category tokens onto dense ids so
// the contrastive loss can build its same-label mask.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The three answer categories the evaluator reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnswerType {
    #[serde(rename = "yes/no")]
    YesNo,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "other")]
    Other,
}

impl AnswerType {
    pub const ALL: [AnswerType; 3] = [AnswerType::YesNo, AnswerType::Number, AnswerType::Other];

    /// Parse the label used by the question-type mapping file.
    /// Returns None for anything outside the three categories.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "yes/no" => Some(Self::YesNo),
            "number" => Some(Self::Number),
            "other"  => Some(Self::Other),
            _        => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YesNo  => "yes/no",
            Self::Number => "number",
            Self::Other  => "other",
        }
    }
}

impl fmt::Display for AnswerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bijective category → dense index table, numbered in first-seen order.
#[derive(Debug, Clone)]
pub struct CategoryIndex<K: Ord + Clone> {
    ids: BTreeMap<K, usize>,
}

impl<K: Ord + Clone> CategoryIndex<K> {
    pub fn build<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut ids = BTreeMap::new();
        for item in items {
            let next = ids.len();
            ids.entry(item.clone()).or_insert(next);
        }
        Self { ids }
    }

    pub fn get(&self, key: &K) -> Option<usize> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dense ids for `items`, in order. None if any item is not in
    /// the index.
    pub fn encode<'a, I>(&self, items: I) -> Option<Vec<usize>>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        items.into_iter().map(|item| self.get(item)).collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_types() {
        assert_eq!(AnswerType::parse("yes/no"), Some(AnswerType::YesNo));
        assert_eq!(AnswerType::parse("number"), Some(AnswerType::Number));
        assert_eq!(AnswerType::parse("other"),  Some(AnswerType::Other));
        assert_eq!(AnswerType::parse("color"),  None);
    }

    #[test]
    fn test_category_index_first_seen_order() {
        let labels = vec!["what color", "is there", "what color", "how many"];
        let index  = CategoryIndex::build(labels.iter());
        assert_eq!(index.len(), 3);
        assert_eq!(index.encode(labels.iter()), Some(vec![0, 1, 0, 2]));
    }

    #[test]
    fn test_category_index_rejects_unseen_items() {
        let index = CategoryIndex::build(["is there", "how many"].iter());
        assert_eq!(index.encode(["how many", "what color", "is there"].iter()), None);
        assert_eq!(index.encode(["how many", "is there"].iter()), Some(vec![1, 0]));
    }

    #[test]
    fn test_category_index_empty() {
        let labels: Vec<String> = Vec::new();
        let index = CategoryIndex::build(labels.iter());
        assert!(index.is_empty());
    }
}
