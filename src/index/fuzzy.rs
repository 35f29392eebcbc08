//! Typo-tolerant name matching via trigram similarity.
//!
//! Names are normalized (Unicode lowercase, Latin accents folded,
//! non-alphanumerics collapsed to spaces), each word is padded, and the
//! resulting trigram sets are compared with Jaccard similarity. The default
//! acceptance threshold is a store-wide setting; callers may override it
//! per query.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::types::PlaceId;

/// Fold common Latin diacritics to their base letter. Characters outside
/// the table pass through unchanged.
fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'æ' => 'a',
        'œ' => 'o',
        'ß' => 's',
        other => other,
    }
}

/// Normalize a name for trigram extraction.
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the padded trigram set of a normalized name. Each word gets a
/// two-space prefix and one-space suffix so word starts weigh more than
/// word interiors.
pub fn trigrams(normalized: &str) -> HashSet<[char; 3]> {
    let mut set = HashSet::new();
    for word in normalized.split_whitespace() {
        let padded: Vec<char> = std::iter::repeat_n(' ', 2)
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }
    set
}

/// Jaccard similarity of two trigram sets.
pub fn similarity(a: &HashSet<[char; 3]>, b: &HashSet<[char; 3]>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Similarity structure over normalized place names.
#[derive(Debug, Default)]
pub struct FuzzyNameIndex {
    names: RwLock<HashMap<PlaceId, HashSet<[char; 3]>>>,
}

impl FuzzyNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a place's name.
    pub fn upsert(&self, id: PlaceId, name: &str) {
        let grams = trigrams(&normalize_name(name));
        self.names.write().insert(id, grams);
    }

    /// Remove a place. Returns `false` if the id was not indexed.
    pub fn remove(&self, id: &PlaceId) -> bool {
        self.names.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All places whose name similarity meets `threshold`, ordered by
    /// descending similarity, ties by ascending id.
    pub fn fuzzy_match(&self, query: &str, threshold: f32) -> Vec<(PlaceId, f32)> {
        let query_grams = trigrams(&normalize_name(query));
        if query_grams.is_empty() {
            return Vec::new();
        }
        let names = self.names.read();
        let mut matches: Vec<(PlaceId, f32)> = names
            .iter()
            .filter_map(|(id, grams)| {
                let sim = similarity(&query_grams, grams);
                if sim >= threshold {
                    Some((id.clone(), sim))
                } else {
                    None
                }
            })
            .collect();
        matches.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        matches
    }
}
