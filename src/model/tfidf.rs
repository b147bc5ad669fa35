//! TF-IDF text vectorizer

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("static token pattern"))
}

/// Lowercased tokens of two or more word characters
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Fitted vocabulary with smoothed inverse document frequencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    /// Terms in feature order (alphabetical)
    pub vocabulary: Vec<String>,
    pub idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Fit on a corpus, keeping at most `max_features` terms ranked by corpus
    /// frequency. Ties go to the alphabetically smaller term.
    pub fn fit<'a, I>(documents: I, max_features: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut term_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();
        let mut n_docs = 0usize;

        for document in documents {
            n_docs += 1;
            let tokens = tokenize(document);
            let unique: BTreeSet<&String> = tokens.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            for term in tokens {
                *term_counts.entry(term).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_features);

        let mut vocabulary: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        vocabulary.sort();

        let n = n_docs as f64;
        let idf = vocabulary
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        Self { vocabulary, idf }
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// L2-normalized tf-idf weights of one document
    pub fn transform(&self, document: &str) -> Vec<f64> {
        let mut weights = vec![0.0; self.vocabulary.len()];
        for token in tokenize(document) {
            if let Ok(index) = self.vocabulary.binary_search(&token) {
                weights[index] += 1.0;
            }
        }
        for (weight, idf) in weights.iter_mut().zip(&self.idf) {
            *weight *= idf;
        }

        let norm = weights.iter().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for weight in &mut weights {
                *weight /= norm;
            }
        }
        weights
    }
}
