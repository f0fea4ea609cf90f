//! URL search-param multimap and query-string parsing.

use serde::{Deserialize, Serialize};

/// An ordered multimap of URL search params. Names are case-sensitive,
/// unlike [`HttpHeaders`](super::HttpHeaders).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchParams {
    entries: Vec<(String, String)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (without the leading `?`), URL-decoding both
    /// keys and values. Pairs without `=` become empty-valued entries.
    pub fn parse(query: &str) -> Self {
        let mut params = SearchParams::new();
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                params.append(
                    urlencoding::decode(key).unwrap_or_default().to_string(),
                    urlencoding::decode(value).unwrap_or_default().to_string(),
                );
            } else if !pair.is_empty() {
                params.append(
                    urlencoding::decode(pair).unwrap_or_default().to_string(),
                    String::new(),
                );
            }
        }
        params
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for a name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Multiset containment: every declared pair must be present here at
    /// least as many times as it was declared.
    pub fn contains_all(&self, declared: &SearchParams) -> bool {
        declared
            .entries
            .iter()
            .all(|pair| self.pair_count(pair) >= declared.pair_count(pair))
    }

    /// True when both multimaps hold exactly the same pairs, in any order.
    pub fn matches_exactly(&self, declared: &SearchParams) -> bool {
        self.entries.len() == declared.entries.len() && self.contains_all(declared)
    }

    fn pair_count(&self, pair: &(String, String)) -> usize {
        self.entries.iter().filter(|entry| *entry == pair).count()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut params = SearchParams::new();
        for (name, value) in iter {
            params.append(name, value);
        }
        params
    }
}
