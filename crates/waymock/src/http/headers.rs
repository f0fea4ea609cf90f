//! Case-insensitive header multimap.
//!
//! Header names are stored lowercased so lookups and comparisons never depend
//! on the casing a client happened to send. Values keep their original form.

use serde::{Deserialize, Serialize};

/// An ordered multimap of HTTP headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HttpHeaders {
    entries: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_lowercase(), value.into()));
    }

    /// Replace all values for a name with a single value.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().to_lowercase();
        self.entries.retain(|(existing, _)| *existing != name);
        self.entries.push((name, value.into()));
    }

    /// First value for a name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, value)| value.as_str())
    }

    /// All values for a name, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .filter(|(existing, _)| *existing == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// True when every pair of `declared` is present here, as a multiset:
    /// a pair declared twice must also appear at least twice. Extra pairs on
    /// this side are ignored.
    pub fn contains_all(&self, declared: &HttpHeaders) -> bool {
        declared
            .entries
            .iter()
            .all(|pair| self.pair_count(pair) >= declared.pair_count(pair))
    }

    /// True when both multimaps hold exactly the same pairs, in any order.
    pub fn matches_exactly(&self, declared: &HttpHeaders) -> bool {
        self.entries.len() == declared.entries.len() && self.contains_all(declared)
    }

    fn pair_count(&self, pair: &(String, String)) -> usize {
        self.entries.iter().filter(|entry| *entry == pair).count()
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = HttpHeaders::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let mut headers = HttpHeaders::new();
        headers.append("X-Api-Key", "secret");

        assert_eq!(headers.get("x-api-key"), Some("secret"));
        assert_eq!(headers.get("X-API-KEY"), Some("secret"));
        assert_eq!(headers.get("other"), None);
    }

    #[test]
    fn test_append_keeps_multiple_values() {
        let mut headers = HttpHeaders::new();
        headers.append("accept", "text/html");
        headers.append("Accept", "application/json");

        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(
            headers.get_all("accept"),
            vec!["text/html", "application/json"]
        );
    }

    #[test]
    fn test_set_replaces_existing_values() {
        let mut headers = HttpHeaders::new();
        headers.append("accept", "text/html");
        headers.append("accept", "application/json");
        headers.set("accept", "*/*");

        assert_eq!(headers.get_all("accept"), vec!["*/*"]);
    }

    #[test]
    fn test_contains_all_ignores_extra_pairs() {
        let request: HttpHeaders = [("content-type", "application/json"), ("accept", "*/*")]
            .into_iter()
            .collect();
        let declared: HttpHeaders = [("Content-Type", "application/json")].into_iter().collect();

        assert!(request.contains_all(&declared));
        assert!(!declared.contains_all(&request));
    }

    #[test]
    fn test_matches_exactly_rejects_extra_pairs() {
        let declared: HttpHeaders = [("a", "1")].into_iter().collect();
        let exact: HttpHeaders = [("A", "1")].into_iter().collect();
        let extra: HttpHeaders = [("a", "1"), ("b", "2")].into_iter().collect();

        assert!(exact.matches_exactly(&declared));
        assert!(!extra.matches_exactly(&declared));
    }
}
