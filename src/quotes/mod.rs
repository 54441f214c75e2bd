//! Quote storage
//!
//! The protected resource: a list of quotes loaded from a YAML file
//! at startup and read-only afterwards. Entries are sanitized at load
//! because quote text doubles as challenge data on the pipe-delimited
//! wire line.

use parking_lot::RwLock;
use rand::Rng;
use serde::Deserialize;
use std::path::Path;

/// Built-in list used when no quotes file is configured
const DEFAULT_QUOTES: &[&str] = &[
    "The only way to do great work is to love what you do. - Steve Jobs",
    "Stay hungry, stay foolish. - Steve Jobs",
    "Code is like humor. When you have to explain it, it's bad. - Cory House",
    "First, solve the problem. Then, write the code. - John Johnson",
    "Experience is the name everyone gives to their mistakes. - Oscar Wilde",
    "Programming isn't about what you know; it's about what you can figure out. - Chris Pine",
    "The only way to learn a new programming language is by writing programs in it. - Dennis Ritchie",
    "Talk is cheap. Show me the code. - Linus Torvalds",
    "Programming is the art of telling another human what one wants the computer to do. - Donald Knuth",
    "Clean code always looks like it was written by someone who cares. - Robert C. Martin",
];

/// Errors from loading the quote list
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("failed to read quotes file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse quotes file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("quotes list is empty")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct QuotesFile {
    quotes: Vec<String>,
}

/// Read-only quote provider
pub struct QuoteStore {
    quotes: RwLock<Vec<String>>,
}

impl QuoteStore {
    /// Store backed by the built-in list
    pub fn with_defaults() -> Self {
        Self {
            quotes: RwLock::new(DEFAULT_QUOTES.iter().map(|q| sanitize(q)).collect()),
        }
    }

    /// Load a store from a YAML file with a top-level `quotes` list
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QuoteError> {
        let raw = std::fs::read_to_string(path)?;
        let file: QuotesFile = serde_yaml::from_str(&raw)?;
        Self::from_list(file.quotes)
    }

    /// Build a store from an in-memory list
    pub fn from_list(quotes: Vec<String>) -> Result<Self, QuoteError> {
        let quotes: Vec<String> = quotes
            .iter()
            .map(|q| sanitize(q))
            .filter(|q| !q.is_empty())
            .collect();

        if quotes.is_empty() {
            return Err(QuoteError::Empty);
        }
        Ok(Self {
            quotes: RwLock::new(quotes),
        })
    }

    /// Pick one quote at random
    pub fn random(&self) -> String {
        let quotes = self.quotes.read();
        let index = rand::thread_rng().gen_range(0..quotes.len());
        quotes[index].clone()
    }

    /// Number of quotes held
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

/// Strip characters that cannot travel on a challenge line
fn sanitize(quote: &str) -> String {
    quote
        .replace('|', "/")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let store = QuoteStore::with_defaults();
        assert!(!store.is_empty());

        let quote = store.random();
        assert!(!quote.is_empty());
        assert!(!quote.contains('|'));
    }

    #[test]
    fn test_from_list_sanitizes_entries() {
        let store = QuoteStore::from_list(vec![
            "pipes | are | reserved".to_string(),
            "line\nbreaks too".to_string(),
            "   ".to_string(),
        ])
        .unwrap();

        assert_eq!(store.len(), 2);
        for _ in 0..20 {
            let quote = store.random();
            assert!(!quote.contains('|'));
            assert!(!quote.contains('\n'));
        }
    }

    #[test]
    fn test_empty_list_is_an_error() {
        assert!(matches!(
            QuoteStore::from_list(vec![]),
            Err(QuoteError::Empty)
        ));
        assert!(matches!(
            QuoteStore::from_list(vec!["  ".to_string()]),
            Err(QuoteError::Empty)
        ));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("powgate_quotes_test.yml");
        std::fs::write(&path, "quotes:\n  - \"First quote\"\n  - \"Second quote\"\n").unwrap();

        let store = QuoteStore::from_file(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.random().ends_with("quote"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            QuoteStore::from_file("/nonexistent/powgate/quotes.yml"),
            Err(QuoteError::Io(_))
        ));
    }
}
