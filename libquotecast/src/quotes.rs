//! Quote collection loaded from a JSON file
//!
//! The file holds an array of objects:
//!
//! ```json
//! [
//!   { "text": "Simplicity is prerequisite for reliability.", "author": "Edsger W. Dijkstra" }
//! ]
//! ```

use std::path::Path;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{QuoteError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(alias = "Text")]
    pub text: String,
    #[serde(alias = "Author")]
    pub author: String,
}

impl Quote {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
        }
    }

    /// Text of the post: the quote, a newline, then `― author`
    pub fn format(&self) -> String {
        format!("{}\n\u{2015} {}", self.text, self.author)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    quotes: Vec<Quote>,
}

impl QuoteBook {
    pub fn new(quotes: Vec<Quote>) -> Self {
        Self { quotes }
    }

    /// Load quotes from a JSON file; `~` in the path is expanded
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();

        let content = std::fs::read_to_string(&expanded).map_err(QuoteError::Read)?;
        let quotes: Vec<Quote> = serde_json::from_str(&content).map_err(QuoteError::Parse)?;

        tracing::info!("Loaded {} quotes from {}", quotes.len(), expanded);
        Ok(Self::new(quotes))
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Pick a quote uniformly at random
    pub fn pick_random(&self) -> Result<&Quote> {
        Ok(self
            .quotes
            .choose(&mut rand::thread_rng())
            .ok_or(QuoteError::Empty)?)
    }
}
