//! HTTP response types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP response with the measurements the decision rules work on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code
    pub status: u16,

    /// Response headers
    pub headers: HashMap<String, String>,

    /// Response body
    pub body: Vec<u8>,

    /// Response time in milliseconds
    pub duration_ms: u64,

    /// Size of the response body in bytes
    pub content_length: usize,

    /// Whitespace separated words in the body
    pub words: usize,

    /// Lines in the body
    pub lines: usize,

    /// Generator index of the originating request
    pub position: u64,
}

impl Response {
    /// Build a response, deriving size, word and line counts from the body
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>, duration_ms: u64) -> Self {
        let (words, lines) = count_words_lines(&body);
        Self {
            status,
            headers,
            content_length: body.len(),
            body,
            duration_ms,
            words,
            lines,
            position: 0,
        }
    }

    /// Tag the response with the generator index that produced it
    pub fn with_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response is redirect (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Get body as string
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Get a specific header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Redirect target, if any
    pub fn redirect_location(&self) -> Option<&str> {
        self.header("location")
    }

    /// Headers and body as one searchable text, headers sorted by name
    pub fn searchable_text(&self) -> String {
        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort();

        let mut text = String::new();
        for name in names {
            text.push_str(name);
            text.push_str(": ");
            text.push_str(&self.headers[name]);
            text.push('\n');
        }
        text.push('\n');
        text.push_str(&self.body_text());
        text
    }
}

fn count_words_lines(body: &[u8]) -> (usize, usize) {
    if body.is_empty() {
        return (0, 0);
    }
    let text = String::from_utf8_lossy(body);
    (text.split_whitespace().count(), text.lines().count())
}

impl Default for Response {
    fn default() -> Self {
        Self::new(0, HashMap::new(), Vec::new(), 0)
    }
}
