//! Value encoders applied to raw input before substitution

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A named value transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    /// Percent encoding of everything outside the RFC 3986 unreserved set
    UrlEncode,
    /// Percent encoding applied twice
    DoubleUrlEncode,
    /// Standard base64
    Base64,
    /// Named HTML entities for markup characters, hex entities for other symbols
    HtmlEntity,
    /// Decimal HTML entities for every non-alphanumeric character
    HtmlDecimal,
    /// Lowercase hex of every byte
    Hex,
    /// `\uXXXX` for non-alphanumeric characters
    JsUnicode,
    /// `\xXX` for non-alphanumeric bytes
    JsHex,
    /// `\uXXXX` for every character
    Unicode,
}

impl Encoder {
    /// Get all encoders
    pub fn all() -> &'static [Encoder] {
        &[
            Encoder::UrlEncode,
            Encoder::DoubleUrlEncode,
            Encoder::Base64,
            Encoder::HtmlEntity,
            Encoder::HtmlDecimal,
            Encoder::Hex,
            Encoder::JsUnicode,
            Encoder::JsHex,
            Encoder::Unicode,
        ]
    }

    /// Configuration name
    pub fn name(&self) -> &'static str {
        match self {
            Encoder::UrlEncode => "urlencode",
            Encoder::DoubleUrlEncode => "doubleurlencode",
            Encoder::Base64 => "b64encode",
            Encoder::HtmlEntity => "htmlencode",
            Encoder::HtmlDecimal => "htmldecimal",
            Encoder::Hex => "hexencode",
            Encoder::JsUnicode => "jsunicode",
            Encoder::JsHex => "jshex",
            Encoder::Unicode => "unicode",
        }
    }

    /// Encode a value
    pub fn encode(&self, input: &str) -> String {
        match self {
            Encoder::UrlEncode => url_encode(input),
            Encoder::DoubleUrlEncode => url_encode(&url_encode(input)),
            Encoder::Base64 => base64_encode(input),
            Encoder::HtmlEntity => html_entity_encode(input),
            Encoder::HtmlDecimal => html_decimal_encode(input),
            Encoder::Hex => hex_encode(input),
            Encoder::JsUnicode => js_unicode_encode(input),
            Encoder::JsHex => js_hex_encode(input),
            Encoder::Unicode => unicode_encode(input),
        }
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Encoder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoder::all()
            .iter()
            .copied()
            .find(|e| e.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownEncoder(s.trim().to_string()))
    }
}

/// Encoders applied left to right; empty chain is the identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderChain {
    encoders: Vec<Encoder>,
}

impl EncoderChain {
    pub fn new(encoders: Vec<Encoder>) -> Self {
        Self { encoders }
    }

    pub fn is_identity(&self) -> bool {
        self.encoders.is_empty()
    }

    pub fn encoders(&self) -> &[Encoder] {
        &self.encoders
    }

    pub fn apply(&self, raw: &str) -> String {
        self.encoders
            .iter()
            .fold(raw.to_string(), |value, encoder| encoder.encode(&value))
    }
}

impl FromStr for EncoderChain {
    type Err = ConfigError;

    /// Parse a space separated chain such as `"urlencode b64encode"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoders = s
            .split_whitespace()
            .map(Encoder::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { encoders })
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set
pub fn url_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

/// Base64 encode a string
pub fn base64_encode(input: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(input.as_bytes())
}

pub fn html_entity_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 6);
    for ch in input.chars() {
        match ch {
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '&' => encoded.push_str("&amp;"),
            '"' => encoded.push_str("&quot;"),
            '\'' => encoded.push_str("&#x27;"),
            _ if !ch.is_alphanumeric() && !ch.is_whitespace() => {
                encoded.push_str(&format!("&#x{:X};", ch as u32));
            }
            _ => encoded.push(ch),
        }
    }
    encoded
}

pub fn html_decimal_encode(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                ch.to_string()
            } else {
                format!("&#{};", ch as u32)
            }
        })
        .collect()
}

pub fn hex_encode(input: &str) -> String {
    input.bytes().map(|b| format!("{:02x}", b)).collect()
}

pub fn js_unicode_encode(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_string()
            } else {
                format!("\\u{:04X}", ch as u32)
            }
        })
        .collect()
}

pub fn js_hex_encode(input: &str) -> String {
    input
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() {
                (b as char).to_string()
            } else {
                format!("\\x{:02X}", b)
            }
        })
        .collect()
}

pub fn unicode_encode(input: &str) -> String {
    input.chars().map(|ch| format!("\\u{:04X}", ch as u32)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("test"), "test");
        assert_eq!(url_encode("<script>"), "%3Cscript%3E");
        assert_eq!(url_encode("a b"), "a%20b");
        assert_eq!(Encoder::DoubleUrlEncode.encode("<"), "%253C");
    }

    #[test]
    fn test_single_encoders() {
        assert_eq!(Encoder::Base64.encode("test"), "dGVzdA==");
        assert_eq!(Encoder::HtmlEntity.encode("<a&b>"), "&lt;a&amp;b&gt;");
        assert_eq!(Encoder::Hex.encode("AZ"), "415a");
        assert_eq!(Encoder::JsUnicode.encode("a<"), "a\\u003C");
        assert_eq!(Encoder::JsHex.encode("a<"), "a\\x3C");
    }

    #[test]
    fn test_chain_applies_left_to_right() {
        let chain: EncoderChain = "urlencode b64encode".parse().unwrap();
        assert_eq!(chain.encoders(), &[Encoder::UrlEncode, Encoder::Base64]);
        // "a b" -> "a%20b" -> base64
        assert_eq!(chain.apply("a b"), base64_encode("a%20b"));
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain: EncoderChain = "".parse().unwrap();
        assert!(chain.is_identity());
        assert_eq!(chain.apply("<x>"), "<x>");
    }

    #[test]
    fn test_unknown_encoder() {
        let err = "urlencode rot13".parse::<EncoderChain>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownEncoder("rot13".into()));
    }
}
