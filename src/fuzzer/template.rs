//! Request templates and materialization of position tuples into requests

use serde::{Deserialize, Serialize};

use super::generator::PositionTuple;
use super::payloads::{Binding, InputProvider};
use crate::http::Request;

/// Generic placeholder character used in sniper mode
pub const MARKER: char = '§';

/// Request with placeholders in any of its parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            url: String::new(),
            headers: Vec::new(),
            body: String::new(),
        }
    }
}

impl RequestTemplate {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    /// Template parts in composition order: method, URL, header names and
    /// values, body
    fn parts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.method.as_str())
            .chain(std::iter::once(self.url.as_str()))
            .chain(
                self.headers
                    .iter()
                    .flat_map(|(name, value)| [name.as_str(), value.as_str()]),
            )
            .chain(std::iter::once(self.body.as_str()))
    }

    /// Whether the placeholder appears anywhere in the composed template
    pub fn contains(&self, placeholder: &str) -> bool {
        !placeholder.is_empty() && self.parts().any(|part| part.contains(placeholder))
    }

    /// Number of occurrences of a marker character across all parts
    pub fn marker_count(&self, marker: char) -> usize {
        self.parts().map(|part| part.matches(marker).count()).sum()
    }

    /// Whether the URL ends with the placeholder
    pub fn url_ends_with(&self, placeholder: &str) -> bool {
        !placeholder.is_empty() && self.url.ends_with(placeholder)
    }

    /// `scheme://authority` prefix of the URL, as written
    pub fn authority(&self) -> &str {
        let Some(scheme_end) = self.url.find("://") else {
            return "";
        };
        let rest = &self.url[scheme_end + 3..];
        let end = rest.find(['/', '?', '#']).map(|i| scheme_end + 3 + i);
        &self.url[..end.unwrap_or(self.url.len())]
    }

    /// Copy with a new URL
    pub fn with_url(&self, url: String) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }
}

/// Bind a tuple's values into the template.
///
/// Keywords are replaced wherever they appear. In marker mode only the
/// active occurrence receives the value and every other occurrence becomes
/// empty. Header names are canonicalized unless they carry a placeholder.
pub fn materialize(
    template: &RequestTemplate,
    providers: &[InputProvider],
    tuple: &PositionTuple,
) -> Request {
    let mut subst = Substitution::new(providers, tuple);

    let method = subst.apply(&template.method);
    let url = subst.apply(&template.url);

    let mut headers = Vec::with_capacity(template.headers.len());
    for (name, value) in &template.headers {
        let name = if subst.has_placeholder(name) {
            subst.apply(name)
        } else {
            canonical_header_key(name)
        };
        let value = subst.apply(value);
        headers.push((name, value));
    }

    let body = subst.apply(&template.body);

    Request {
        method,
        url,
        headers,
        body: body.into_bytes(),
        position: tuple.index,
    }
}

/// Single left-to-right substitution pass. Replaced text is never rescanned,
/// and the longest keyword wins where keywords share a prefix.
struct Substitution<'a> {
    keywords: Vec<(&'a str, &'a str)>,
    marker: Option<MarkerFill<'a>>,
}

struct MarkerFill<'a> {
    marker: char,
    active: usize,
    value: &'a str,
    seen: usize,
}

impl<'a> Substitution<'a> {
    fn new(providers: &'a [InputProvider], tuple: &'a PositionTuple) -> Self {
        let mut keywords = Vec::new();
        let mut marker = None;

        for (provider, value) in providers.iter().zip(&tuple.values) {
            match &provider.binding {
                Binding::Keyword(keyword) if !keyword.is_empty() => {
                    keywords.push((keyword.as_str(), value.as_str()));
                }
                Binding::Keyword(_) => {}
                Binding::Marker(ch) => {
                    marker = Some(MarkerFill {
                        marker: *ch,
                        active: tuple.active_marker.unwrap_or(usize::MAX),
                        value: value.as_str(),
                        seen: 0,
                    });
                }
            }
        }
        keywords.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self { keywords, marker }
    }

    fn has_placeholder(&self, text: &str) -> bool {
        self.keywords.iter().any(|(keyword, _)| text.contains(keyword))
            || self.marker.as_ref().is_some_and(|m| text.contains(m.marker))
    }

    fn apply(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut i = 0;

        'scan: while i < text.len() {
            let rest = &text[i..];

            if let Some(fill) = self.marker.as_mut() {
                if rest.starts_with(fill.marker) {
                    if fill.seen == fill.active {
                        out.push_str(fill.value);
                    }
                    fill.seen += 1;
                    i += fill.marker.len_utf8();
                    continue;
                }
            }

            for (keyword, value) in &self.keywords {
                if rest.starts_with(keyword) {
                    out.push_str(value);
                    i += keyword.len();
                    continue 'scan;
                }
            }

            match rest.chars().next() {
                Some(ch) => {
                    out.push(ch);
                    i += ch.len_utf8();
                }
                None => break,
            }
        }

        out
    }
}

/// Canonical MIME header key: first letter and each letter following a
/// hyphen upper case, the rest lower case. Names with characters that are
/// not valid in a header token are returned unchanged.
pub fn canonical_header_key(name: &str) -> String {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid {
        return name.to_string();
    }

    let mut upper = true;
    name.chars()
        .map(|ch| {
            let mapped = if upper {
                ch.to_ascii_uppercase()
            } else {
                ch.to_ascii_lowercase()
            };
            upper = ch == '-';
            mapped
        })
        .collect()
}
