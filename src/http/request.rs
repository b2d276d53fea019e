//! HTTP request types

use serde::{Deserialize, Serialize};

/// A materialized, wire-ready HTTP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method
    pub method: String,

    /// Request URL
    pub url: String,

    /// Request headers, in template order
    pub headers: Vec<(String, String)>,

    /// Request body
    pub body: Vec<u8>,

    /// Generator index this request was materialized from
    pub position: u64,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            url: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            position: 0,
        }
    }
}

impl Request {
    /// Create a new request
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Get a specific header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Host (with port, if any) the request is addressed to
    pub fn host(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(parsed) => match (parsed.host_str(), parsed.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                _ => String::new(),
            },
            Err(_) => String::new(),
        }
    }

    /// Get body as string
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Render the request the way it would appear on the wire
    pub fn dump(&self) -> String {
        let path = url::Url::parse(&self.url)
            .map(|u| {
                let mut path = u.path().to_string();
                if let Some(query) = u.query() {
                    path.push('?');
                    path.push_str(query);
                }
                path
            })
            .unwrap_or_else(|_| self.url.clone());

        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, path);
        if self.header("Host").is_none() {
            out.push_str(&format!("Host: {}\r\n", self.host()));
        }
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body_text());
        out
    }
}

/// Builder for constructing requests
#[derive(Debug, Default)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Set the request method
    pub fn method(mut self, method: &str) -> Self {
        self.request.method = method.to_uppercase();
        self
    }

    /// Set the request URL
    pub fn url(mut self, url: &str) -> Self {
        self.request.url = url.to_string();
        self
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.request.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Set the request body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = body.into();
        self
    }

    /// Set the generator position
    pub fn position(mut self, position: u64) -> Self {
        self.request.position = position;
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}
