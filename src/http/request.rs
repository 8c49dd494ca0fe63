//! Parsed HTTP/1.x request: a plain data carrier, populated by
//! [`super::parser::HttpParser`] and read by route handlers.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    method: String,
    url: String,
    path: String,
    query: String,
    version: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    pub fn clear(&mut self) {
        self.method.clear();
        self.url.clear();
        self.path.clear();
        self.query.clear();
        self.version.clear();
        self.headers.clear();
        self.body.clear();
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Stores `url` verbatim and splits it on the first `?` into
    /// `path`/`query`.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
        match self.url.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query = query.to_string();
            }
            None => {
                self.path = self.url.clone();
                self.query.clear();
            }
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// Returns `""` for a missing header, per spec.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_url_splits_path_and_query() {
        let mut req = HttpRequest::default();
        req.set_url("/search?q=rust&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query(), "q=rust&page=2");
    }

    #[test]
    fn set_url_without_query_leaves_query_empty() {
        let mut req = HttpRequest::default();
        req.set_url("/health");
        assert_eq!(req.path(), "/health");
        assert_eq!(req.query(), "");
    }

    #[test]
    fn missing_header_returns_empty_string() {
        let req = HttpRequest::default();
        assert_eq!(req.header("X-Missing"), "");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = HttpRequest::default();
        req.set_header("Content-Type", "text/plain");
        assert_eq!(req.header("content-type"), "text/plain");
    }

    #[test]
    fn clear_resets_every_field() {
        let mut req = HttpRequest::default();
        req.set_method("POST");
        req.set_url("/x?y=1");
        req.set_header("A", "B");
        req.set_body(vec![1, 2, 3]);
        req.clear();
        assert_eq!(req.method(), "");
        assert_eq!(req.url(), "");
        assert_eq!(req.path(), "");
        assert!(req.headers().is_empty());
        assert!(req.body().is_empty());
    }
}
