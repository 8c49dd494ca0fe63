//! HTTP/1.x response model and wire serializer.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    version: String,
    status: u16,
    reason: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    close: bool,
}

impl Default for HttpResponse {
    fn default() -> HttpResponse {
        HttpResponse {
            version: "HTTP/1.1".to_string(),
            status: 200,
            reason: "OK".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            close: false,
        }
    }
}

impl HttpResponse {
    pub fn new() -> HttpResponse {
        HttpResponse::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16, reason: impl Into<String>) {
        self.status = status;
        self.reason = reason.into();
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn close(&self) -> bool {
        self.close
    }

    pub fn set_close(&mut self, close: bool) {
        self.close = close;
    }

    /// Inserts `Content-Length` from the current body length if the caller
    /// hasn't already set one.
    pub fn ensure_content_length(&mut self) {
        if self.header("Content-Length").is_none() {
            self.set_header("Content-Length", self.body.len().to_string());
        }
    }

    /// Renders the status line, headers (order unspecified), a blank line,
    /// then the body, exactly as spec.md §6 prescribes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(format!("{} {} {}\r\n", self.version, self.status, self.reason).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_response_is_200_ok_http11() {
        let resp = HttpResponse::new();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.reason(), "OK");
        assert!(!resp.close());
        assert!(resp.body().is_empty());
    }

    #[test]
    fn ensure_content_length_only_fills_when_absent() {
        let mut resp = HttpResponse::new();
        resp.set_body(b"hello".to_vec());
        resp.ensure_content_length();
        assert_eq!(resp.header("Content-Length"), Some("5"));

        resp.set_header("Content-Length", "999");
        resp.ensure_content_length();
        assert_eq!(resp.header("Content-Length"), Some("999"));
    }

    #[test]
    fn serialize_matches_wire_format() {
        let mut resp = HttpResponse::new();
        resp.set_body(b"hi".to_vec());
        resp.set_header("Content-Length", "2");
        let out = resp.serialize();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }
}
