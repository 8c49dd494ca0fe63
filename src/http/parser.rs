//! Streaming HTTP/1.x request parser, layered on `httparse` (which parses a
//! whole head in one shot) to present the incremental, resettable
//! `parse(bytes) -> (ok, consumed)` contract a keep-alive connection needs.

use super::request::HttpRequest;

const MAX_HEADERS: usize = 64;

enum State {
    /// Accumulating request-line + header bytes; `httparse` is re-run over
    /// the whole accumulation on every call until it reports completion.
    Head,
    /// Header parsing is done; `usize` counts remaining body bytes wanted.
    Body(usize),
}

pub struct HttpParser {
    state: State,
    head_buf: Vec<u8>,
    request: HttpRequest,
    complete: bool,
}

impl Default for HttpParser {
    fn default() -> HttpParser {
        HttpParser::new()
    }
}

impl HttpParser {
    pub fn new() -> HttpParser {
        HttpParser {
            state: State::Head,
            head_buf: Vec::new(),
            request: HttpRequest::default(),
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn take_request(&mut self) -> HttpRequest {
        std::mem::take(&mut self.request)
    }

    /// Clears all state so the instance can parse the next request on the
    /// same (keep-alive) connection.
    pub fn reset(&mut self) {
        self.state = State::Head;
        self.head_buf.clear();
        self.request.clear();
        self.complete = false;
    }

    /// Feeds `bytes`, returning `(ok, consumed)`. `ok == false` means the
    /// input is malformed and the caller should respond 400 and reset.
    /// `consumed < bytes.len()` is possible once the head is complete and
    /// `bytes` has unused tail (the caller keeps re-feeding the remainder,
    /// e.g. across pipelined requests).
    pub fn parse(&mut self, bytes: &[u8]) -> (bool, usize) {
        match self.state {
            State::Head => self.parse_head(bytes),
            State::Body(remaining) => self.parse_body(bytes, remaining),
        }
    }

    fn parse_head(&mut self, bytes: &[u8]) -> (bool, usize) {
        let old_len = self.head_buf.len();
        self.head_buf.extend_from_slice(bytes);

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut raw_headers);
        match req.parse(&self.head_buf) {
            Ok(httparse::Status::Partial) => (true, bytes.len()),
            Ok(httparse::Status::Complete(offset)) => {
                self.request.clear();
                self.request.set_method(req.method.unwrap_or(""));
                self.request.set_url(req.path.unwrap_or(""));
                self.request
                    .set_version(format!("HTTP/1.{}", req.version.unwrap_or(1)));
                for header in req.headers.iter() {
                    self.request
                        .set_header(header.name.to_string(), String::from_utf8_lossy(header.value).into_owned());
                }

                let content_length: usize = self
                    .request
                    .header("Content-Length")
                    .parse()
                    .unwrap_or(0);

                let header_bytes_from_this_call = offset.saturating_sub(old_len);
                let available_in_call = bytes.len() - header_bytes_from_this_call;
                let take = available_in_call.min(content_length);
                if take > 0 {
                    let start = header_bytes_from_this_call;
                    self.request.body_mut().extend_from_slice(&bytes[start..start + take]);
                }
                let remaining = content_length - take;
                let consumed = header_bytes_from_this_call + take;

                if remaining == 0 {
                    self.complete = true;
                    self.state = State::Body(0);
                } else {
                    self.state = State::Body(remaining);
                }
                self.head_buf.clear();
                (true, consumed)
            }
            Err(_) => (false, 0),
        }
    }

    fn parse_body(&mut self, bytes: &[u8], remaining: usize) -> (bool, usize) {
        let take = bytes.len().min(remaining);
        self.request.body_mut().extend_from_slice(&bytes[..take]);
        let remaining = remaining - take;
        if remaining == 0 {
            self.complete = true;
        }
        self.state = State::Body(remaining);
        (true, take)
    }
}
