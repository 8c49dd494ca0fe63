//! `(method, path)` dispatch with exact routes, prefix fallbacks, and
//! auto-generated 404 / 405 responses.

use std::collections::{HashMap, HashSet};

use super::request::HttpRequest;
use super::response::HttpResponse;

pub type Handler = Box<dyn Fn(&HttpRequest, &mut HttpResponse) + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchResult {
    Matched,
    MethodNotAllowed,
    NotFound,
}

#[derive(Default)]
pub struct Router {
    exact: HashMap<(String, String), Handler>,
    methods_by_path: HashMap<String, HashSet<String>>,
    prefixes: Vec<(String, Handler)>,
    not_found: Option<Handler>,
    method_not_allowed: Option<Handler>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    pub fn add(&mut self, method: impl Into<String>, path: impl Into<String>, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        let method = method.into();
        let path = path.into();
        self.methods_by_path
            .entry(path.clone())
            .or_default()
            .insert(method.clone());
        self.exact.insert((method, path), Box::new(handler));
    }

    pub fn get(&mut self, path: impl Into<String>, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        self.add("GET", path, handler);
    }

    pub fn post(&mut self, path: impl Into<String>, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        self.add("POST", path, handler);
    }

    pub fn put(&mut self, path: impl Into<String>, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        self.add("PUT", path, handler);
    }

    pub fn delete(&mut self, path: impl Into<String>, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        self.add("DELETE", path, handler);
    }

    /// Registration order determines dispatch order: put specific prefixes
    /// (`/static/`) before general ones (`/`).
    pub fn add_prefix(&mut self, prefix: impl Into<String>, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        self.prefixes.push((prefix.into(), Box::new(handler)));
    }

    pub fn set_not_found(&mut self, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        self.not_found = Some(Box::new(handler));
    }

    pub fn set_method_not_allowed(&mut self, handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static) {
        self.method_not_allowed = Some(Box::new(handler));
    }

    pub fn dispatch(&self, request: &HttpRequest, response: &mut HttpResponse) -> DispatchResult {
        let key = (request.method().to_string(), request.path().to_string());
        if let Some(handler) = self.exact.get(&key) {
            handler(request, response);
            return DispatchResult::Matched;
        }

        if let Some(methods) = self.methods_by_path.get(request.path()) {
            match self.method_not_allowed.as_ref() {
                Some(handler) => handler(request, response),
                None => default_method_not_allowed(methods, response),
            }
            return DispatchResult::MethodNotAllowed;
        }

        for (prefix, handler) in &self.prefixes {
            if request.path().starts_with(prefix.as_str()) {
                handler(request, response);
                return DispatchResult::Matched;
            }
        }

        match self.not_found.as_ref() {
            Some(handler) => handler(request, response),
            None => default_not_found(response),
        }
        DispatchResult::NotFound
    }
}

pub fn default_not_found(response: &mut HttpResponse) {
    response.set_status(404, "Not Found");
    response.set_header("Content-Type", "text/plain");
    response.set_body(b"Not Found".to_vec());
    response.set_close(true);
}

fn default_method_not_allowed(methods: &HashSet<String>, response: &mut HttpResponse) {
    response.set_status(405, "Method Not Allowed");
    response.set_header("Content-Type", "text/plain");
    response.set_body(b"Method Not Allowed".to_vec());
    let mut methods: Vec<&str> = methods.iter().map(String::as_str).collect();
    methods.sort_unstable();
    response.set_header("Allow", methods.join(", "));
    response.set_close(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_route_matches() {
        let mut router = Router::new();
        router.get("/x", |_, resp| resp.set_status(200, "OK"));
        let req = make_req("GET", "/x");
        let mut resp = HttpResponse::new();
        assert_eq!(router.dispatch(&req, &mut resp), DispatchResult::Matched);
        assert_eq!(resp.status(), 200);
    }

    #[test]
    fn method_not_allowed_lists_allow_header() {
        let mut router = Router::new();
        router.get("/x", |_, _| {});
        let req = make_req("POST", "/x");
        let mut resp = HttpResponse::new();
        assert_eq!(router.dispatch(&req, &mut resp), DispatchResult::MethodNotAllowed);
        assert_eq!(resp.status(), 405);
        assert_eq!(resp.header("Allow"), Some("GET"));
    }

    #[test]
    fn prefix_fallback_dispatches_in_registration_order() {
        let mut router = Router::new();
        router.add_prefix("/static/", |_, resp| resp.set_status(201, "static"));
        router.add_prefix("/", |_, resp| resp.set_status(202, "root"));

        let mut resp = HttpResponse::new();
        router.dispatch(&make_req("GET", "/static/a.css"), &mut resp);
        assert_eq!(resp.status(), 201);

        let mut resp = HttpResponse::new();
        router.dispatch(&make_req("GET", "/other"), &mut resp);
        assert_eq!(resp.status(), 202);
    }

    #[test]
    fn unmatched_route_gets_default_404() {
        let router = Router::new();
        let req = make_req("GET", "/nope");
        let mut resp = HttpResponse::new();
        assert_eq!(router.dispatch(&req, &mut resp), DispatchResult::NotFound);
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.body(), b"Not Found");
    }

    fn make_req(method: &str, path: &str) -> HttpRequest {
        let mut req = HttpRequest::default();
        req.set_method(method);
        req.set_url(path);
        req
    }
}
