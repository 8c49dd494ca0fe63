//! HTTP/1.x layer built on top of the reactor core: request/response
//! models, a streaming parser, a method+path router, and a `TcpServer`
//! adapter that wires them together.

mod parser;
mod request;
mod response;
mod router;
mod server;

pub use parser::HttpParser;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use router::{DispatchResult, Handler, Router};
pub use server::HttpServer;
