// Core library for Replica
// Request/response types, response writers, and the filter pipeline that
// caching and other cross-cutting stages plug into

pub mod attributes;
pub mod error;
pub mod headers;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod response;

// Re-export commonly used types
pub use attributes::Attributes;
pub use error::*;
pub use headers::{Header, HeaderMap};
pub use crate::http::*;
pub use pipeline::{Filter, FilterChain, FnHandler, Handler, Pipeline, handler_fn};
pub use response::{BodySink, ResponseWriter, StreamingResponse};
