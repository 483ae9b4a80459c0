//! # Observability Module
//!
//! - **Structured Logging**: pretty or JSON output via `tracing-subscriber`
//! - **Request Tracing**: request IDs attached to a per-request span
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gitgate_server::observability::{init_logging, request_id_layer, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty);
//!
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(request_id_layer());
//! ```

mod logging;
mod middleware;

pub use logging::{default_directives, init_logging, LogFormat};
pub use middleware::{request_id_layer, request_id_middleware, RequestId, RequestIdLayer, REQUEST_ID_HEADER};
