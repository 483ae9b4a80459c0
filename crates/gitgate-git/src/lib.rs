//! Git smart HTTP primitives for gitgate.
//!
//! This crate holds everything the HTTP layer needs to bridge a request to a
//! local `git` executable: pkt-line framing for the service advertisement,
//! the closed set of services that may be run, a length-bounded request body
//! reader, and the subprocess bridge that pumps a request body into `git`
//! while streaming its output back out.

mod backend;
mod bounded;
mod error;
mod pktline;
mod process;
mod repository;
mod service;

pub use backend::GitBackend;
pub use bounded::BoundedReader;
pub use error::GitError;
pub use pktline::{service_advertisement, PktLine};
#[cfg(any(test, feature = "decode"))]
pub use pktline::PktLineReader;
pub use process::{spawn, CommandLine, ProcessInput, ProcessOutput, DEFAULT_CHUNK_SIZE};
pub use repository::Repository;
pub use service::Service;

/// Result type for git bridge operations.
pub type Result<T> = std::result::Result<T, GitError>;
