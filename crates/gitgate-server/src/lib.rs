//! # gitgate server
//!
//! Serves bare git repositories below a content root over the git Smart
//! HTTP protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  axum Router  (request id, tracing, gzip request bodies)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RepositoryRouter                                           │
//! │  • name shape and content-root containment                  │
//! │  • Operation::plan (service whitelist)                      │
//! │  • lookup, or auto-create on push with hooks                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RepositoryHandler                                          │
//! │  • GET  info/refs?service=...  → advertisement              │
//! │  • POST git-upload-pack / git-receive-pack → result stream  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  gitgate-git: GitBackend → process bridge → git             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin gitgate -- --content-root /srv/git --listen 127.0.0.1:8080
//! git clone http://127.0.0.1:8080/project.git
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Application state and the axum router
//! - [`router`] - Repository resolution, containment and auto-creation
//! - [`handler`] - The Smart HTTP endpoints
//! - [`static_files`] - Plain file serving with conditional GET
//! - [`config`] - Server configuration
//! - [`observability`] - Logging and request IDs

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod observability;
pub mod pages;
pub mod router;
pub mod static_files;

pub use api::{create_router, AppState};
pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use hooks::{NoHooks, RepositoryHooks};
pub use pages::{ErrorPages, HtmlPages, PageStyle, PlainPages};
