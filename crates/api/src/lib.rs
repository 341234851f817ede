//! SplatScan gateway library.
//!
//! Exposes the building blocks of the HTTP service (config, state, error
//! handling, handlers, routes and the shared router builder) so integration
//! tests and the binary entrypoint use the same code.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
