//! Domain logic for the splat reconstruction service.
//!
//! Holds the single-job slot, the parameter bundle, the staging directories,
//! the execution backend abstraction with its local subprocess variant, the
//! orchestrator that drives a backend for one job, and the viewer hooks.
//! Nothing in here knows about HTTP.

pub mod backend;
pub mod error;
pub mod job;
pub mod local;
pub mod orchestrator;
pub mod params;
pub mod staging;
pub mod viewer;
