//! Rampart — a modular host-hardening engine.
//!
//! Hardening modules declare dependencies on each other; the resolver turns
//! the enabled set into an execution order, and the coordinator runs each
//! module through pre-check, apply and validate, collecting a run report.
//! Dry-run is the default and never touches the host.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod events;
pub mod exec;
pub mod logging;

pub mod module;
pub mod registry;
pub mod resolver;

pub mod coordinator;
pub mod report;
