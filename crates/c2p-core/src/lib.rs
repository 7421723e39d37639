//! c2p-core library.
//!
//! Synchronizes the elements of an engineering model into work items of a
//! tracker project. A run converts model elements into work items, looks up
//! their remote counterparts through the [`identity::IdentityRepository`],
//! and sends the minimal set of deletes, creates and updates, deciding
//! staleness by checksums. Documents embedding those work items are
//! rendered by [`document`].
//!
//! # Conventions
//!
//! - **Errors**: Each module has its own `thiserror` enum with a `code()`
//!   mapping to [`error::ErrorCode`]. Per-item failures are collected in
//!   [`collector::ErrorCollector`] instead of aborting the run.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`)
//!   with structured fields; every run carries a `run_id` span field.

pub mod canonical;
pub mod collector;
pub mod config;
pub mod context;
pub mod convert;
pub mod document;
pub mod error;
pub mod identity;
pub mod model;
pub mod pool;
pub mod source;
pub mod sync;
pub mod template;
pub mod tracker;
