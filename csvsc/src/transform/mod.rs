//! Transformation module.
//!
//! This module turns input tables into output rows:
//! - Row: one record keyed by its file's header
//! - Header: ordered union of input headers
//! - Pipeline: filters, added columns, projection and output per run

pub mod header;
pub mod pipeline;
pub mod row;

pub use header::HeaderUnifier;
pub use pipeline::*;
pub use row::Row;
