//! Core library for Lumen: album discovery, the scan job queue, the
//! per-album processing pipeline and catalog persistence.
#![allow(missing_docs)]

pub mod database;
pub mod error;
pub mod scan;
pub mod stages;

pub use error::{Result, ScanError};
