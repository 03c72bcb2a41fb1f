//! # Lumen Server
//!
//! Composition root for the Lumen library indexer. Loads configuration,
//! connects the PostgreSQL catalog and runs the scanner, either as a
//! long-lived service with periodic rescans or as one-shot admin commands.

pub mod cli;
pub mod infra;
