pub mod app;
pub mod config;
pub mod settings;
pub mod telemetry;
