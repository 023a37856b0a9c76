//! The `pinbatch` core library.
//!
//! Batch transcription orchestrator that spreads audio files across
//! CPU-pinned worker processes, tracks their progress in plain-text
//! tracker files, samples system telemetry and power draw while the
//! batch runs, and aggregates everything into a QoS summary.

pub mod balance;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod qos;
pub mod telemetry;
pub mod tracker;
pub mod worker;
