//! SWINGWATCH - 4H/1H swing signal scanner and position supervisor
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod alerts;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod market;
pub mod storage;
pub mod strategy;
pub mod types;
