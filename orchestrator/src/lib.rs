//! Flotilla Orchestrator Library
//!
//! Core modules for the Flotilla deployment control plane.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod executors;
pub mod hosts;
pub mod http;
pub mod logs;
pub mod models;
pub mod proto;
pub mod registry;
pub mod server;
pub mod shell;
pub mod spec;
