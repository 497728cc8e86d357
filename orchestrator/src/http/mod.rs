//! HTTP clients

pub mod control_api;
