//! Data models

pub mod host;
pub mod intent;
pub mod outcome;
