//! Control server
//!
//! HTTP surface plus the persistent agent channel.

pub mod handlers;
pub mod serve;
pub mod session;
pub mod state;
