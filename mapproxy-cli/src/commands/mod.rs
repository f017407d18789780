//! CLI command implementations.
//!
//! - [`serve`] - Run the HTTP proxy
//! - [`classify`] - Show how a request path is routed
//! - [`resources`] - List configured resources
//! - [`prepare`] - Prepare one resource synchronously

pub mod classify;
pub mod prepare;
pub mod resources;
pub mod serve;
