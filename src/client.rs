//! Relay client: the entry point that turns one completion request into a vendor
//! exchange and a standardized response.
//!
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
mod chat;
pub mod core;
mod execution;

pub use builder::RelayClientBuilder;
pub use core::RelayClient;
