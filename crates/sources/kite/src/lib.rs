//! Quote source backed by the Kite Connect v3 REST API.

pub mod client;
pub mod protocol;

pub use client::{KiteClient, KiteConfig};
