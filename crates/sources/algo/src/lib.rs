//! Quote source for the algo backend.
//!
//! The backend serves one JSON collection per market segment
//! (`/api/live-data` for spot, one endpoint per futures expiry) and a
//! server-sent-event feed that pushes every segment at once.

pub mod client;
pub mod protocol;
pub mod stream;

pub use client::{AlgoClient, AlgoConfig};
