// Batch service API: HTTP client and wire types.

pub mod client;
pub(crate) mod wire;

pub use client::BatchClient;
