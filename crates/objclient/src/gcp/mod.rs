//! Google Cloud Storage support.

mod api;
mod client;

pub use client::{GcpClient, MAX_COMPOSABLE};
