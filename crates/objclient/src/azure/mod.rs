//! An Azure blob storage implementation of the unified object storage interface.

mod api;
mod client;

pub use client::AzureClient;
