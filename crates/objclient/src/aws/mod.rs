//! An AWS S3 implementation of the unified object storage interface.

mod api;
mod client;

pub use client::{AwsClient, MIN_UPLOAD_SIZE, PAGE_SIZE};
