//! Unit tests for objclient.
//!
//! Every test here runs against the in-memory client (sometimes wrapped in the rate
//! limited decorator), so the suite covers the semantics every provider client is
//! expected to share.

pub mod contract;
pub mod filtering;
pub mod helpers;
pub mod multipart;
pub mod retention;
