//! Unit test suite entry point.
//!
//! These tests exercise the unified client contract through the public API, using the
//! in-memory client rather than live cloud providers.
//!
//! Run with: `cargo test --test unit_tests`

mod unit_suite;
