//! Integration test entry point for torstatus-client.
//!
//! Run with: cargo test -p torstatus-client --test integration

mod harness;
mod bootstrap;
