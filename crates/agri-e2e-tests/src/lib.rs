//! End-to-end test crate for the AgriRent marketplace.
//!
//! This crate exists solely to run tests that drive the market core and the
//! HTTP API together. It has no public API; all functionality is in the
//! test modules.

#![forbid(unsafe_code)]
