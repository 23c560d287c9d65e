//! Turnstile - Admission-Control Rate Limiting
//!
//! This crate implements an admission-control layer that decides, per caller
//! and per protected operation, whether a request proceeds or is rejected
//! under a configured rate budget. Strategies (fixed window, token bucket)
//! are pluggable over a shared storage abstraction with local in-process and
//! Redis-backed implementations, so a single process or a fleet of
//! cooperating processes can enforce the same budget.

pub mod config;
pub mod engine;
pub mod error;
pub mod storage;
pub mod strategy;
