//! Turnstile - Fixed-Window Request Limiting
//!
//! This crate implements an in-memory, per-client fixed-window request
//! limiter and the HTTP admission layer that puts it in front of a service.
//! Counters live only in process memory and reset on restart.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
