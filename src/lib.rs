//! Toolwarden Library
//!
//! Allow-listed execution of the `npm` and `gh` command-line tools through
//! the platform shell, with injection-safe argument escaping, bounded
//! execution, serialized access to rate-limited tools and a TTL result cache.

pub mod config;
pub mod tools;
