//! A parallel multi-repository workspace synchronization engine: fetches and
//! checks out every project declared in an XML manifest, using a process-wide
//! SSH connection pool and a persisted fetch-time oracle to keep the network
//! phase's critical path short.
//!
//! The library API is not stable; it exists to let the `fleetsync` binary
//! and its integration tests drive the same engine.

pub mod config;
pub mod error;
pub mod eventlog;
pub mod executor;
pub mod git;
pub mod manifest;
pub mod oracle;
pub mod path;
pub mod project;
pub mod refcache;
pub mod shell_exec;
pub mod ssh;
pub mod styling;
pub mod sync;

#[cfg(feature = "cli")]
pub mod cli;
