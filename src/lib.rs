//! compile-box library
//!
//! Runs untrusted code in disposable, network-isolated containers:
//! - Host side: staging-area lifecycle and container launch under a deadline
//! - Sandbox side: per-language build/run pipelines and entry-point lookup
//! - MCP server exposing the single `run` operation

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mcp;
pub mod orchestrator;
pub mod pipeline;
pub mod resolver;
pub mod runner;
pub mod sandbox;
