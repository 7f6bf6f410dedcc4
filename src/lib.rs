//! Oracle-challenge watcher.
//!
//! Polls an oracle subgraph for the questions of one registry, evaluates
//! each new document and, when a document is judged bad, challenges the
//! current answer on-chain with a doubled bond.

pub mod config;
pub mod content;
pub mod evaluator;
pub mod onchain;
pub mod registry;
pub mod shutdown;
pub mod store;
pub mod watcher;
