//! # Registry Index
//!
//! Lookup and import plumbing for a registry of MCP servers spread over
//! many independently paginated partitions.
//!
//! The crate resolves server ids and names to their partition through a
//! cache-aside index, pages across partitions as if they were one list,
//! converts third-party registry data into canonical records, imports
//! those records in a validate-then-apply pipeline and renders stored
//! records back in the registry format.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌────────────┐
//! │ file / json  │──▶│  Adaptor  │──▶│   Import   │──▶ RecordWriter
//! │ remote (url) │   │ normalize │   │  pipeline  │
//! └──────────────┘   └───────────┘   └─────┬──────┘
//!                                          │ existence checks
//!                                          ▼
//!                    ┌────────────┐   ┌────────────┐
//!                    │ Pagination │◀──│   Index    │──▶ BackingStore
//!                    │  engine    │   │ cache-aside│
//!                    └────────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy for foreground calls |
//! | [`models`] | Core data types |
//! | [`wire`] | External registry JSON format |
//! | [`store`] | Backing store traits and the in-memory store |
//! | [`cache`] | Concurrent location cache and stats |
//! | [`index`] | Plain and cache-aside server indexes |
//! | [`pagination`] | Global offset/limit across partitions |
//! | [`endpoint`] | Manual URL decomposition and endpoint specs |
//! | [`fetch`] | HTTP transport |
//! | [`adaptor`] | External data normalization |
//! | [`import`] | Validate-then-apply import |
//! | [`registry`] | Stored servers rendered back in the registry format |

pub mod adaptor;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod import;
pub mod index;
pub mod models;
pub mod pagination;
pub mod registry;
pub mod store;
pub mod wire;
