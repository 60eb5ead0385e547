//! # kb-sync
//!
//! Keeps a managed vector store in sync with the articles of a help-center
//! API.
//!
//! Each run fetches every article, normalizes it to Markdown, and reconciles
//! the result against a persisted fingerprint store: new documents are
//! uploaded, changed ones replaced, unchanged ones skipped, and documents
//! that vanished upstream deleted. Chunking, embedding, and retrieval happen
//! inside the vector-store service and are never inspected.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Help center │──▶│ Normalizer │──▶│ Sync engine │──▶│ Vector store │
//! │   fetcher   │   │ HTML → MD  │   │  plan+apply │   │ OpenAI / dir │
//! └─────────────┘   └────────────┘   └──────┬──────┘   └──────────────┘
//!                                      ┌────┴─────┐
//!                                      ▼          ▼
//!                               ┌────────────┐ ┌──────────┐
//!                               │Fingerprints│ │  Report  │
//!                               │SQLite/JSON │ │ sink+log │
//!                               └────────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbsync init              # create the fingerprint store
//! kbsync run               # fetch → normalize → sync
//! kbsync fetch             # stage articles only
//! kbsync sync --dry-run    # show what a sync of staged articles would do
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Fatal error taxonomy |
//! | [`helpcenter`] | Paginated article fetcher |
//! | [`normalize`] | HTML → Markdown, identifiers, content hashes |
//! | [`plan`] | Added / updated / unchanged / removed partition |
//! | [`sync`] | The sync engine |
//! | [`store`] | Fingerprint store backends |
//! | [`remote`] | Vector-store adapters |
//! | [`report`] | Report sinks and run reports |
//! | [`logging`] | Console and file logging |
//! | [`spaces`] | Object storage for logs and state |
//! | [`pipeline`] | CLI command composition |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod helpcenter;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod plan;
pub mod remote;
pub mod report;
pub mod spaces;
pub mod store;
pub mod sync;
