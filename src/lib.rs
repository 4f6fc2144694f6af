//! # vibe-mcp
//!
//! **A filesystem-backed markdown context server for AI agents.**
//!
//! A workspace of markdown documents (tasks, plans, sessions, references,
//! changelog, reports, scratch, assets) is mirrored into a disposable SQLite
//! FTS5 index and exposed over an HTTP API: ranked search, document reads,
//! safe writes, and signed outgoing webhooks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────┐
//! │  Walker  │──▶│  Parser  │──▶│ Chunker  │──▶│  SQLite    │
//! │  (*.md)  │   │ (YAML FM)│   │ (6k cap) │   │ FTS5+BM25 │
//! └──────────┘   └──────────┘   └──────────┘   └─────┬─────┘
//!                                                    │
//!                    ┌───────────────┬───────────────┤
//!                    ▼               ▼               ▼
//!               ┌─────────┐    ┌─────────┐     ┌──────────┐
//!               │ Search  │    │ Writer  │────▶│ Webhooks │
//!               │ (boosts)│    │ (atomic)│     │ (HMAC)   │
//!               └─────────┘    └─────────┘     └──────────┘
//! ```
//!
//! The filesystem is the sole source of truth. Writes go through the
//! [`writer::Writer`]: path validation, atomic temp-and-rename write,
//! single-file refresh, then a signed webhook event. The index can always be
//! rebuilt from scratch with `vibe reindex`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-driven immutable configuration |
//! | [`error`] | Closed error-kind set for the public contract |
//! | [`walker`] | Workspace traversal with SHA-256 change detection |
//! | [`parser`] | YAML frontmatter with path-based inference |
//! | [`chunker`] | Heading-aware chunking with bounded fallbacks |
//! | [`store`] | SQLite index store: projects, documents, chunks, FTS |
//! | [`search`] | Composite-score ranked search with snippets |
//! | [`indexer`] | Full rebuild, single-file refresh, mtime sync |
//! | [`writer`] | Path-safe atomic write operations |
//! | [`webhooks`] | SSRF-gated subscriptions, signed bounded delivery |
//! | [`reader`] | Document, plan, and task reads |
//! | [`resources`] | Markdown resource views over the index |
//! | [`prompts`] | Project briefing and session-start documents |
//! | [`server`] | Axum HTTP transport with bearer auth |

pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod migrate;
pub mod parser;
pub mod paths;
pub mod prompts;
pub mod reader;
pub mod resources;
pub mod search;
pub mod server;
pub mod store;
pub mod walker;
pub mod webhooks;
pub mod writer;
