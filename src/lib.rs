//! # corpusd
//!
//! **A retrieval-augmented generation backend: hierarchical ingestion,
//! embeddings, and hybrid search.**
//!
//! corpusd ingests heterogeneous documents, decomposes them into a
//! three-level hierarchy (document → chapter → chunk), generates vector
//! embeddings plus auxiliary artifacts (summaries, Q&A pairs), persists
//! them to Postgres with vector and full-text indexes, and serves hybrid
//! similarity search over tenant-scoped libraries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐
//! │ Uploads  │──▶│   Pipeline     │──▶│  Postgres    │
//! │ text/url │   │ Split + Embed │   │ pgvector+FTS │
//! │ /file    │   └──────┬────────┘   └──────┬──────┘
//! └──────────┘          │                   │
//!                 ┌─────▼─────┐       ┌─────▼─────┐
//!                 │ LLM Pool  │       │  Hybrid   │
//!                 │ (routing) │       │  Search   │
//!                 └───────────┘       └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. An upload is converted to Markdown ([`convert`]) and stored as a
//!    `PENDING` [`models::Document`] in its [`models::Library`].
//! 2. The **ingestion pipeline** ([`pipeline`]) routes the document to a
//!    content-type-specific splitter ([`splitter`]), producing ordered
//!    [`models::Chapter`]s and their chunk texts.
//! 3. **Embedding strategies** ([`strategies`]) turn each chapter into
//!    chapter/chunk records, optional Q&A pairs, and an optional summary,
//!    calling providers through the **LLM pool** ([`llm`]).
//! 4. Records persist per-chapter transactionally ([`store`]); the database
//!    derives a weighted full-text vector alongside each dense vector.
//! 5. The **search engine** ([`search`]) fuses cosine-distance and
//!    full-text-rank candidates with per-library weights.
//! 6. Everything is exposed over the **HTTP API** ([`server`]) and a small
//!    CLI.
//!
//! ## Search Modes
//!
//! | Mode | Signals | Weights |
//! |------|---------|---------|
//! | `hybrid` | vector + full-text | per-library or caller override |
//! | `semantic` | vector only | forced (1, 0) |
//! | `textual` | full-text only | forced (0, 1) |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed error taxonomy and transience classification |
//! | [`models`] | Core data types: `Library`, `Document`, `Chapter`, `NewEmbedding` |
//! | [`tokenize`] | Token counting with estimate fallback |
//! | [`llm`] | Provider pool, model routing strategies, bounded retry |
//! | [`convert`] | Document→Markdown conversion port |
//! | [`splitter`] | Content-type routing and hierarchical splitting |
//! | [`strategies`] | Query / chapter / Q&A / summary embedding generation |
//! | [`pipeline`] | Async ingestion orchestrator with worker pool |
//! | [`search`] | Hybrid search with reciprocal-rank fusion |
//! | [`store`] | Persistence adapter (Postgres + pgvector) |
//! | [`db`] | Connection pool management |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`server`] | HTTP API (Axum) |
//!
//! ## Configuration
//!
//! corpusd is configured via a TOML file (default: `config/corpusd.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod splitter;
pub mod store;
pub mod strategies;
pub mod tokenize;
