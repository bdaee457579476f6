//! # Accord Protocol — Core Primitives
//!
//! Shared foundation for the Accord custodial settlement engine. Everything
//! in this crate is a building block: it holds no money, runs no state
//! machine, and makes no policy decision. The `accord-engine` crate does all
//! of that — on top of the primitives defined here.
//!
//! ## Modules
//!
//! - **config** — Protocol constants. Every magic number lives here.
//! - **crypto** — Digests and Ed25519 signatures. Don't roll your own.
//! - **identity** — Account identities: hashed public keys, Bech32-rendered.
//! - **asset** — Asset identifiers: the native unit and fungible tokens.
//! - **authority** — Capability and circuit-breaker collaborator interfaces.
//! - **telemetry** — `tracing` subscriber bootstrap for embedders and tests.
//!
//! ## Design Philosophy
//!
//! 1. If it touches money, it has tests. Plural.
//! 2. All monetary arithmetic is checked. Wrapping arithmetic and money
//!    do not mix.
//! 3. Authorization is injected, never inherited. The engine asks a
//!    collaborator "may this account do X?" and believes the boolean.

pub mod asset;
pub mod authority;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod telemetry;
