//! # Lorekeep Core Library
//!
//! Decaying knowledge and memory simulation for conversational
//! characters. Instead of a static fact table, every character gets a
//! believable memory: facts are acquired, forgotten along an exponential
//! forgetting curve, resurfaced by spaced-repetition review, and gated
//! by a finite pool of personality-driven knowledge domain slots.
//!
//! The moving parts, leaves first:
//!
//! - **Decay model** ([`decay`]) — pure forgetting-curve math,
//!   `R = e^(-t/S)`, with trait-weighted modulation of initial stability.
//! - **Relevance search** ([`search`]) — keyword extraction and
//!   per-field scoring over stored items.
//! - **Review scheduler** ([`scheduler`]) — live retrievability
//!   snapshots, overdue penalties, Leitner-style review backoff, and the
//!   background decay pass.
//! - **Acquisition pipeline** ([`acquisition`]) — dedup, domain
//!   classification, complexity scoring, and atomic persistence of new
//!   facts.
//! - **Slot allocator** ([`slots`]) — interest-driven, race-safe
//!   claiming of a character's finite domain slots.
//! - **Engine facade** ([`engine`]) — dependency-injected composition of
//!   everything above over a SQLite [`store`].
//!
//! External collaborators stay external: trait bookkeeping is consumed
//! through [`traits::TraitProvider`], and semantic embedding hides
//! behind [`fingerprint::FingerprintProvider`] (a hashed v1 stands in).

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod acquisition;
pub mod config;
pub mod decay;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod records;
pub mod scheduler;
pub mod search;
pub mod slots;
pub mod store;
pub mod traits;
pub mod types;

pub use config::LoreConfig;
pub use engine::{KnowledgeEngine, RetrievedKnowledge};
pub use error::{LoreError, Result};
pub use records::{CharacterMemoryRecord, KnowledgeDomain, KnowledgeItem};
pub use store::KnowledgeStore;
pub use types::*;
