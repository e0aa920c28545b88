//! Scoring engine — pure, deterministic signal-to-score mapping.
//!
//! No I/O, no hidden state. Same bundle + same clock always yields the same
//! `ScoreResult`, which is what makes scores auditable after the fact.

pub mod engine;
pub mod model;
pub mod rules;

pub use engine::ScoringEngine;
pub use model::{ActorProfile, Category, ScoreResult, SignalBundle, Tier};
