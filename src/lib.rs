//! Leadflow — lead engagement pipeline: scoring, intake queue, sequencing.

pub mod channels;
pub mod config;
pub mod content;
pub mod error;
pub mod intake;
pub mod scoring;
pub mod sequence;
pub mod store;
