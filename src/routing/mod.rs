//! Pattern-based routing of envelopes to agents.

pub mod router;

pub use router::PatternRouter;
