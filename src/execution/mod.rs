//! Execution engine module.
//!
//! This module handles evaluating filter chains: the request/response
//! descriptors, the recursive evaluation engine and the result caches used by
//! memoizing stages.

pub mod cache;
pub mod engine;
pub mod request;

pub use cache::{CacheKey, CachePolicy, CacheStats, ResultCache};
pub use engine::{EvaluationEngine, EvaluationStats};
pub use request::{ChangedMask, FilterRequest, FilterResponse, Quality};
