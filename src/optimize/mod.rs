//! Parameter space and local search

pub mod search;
pub mod space;

pub use search::{CoordinateSearchOptimizer, Proposal};
pub use space::{ParameterSpace, ParameterSpec};
