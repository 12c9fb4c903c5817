pub mod engine;
pub mod source;

pub use engine::MatchEngine;
pub use source::{source_for, InternalDataSource};
