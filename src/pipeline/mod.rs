//! Pipeline configuration: the typed model, the checker that builds it from
//! raw YAML, the per-stage job graph resolver and dotted-path overrides.

pub mod checker;
pub mod graph;
pub mod model;
pub mod overrides;

pub use checker::{validate, ValidationOutcome};
pub use model::PipelineConfig;
