//! The plan DAG: model, generation, optimization, and persistence (C5-C8).

pub mod generator;
pub mod model;
pub mod optimizer;
pub mod persistence;

pub use model::{DownloadPlan, ItemSnapshot, ItemType, PlanItem, PlanMetadata, Status};
