//! `wareflow-engine`: the fulfillment application service.
//!
//! Composes the domain (`wareflow-operations`) with the infrastructure
//! (`wareflow-infra`) behind one synchronous facade. Callers hold a
//! `FulfillmentEngine` and get command dispatch, read-your-writes
//! projections, workboards, document chains and packing views without
//! touching stores or buses directly.

pub mod engine;
pub mod label;

pub use engine::{
    EngineBus, EngineError, EngineProjection, FulfillmentEngine, OperationDraft, PackagePatch,
};
pub use label::{AvailableItem, PackageSummary, PackingSummary};
