//! Core types and the scrape/refresh pipeline for the rolloff dumpster pricing aggregator.

/// Vendor fallback tables loaded by the providers.
pub mod defaults;
/// Page fetching and HTML heuristics shared by providers.
pub mod extract;
/// Domain models and identifiers shared by all providers.
pub mod model;
/// Conversion of raw extractor output into linked entities.
pub mod normalize;
/// Bounded, retrying execution of all extractors.
pub mod orchestrator;
/// Orchestrate, verify, and persist in one step.
pub mod pipeline;
/// Registry for plugging vendor providers into the pipeline.
pub mod plugin;
/// Traits describing the extractor interfaces.
pub mod ports;
/// Exponential backoff helper.
pub mod retry;
/// Periodic refresh loop.
pub mod scheduler;
/// High-level service facade used by the HTTP layer.
pub mod service;
/// The snapshot aggregate and its queries.
pub mod snapshot;
/// Snapshot persistence.
pub mod store;

pub use defaults::*;
pub use model::*;
pub use normalize::*;
pub use orchestrator::*;
pub use pipeline::*;
pub use plugin::*;
pub use ports::*;
pub use retry::*;
pub use scheduler::*;
pub use service::*;
pub use snapshot::*;
pub use store::*;
