//! Consolidation, reporting, and pipeline orchestration for phishlens.
//!
//! This crate ties URL cleaning and the reputation clients together into
//! the staged extract → clean → enrich → report workflow, and owns every
//! artifact those stages exchange.

pub mod artifacts;
pub mod consolidate;
pub mod pipeline;
pub mod technique;

pub use consolidate::{ConsolidatedRow, EnrichmentMap, consolidate, prioritize};
pub use pipeline::{
    Enricher, ProgressReporter, RunInput, RunSummary, ServiceSelection, SilentProgress, Workspace,
};
pub use technique::{Finding, classify, prevention_tip};
