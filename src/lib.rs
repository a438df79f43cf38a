//! # funcptr_detector
//!
//! Resolves the targets of indirect calls in an SSA-form module.
//! A single forward walk over the module tracks which pointers may point to which values,
//! including through struct fields, array slots, PHI joins, casts, parameters and returns,
//! and reports the concrete functions each call site may invoke, keyed by source line.

pub mod call_resolution;
pub mod callgraph;
pub mod config;
pub mod ir;
pub mod pointer_analysis;
pub mod report;

pub use call_resolution::Analysis;
pub use config::AnalysisConfig;
pub use report::{CallSiteRecord, Report};
