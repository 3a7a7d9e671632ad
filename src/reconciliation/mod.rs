//! Reconciliation module for turning unsettled household expenses into
//! settlements

pub mod service;
pub mod workflow;

pub use service::*;
pub use workflow::*;
