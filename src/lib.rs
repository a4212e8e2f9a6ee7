//! Gantry - capacity-driven autoscaler for runner scale sets
//!
//! Gantry watches a cluster's free compute and decides, every reconciliation
//! tick, how many concurrent runners each opted-in runner set may claim. It
//! reads allocatable capacity from Ready nodes, subtracts the demand of
//! non-runner workloads, withholds a safety buffer, and distributes what is
//! left across runner sets under priorities, minimum guarantees, and caps.
//! An active-runner safety floor guarantees it never scales a set below its
//! busy runners.
//!
//! # Modules
//!
//! - [`crd`] - Typed view of the AutoscalingRunnerSet resource
//! - [`controller`] - Capacity calculation, allocation, and the reconcile loop
//! - [`quantity`] - Resource quantity parsing (milli-CPU, bytes)
//! - [`config`] - Controller configuration and annotation keys
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod quantity;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
