//! Capacity-driven reconciliation of runner-set slot counts
//!
//! The pipeline runs once per tick: snapshot cluster capacity, list and
//! filter runner sets, allocate slots, apply the active-runner safety floor,
//! and patch `maxRunners` where it changed. The allocator and extractor are
//! pure; all I/O goes through the [`ClusterState`] capability trait.

mod allocator;
mod capacity;
mod client;
mod reconciler;
mod resources;

pub use allocator::{allocate, Allocation, AllocatorStrategy};
pub use capacity::{CapacityCalculator, ClusterCapacity};
pub use client::{ClusterState, KubeClusterState};
pub use reconciler::{Reconciler, TickSummary};
pub use resources::{extract_runner_set_resources, ExtractError, RunnerSetResources};
