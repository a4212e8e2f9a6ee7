//! Cluster capacity calculation
//!
//! Sums allocatable CPU and memory across Ready nodes, subtracts the demand
//! of non-runner pods, and withholds a configurable safety buffer. Runner
//! pods are excluded from the "used" side: the autoscaler resizes them, and
//! counting them would make the allocator contend with its own output. Their
//! demand is tallied separately for diagnostics.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{info, warn};

use super::client::ClusterState;
use crate::quantity::{parse_cpu_millis, parse_memory_bytes};
use crate::Error;

/// Label carried by pods that belong to a runner scale set
const SCALE_SET_NAME_LABEL: &str = "actions.github.com/scale-set-name";

/// Component label whose `"runner"` value also marks runner pods
const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

const RUNNER_COMPONENT: &str = "runner";

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

/// Snapshot of cluster-wide capacity for one reconciliation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterCapacity {
    /// Allocatable CPU across Ready nodes, in millicores
    pub total_cpu_millis: i64,
    /// Allocatable memory across Ready nodes, in bytes
    pub total_memory_bytes: i64,
    /// CPU requested by non-runner, non-terminal pods
    pub used_cpu_millis: i64,
    /// Memory requested by non-runner, non-terminal pods
    pub used_memory_bytes: i64,
    /// CPU available for allocation after the safety buffer
    pub available_cpu_millis: i64,
    /// Memory available for allocation after the safety buffer
    pub available_memory_bytes: i64,
    /// CPU requested by excluded runner pods (diagnostics only)
    pub excluded_cpu_millis: i64,
    /// Memory requested by excluded runner pods (diagnostics only)
    pub excluded_memory_bytes: i64,
    /// Number of Ready nodes contributing to the totals
    pub ready_nodes: usize,
    /// Number of pods counted into `used`
    pub counted_pods: usize,
    /// Number of runner pods excluded from `used`
    pub excluded_pods: usize,
}

/// Calculates available cluster capacity with safety buffers
pub struct CapacityCalculator {
    state: Arc<dyn ClusterState>,
    cpu_buffer_percent: u8,
    memory_buffer_percent: u8,
}

impl CapacityCalculator {
    /// Create a new capacity calculator
    ///
    /// Buffer percentages must be in `0..=100`; they are the share of
    /// otherwise-available capacity withheld as reserve.
    pub fn new(state: Arc<dyn ClusterState>, cpu_buffer_percent: u8, memory_buffer_percent: u8) -> Self {
        Self {
            state,
            cpu_buffer_percent,
            memory_buffer_percent,
        }
    }

    /// Calculate the available cluster capacity for this tick
    pub async fn calculate(&self) -> Result<ClusterCapacity, Error> {
        let nodes = self
            .state
            .list_nodes()
            .await
            .map_err(|e| Error::capacity(format!("failed to list nodes: {e}")))?;

        let mut total_cpu_millis = 0i64;
        let mut total_memory_bytes = 0i64;
        let mut ready_nodes = 0usize;
        for node in &nodes {
            if !is_node_ready(node) {
                continue;
            }
            ready_nodes += 1;
            let (cpu, memory) = node_allocatable(node);
            total_cpu_millis += cpu;
            total_memory_bytes += memory;
        }

        let pods = self
            .state
            .list_pods()
            .await
            .map_err(|e| Error::capacity(format!("failed to list pods: {e}")))?;

        let usage = sum_pod_usage(&pods);

        info!(
            nodes = ready_nodes,
            pods_counted = usage.counted_pods,
            pods_excluded = usage.excluded_pods,
            excluded_cpu_millis = usage.excluded_cpu_millis,
            excluded_memory_bytes = usage.excluded_memory_bytes,
            excluded_memory_gb = usage.excluded_memory_bytes as f64 / BYTES_PER_GB,
            "capacity breakdown"
        );

        let raw_available_cpu = (total_cpu_millis - usage.used_cpu_millis).max(0);
        let raw_available_memory = (total_memory_bytes - usage.used_memory_bytes).max(0);

        Ok(ClusterCapacity {
            total_cpu_millis,
            total_memory_bytes,
            used_cpu_millis: usage.used_cpu_millis,
            used_memory_bytes: usage.used_memory_bytes,
            available_cpu_millis: apply_buffer(raw_available_cpu, self.cpu_buffer_percent),
            available_memory_bytes: apply_buffer(raw_available_memory, self.memory_buffer_percent),
            excluded_cpu_millis: usage.excluded_cpu_millis,
            excluded_memory_bytes: usage.excluded_memory_bytes,
            ready_nodes,
            counted_pods: usage.counted_pods,
            excluded_pods: usage.excluded_pods,
        })
    }
}

#[derive(Default)]
struct PodUsage {
    used_cpu_millis: i64,
    used_memory_bytes: i64,
    excluded_cpu_millis: i64,
    excluded_memory_bytes: i64,
    counted_pods: usize,
    excluded_pods: usize,
}

fn sum_pod_usage(pods: &[Pod]) -> PodUsage {
    let mut usage = PodUsage::default();
    for pod in pods {
        if is_terminal(pod) {
            continue;
        }
        let (cpu, memory) = pod_requests(pod);
        if is_runner_pod(pod) {
            usage.excluded_cpu_millis += cpu;
            usage.excluded_memory_bytes += memory;
            usage.excluded_pods += 1;
        } else {
            usage.used_cpu_millis += cpu;
            usage.used_memory_bytes += memory;
            usage.counted_pods += 1;
        }
    }
    usage
}

/// Withhold `buffer_percent` of `raw`, truncating toward zero
fn apply_buffer(raw: i64, buffer_percent: u8) -> i64 {
    raw * (100 - i64::from(buffer_percent)) / 100
}

// =============================================================================
// Pure Functions - Extracted for Unit Testability
// =============================================================================

/// Check if a node has the Ready condition set to True
pub(crate) fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Check if a pod belongs to a runner scale set
///
/// Matches either a non-empty scale-set-name label or the runner component
/// label, the two shapes the runner controller stamps on its pods.
pub(crate) fn is_runner_pod(pod: &Pod) -> bool {
    let Some(labels) = pod.metadata.labels.as_ref() else {
        return false;
    };
    if labels
        .get(SCALE_SET_NAME_LABEL)
        .is_some_and(|v| !v.is_empty())
    {
        return true;
    }
    labels.get(COMPONENT_LABEL).map(String::as_str) == Some(RUNNER_COMPONENT)
}

/// Check if a pod is in a terminal phase (Succeeded or Failed)
fn is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Allocatable CPU (millicores) and memory (bytes) of a node
///
/// A quantity that fails to parse contributes zero; a single malformed node
/// must not stall the tick.
fn node_allocatable(node: &Node) -> (i64, i64) {
    let name = node.metadata.name.as_deref().unwrap_or("<unnamed>");
    let allocatable = node.status.as_ref().and_then(|s| s.allocatable.as_ref());

    let cpu = allocatable
        .and_then(|a| a.get("cpu"))
        .map(|q| {
            parse_cpu_millis(&q.0).unwrap_or_else(|err| {
                warn!(node = name, error = %err, "unparseable allocatable cpu");
                0
            })
        })
        .unwrap_or(0);
    let memory = allocatable
        .and_then(|a| a.get("memory"))
        .map(|q| {
            parse_memory_bytes(&q.0).unwrap_or_else(|err| {
                warn!(node = name, error = %err, "unparseable allocatable memory");
                0
            })
        })
        .unwrap_or(0);

    (cpu, memory)
}

/// Summed resource requests of a pod's containers
///
/// Missing request fields contribute zero, as do unparseable quantities.
pub(crate) fn pod_requests(pod: &Pod) -> (i64, i64) {
    let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
    let mut cpu_millis = 0i64;
    let mut memory_bytes = 0i64;

    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or(&[]);
    for container in containers {
        let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref())
        else {
            continue;
        };
        if let Some(q) = requests.get("cpu") {
            cpu_millis += parse_cpu_millis(&q.0).unwrap_or_else(|err| {
                warn!(pod = name, error = %err, "unparseable cpu request");
                0
            });
        }
        if let Some(q) = requests.get("memory") {
            memory_bytes += parse_memory_bytes(&q.0).unwrap_or_else(|err| {
                warn!(pod = name, error = %err, "unparseable memory request");
                0
            });
        }
    }

    (cpu_millis, memory_bytes)
}
