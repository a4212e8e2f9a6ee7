//! Runner-set resource extraction
//!
//! Normalizes an opted-in runner set into the per-runner requirements the
//! allocator consumes, or rejects it with a structured reason. Annotations
//! always win over the pod template; the template's `runner` container is
//! only consulted when the corresponding annotation is absent.

use thiserror::Error;

use crate::config::{
    ANNOTATION_CPU, ANNOTATION_ENABLED, ANNOTATION_MEMORY, ANNOTATION_MIN_RUNNERS,
    ANNOTATION_PRIORITY,
};
use crate::crd::AutoscalingRunnerSet;
use crate::quantity::{
    parse_cpu_annotation, parse_cpu_millis, parse_memory_annotation, parse_memory_bytes,
    QuantityError,
};

/// Per-runner requirements and observed state of one runner set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSetResources {
    /// Runner set name
    pub name: String,
    /// Namespace holding the runner set (carried for the update patch)
    pub namespace: String,
    /// CPU required by one runner, in millicores
    pub cpu_millis: i64,
    /// Memory required by one runner, in bytes
    pub memory_bytes: i64,
    /// Allocation priority; higher is allocated first
    pub priority: i32,
    /// Guaranteed minimum slot count
    pub min_runners: i32,
    /// Hard cap from the operator-set `maxRunners`; 0 means no cap
    pub configured_max: i32,
    /// `maxRunners` as observed before this tick's update
    pub current_max: i32,
    /// Active runner count from status; floor for scale-down
    pub currently_running: i32,
}

/// Why a runner set was rejected by extraction
///
/// [`ExtractError::NotEnabled`] is the expected case for sets that never
/// opted in and is only debug-logged; every other variant is a
/// misconfiguration worth a warning. All variants skip the set for the
/// current tick without affecting other sets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The opt-in annotation is missing or not `"true"`
    #[error("autoscaling not enabled (annotation missing or not \"true\")")]
    NotEnabled,

    /// Neither the CPU annotation nor the runner container provides CPU
    #[error("no CPU request in annotation or runner container")]
    MissingCpu,

    /// Neither the memory annotation nor the runner container provides memory
    #[error("no memory request in annotation or runner container")]
    MissingMemory,

    /// The priority annotation is not a signed integer
    #[error("invalid priority annotation: '{0}'")]
    InvalidPriority(String),

    /// The min-runners annotation is not a non-negative integer
    #[error("invalid min-runners annotation: '{0}'")]
    InvalidMinRunners(String),

    /// A resource quantity failed to parse
    #[error(transparent)]
    InvalidQuantity(#[from] QuantityError),
}

impl ExtractError {
    /// Returns true for the silent opt-out case
    pub fn is_not_enabled(&self) -> bool {
        matches!(self, Self::NotEnabled)
    }
}

/// Extract per-runner requirements from a runner set
///
/// Requires the opt-in annotation. CPU and memory come from annotations
/// first, then from the `runner` container's requests in the pod template.
/// `configured_max` and `current_max` both read the existing `maxRunners`
/// field; `currently_running` reads the status.
pub fn extract_runner_set_resources(
    rs: &AutoscalingRunnerSet,
) -> Result<RunnerSetResources, ExtractError> {
    let annotation = |key: &str| {
        rs.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    };

    if annotation(ANNOTATION_ENABLED) != Some("true") {
        return Err(ExtractError::NotEnabled);
    }

    let priority = match annotation(ANNOTATION_PRIORITY) {
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .map_err(|_| ExtractError::InvalidPriority(raw.to_string()))?,
        None => 0,
    };

    let min_runners = match annotation(ANNOTATION_MIN_RUNNERS) {
        Some(raw) => {
            let parsed = raw
                .trim()
                .parse::<i32>()
                .map_err(|_| ExtractError::InvalidMinRunners(raw.to_string()))?;
            if parsed < 0 {
                return Err(ExtractError::InvalidMinRunners(raw.to_string()));
            }
            parsed
        }
        None => 0,
    };

    let cpu_millis = match annotation(ANNOTATION_CPU) {
        Some(raw) => parse_cpu_annotation(raw)?,
        None => match rs.spec.runner_cpu_request() {
            Some(raw) => parse_cpu_millis(raw)?,
            None => return Err(ExtractError::MissingCpu),
        },
    };

    let memory_bytes = match annotation(ANNOTATION_MEMORY) {
        Some(raw) => parse_memory_annotation(raw)?,
        None => match rs.spec.runner_memory_request() {
            Some(raw) => parse_memory_bytes(raw)?,
            None => return Err(ExtractError::MissingMemory),
        },
    };

    let configured_max = rs.spec.max_runners.unwrap_or(0);

    Ok(RunnerSetResources {
        name: rs.metadata.name.clone().unwrap_or_default(),
        namespace: rs.metadata.namespace.clone().unwrap_or_default(),
        cpu_millis,
        memory_bytes,
        priority,
        min_runners,
        configured_max,
        current_max: configured_max,
        currently_running: rs.status.as_ref().map(|s| s.current_runners).unwrap_or(0),
    })
}
