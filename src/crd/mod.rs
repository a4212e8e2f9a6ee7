//! Typed view of the AutoscalingRunnerSet resource
//!
//! The AutoscalingRunnerSet CRD (`actions.github.com/v1alpha1`) is owned by
//! the runner controller; gantry only consumes it. The types here are a
//! partial typing carrying exactly the fields the autoscaler reads and
//! writes: `spec.maxRunners`, the runner container's resource requests in
//! the pod template, and `status.currentRunners`. Everything else on the
//! resource round-trips through the API server untouched (updates are merge
//! patches).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the container in the pod template whose resource requests are the
/// fallback source for per-runner CPU and memory
pub const RUNNER_CONTAINER_NAME: &str = "runner";

/// Specification of an AutoscalingRunnerSet, reduced to the consumed fields
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "actions.github.com",
    version = "v1alpha1",
    kind = "AutoscalingRunnerSet",
    plural = "autoscalingrunnersets",
    namespaced,
    status = "AutoscalingRunnerSetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingRunnerSetSpec {
    /// Upper bound on concurrent runners the downstream controller may create
    ///
    /// This is both the field the autoscaler writes and, when set by the
    /// operator, the hard cap it respects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runners: Option<i32>,

    /// Pod template for runner pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<RunnerPodTemplate>,
}

impl AutoscalingRunnerSetSpec {
    /// CPU request of the runner container in the pod template, if any
    pub fn runner_cpu_request(&self) -> Option<&str> {
        self.runner_container()
            .and_then(|c| c.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|q| q.cpu.as_deref())
    }

    /// Memory request of the runner container in the pod template, if any
    pub fn runner_memory_request(&self) -> Option<&str> {
        self.runner_container()
            .and_then(|c| c.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|q| q.memory.as_deref())
    }

    fn runner_container(&self) -> Option<&RunnerContainer> {
        self.template
            .as_ref()
            .and_then(|t| t.spec.as_ref())
            .and_then(|s| s.containers.iter().find(|c| c.name == RUNNER_CONTAINER_NAME))
    }
}

/// Observed state of an AutoscalingRunnerSet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingRunnerSetStatus {
    /// Number of runners currently active for this set
    ///
    /// Source of the scale-down safety floor: the autoscaler never writes a
    /// `maxRunners` below this value.
    #[serde(default)]
    pub current_runners: i32,
}

/// Pod template embedded in the runner-set spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RunnerPodTemplate {
    /// Pod spec of the template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<RunnerPodSpec>,
}

/// Pod spec of the runner pod template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RunnerPodSpec {
    /// Containers of the runner pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<RunnerContainer>,
}

/// A container in the runner pod template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RunnerContainer {
    /// Container name; only [`RUNNER_CONTAINER_NAME`] is consulted
    pub name: String,

    /// Compute resources for the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Container resource requirements
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceRequirements {
    /// Resource requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantities>,
}

/// CPU and memory quantities as the API server serves them
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceQuantities {
    /// CPU quantity (e.g. `"500m"`, `"1"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g. `"512Mi"`, `"4Gi"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}
