//! Reconciliation loop
//!
//! Drives the tick pipeline: capacity snapshot, runner-set extraction,
//! allocation, the active-runner safety floor, and the `maxRunners` updates.
//! One task owns the loop and awaits each tick to completion, so ticks never
//! overlap. Tick-level failures abort the tick and the loop carries on; the
//! next tick is the retry mechanism.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::allocator::allocate;
use super::capacity::CapacityCalculator;
use super::client::ClusterState;
use super::resources::{extract_runner_set_resources, RunnerSetResources};
use crate::config::Config;
use crate::Error;

/// Outcome counters for one reconciliation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Runner sets seen in the listing
    pub total: usize,
    /// Runner sets that passed extraction
    pub enabled: usize,
    /// Updates applied (or, in dry-run mode, that would have been applied)
    pub updated: usize,
    /// Updates that failed and were skipped
    pub failed: usize,
}

/// The main controller: owns the tick pipeline and the periodic loop
pub struct Reconciler {
    state: Arc<dyn ClusterState>,
    calculator: CapacityCalculator,
    config: Config,
}

impl Reconciler {
    /// Create a new reconciler over the given cluster-state source
    pub fn new(state: Arc<dyn ClusterState>, config: Config) -> Self {
        let calculator = CapacityCalculator::new(
            state.clone(),
            config.cpu_buffer_percent,
            config.memory_buffer_percent,
        );
        Self {
            state,
            calculator,
            config,
        }
    }

    /// Run the reconciliation loop until the token is cancelled
    ///
    /// Reconciles once immediately, then on every interval tick. A tick in
    /// progress always runs to completion; cancellation is observed between
    /// waits and returns `Ok`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Error> {
        info!(
            interval = ?self.config.reconcile_interval,
            namespaces = ?self.config.namespaces,
            dry_run = self.config.dry_run,
            allocator = %self.config.allocator,
            "starting reconciliation loop"
        );

        if let Err(err) = self.reconcile_once().await {
            error!(error = %err, "initial reconciliation failed");
        }

        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        // A slow tick delays the next; ticks must never fire back-to-back
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately and is already covered
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciliation loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.reconcile_once().await {
                        error!(error = %err, "reconciliation failed");
                    }
                }
            }
        }
    }

    /// Perform a single reconciliation tick
    pub async fn reconcile_once(&self) -> Result<TickSummary, Error> {
        let started = Instant::now();
        info!("reconciliation started");

        let capacity = self.calculator.calculate().await?;
        info!(
            total_cpu_millis = capacity.total_cpu_millis,
            total_memory_bytes = capacity.total_memory_bytes,
            used_cpu_millis = capacity.used_cpu_millis,
            used_memory_bytes = capacity.used_memory_bytes,
            available_cpu_millis = capacity.available_cpu_millis,
            available_memory_bytes = capacity.available_memory_bytes,
            "cluster capacity calculated"
        );

        let runner_sets = self
            .state
            .list_runner_sets(&self.config.namespaces)
            .await
            .map_err(|e| Error::list(e.to_string()))?;

        let mut summary = TickSummary {
            total: runner_sets.len(),
            ..Default::default()
        };

        if runner_sets.is_empty() {
            warn!("no runner sets found");
            return Ok(summary);
        }

        let enabled: Vec<RunnerSetResources> = runner_sets
            .iter()
            .filter_map(|rs| match extract_runner_set_resources(rs) {
                Ok(resources) => {
                    info!(
                        name = %resources.name,
                        cpu_millis = resources.cpu_millis,
                        memory_bytes = resources.memory_bytes,
                        priority = resources.priority,
                        min_runners = resources.min_runners,
                        configured_max = resources.configured_max,
                        "runner set enabled for autoscaling"
                    );
                    Some(resources)
                }
                Err(err) if err.is_not_enabled() => {
                    debug!(name = %rs.name_any(), "skipping runner set: not enabled");
                    None
                }
                Err(err) => {
                    warn!(name = %rs.name_any(), error = %err, "skipping runner set");
                    None
                }
            })
            .collect();

        summary.enabled = enabled.len();
        if enabled.is_empty() {
            warn!("no runner sets enabled for autoscaling");
            return Ok(summary);
        }

        let allocations = allocate(
            self.config.allocator,
            &enabled,
            capacity.available_cpu_millis,
            capacity.available_memory_bytes,
        );

        let by_name: HashMap<&str, &RunnerSetResources> =
            enabled.iter().map(|r| (r.name.as_str(), r)).collect();

        for allocation in &allocations {
            let Some(rs) = by_name.get(allocation.name.as_str()) else {
                continue;
            };

            // Safety floor: never scale below the runners currently working
            let new_max = allocation.max_runners.max(rs.currently_running);
            if new_max > allocation.max_runners {
                info!(
                    name = %rs.name,
                    calculated_max = allocation.max_runners,
                    currently_running = rs.currently_running,
                    "raising maxRunners to currently running count"
                );
            }

            if new_max == rs.current_max {
                debug!(
                    name = %rs.name,
                    max_runners = new_max,
                    "maxRunners unchanged"
                );
                continue;
            }

            if self.config.dry_run {
                warn!(
                    name = %rs.name,
                    old_max = rs.current_max,
                    new_max,
                    currently_running = rs.currently_running,
                    "[dry-run] would update maxRunners"
                );
                summary.updated += 1;
                continue;
            }

            match self
                .state
                .patch_max_runners(&rs.namespace, &rs.name, new_max)
                .await
            {
                Ok(()) => {
                    info!(
                        name = %rs.name,
                        old_max = rs.current_max,
                        new_max,
                        currently_running = rs.currently_running,
                        "updated maxRunners"
                    );
                    summary.updated += 1;
                }
                Err(err) => {
                    let err = Error::patch(&rs.name, err.to_string());
                    error!(name = %rs.name, error = %err, "failed to update runner set");
                    summary.failed += 1;
                }
            }
        }

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            runner_sets_total = summary.total,
            runner_sets_enabled = summary.enabled,
            runner_sets_updated = summary.updated,
            runner_sets_failed = summary.failed,
            dry_run = self.config.dry_run,
            "reconciliation completed"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::MockClusterState;
    use super::*;

    use std::collections::BTreeMap;
    use std::time::Duration;

    use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::config::{ANNOTATION_CPU, ANNOTATION_ENABLED, ANNOTATION_MEMORY};
    use crate::crd::{AutoscalingRunnerSet, AutoscalingRunnerSetSpec, AutoscalingRunnerSetStatus};

    fn ready_node(cpu: &str, memory: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("node-1".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(cpu.to_string())),
                    ("memory".to_string(), Quantity(memory.to_string())),
                ])),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn runner_set(name: &str, max_runners: Option<i32>, current_runners: i32) -> AutoscalingRunnerSet {
        let mut rs = AutoscalingRunnerSet::new(
            name,
            AutoscalingRunnerSetSpec {
                max_runners,
                template: None,
            },
        );
        rs.metadata.namespace = Some("ci".to_string());
        rs.metadata.annotations = Some(BTreeMap::from([
            (ANNOTATION_ENABLED.to_string(), "true".to_string()),
            (ANNOTATION_CPU.to_string(), "1000m".to_string()),
            (ANNOTATION_MEMORY.to_string(), "1Gi".to_string()),
        ]));
        rs.status = Some(AutoscalingRunnerSetStatus {
            current_runners,
        });
        rs
    }

    fn disabled_runner_set(name: &str) -> AutoscalingRunnerSet {
        let mut rs = runner_set(name, None, 0);
        rs.metadata.annotations = None;
        rs
    }

    fn reconciler_with(state: MockClusterState, config: Config) -> Reconciler {
        Reconciler::new(Arc::new(state), config)
    }

    fn empty_cluster_state() -> MockClusterState {
        let mut state = MockClusterState::new();
        state.expect_list_nodes().returning(|| Ok(vec![]));
        state.expect_list_pods().returning(|| Ok(vec![]));
        state
    }

    #[tokio::test]
    async fn test_safety_floor_overrides_calculated_zero() {
        // No capacity at all, but 13 runners are busy: the floor wins.
        let mut state = empty_cluster_state();
        state
            .expect_list_runner_sets()
            .returning(|_| Ok(vec![runner_set("busy", Some(5), 13)]));
        state
            .expect_patch_max_runners()
            .withf(|ns, name, max| ns == "ci" && name == "busy" && *max == 13)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let reconciler = reconciler_with(state, Config::default());
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_unchanged_max_is_not_patched() {
        // 10 cores / 10Gi free, one set costing 1 core/1Gi capped at 4, and
        // maxRunners already 4: nothing to do.
        let mut state = MockClusterState::new();
        state
            .expect_list_nodes()
            .returning(|| Ok(vec![ready_node("10", "10Gi")]));
        state.expect_list_pods().returning(|| Ok(vec![]));
        state
            .expect_list_runner_sets()
            .returning(|_| Ok(vec![runner_set("steady", Some(4), 0)]));
        state.expect_patch_max_runners().never();

        let reconciler = reconciler_with(state, Config::default());
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.enabled, 1);
        assert_eq!(summary.updated, 0);
    }

    #[tokio::test]
    async fn test_dry_run_never_patches() {
        let mut state = empty_cluster_state();
        state
            .expect_list_runner_sets()
            .returning(|_| Ok(vec![runner_set("busy", Some(5), 13)]));
        state.expect_patch_max_runners().never();

        let config = Config {
            dry_run: true,
            ..Default::default()
        };
        let reconciler = reconciler_with(state, config);
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn test_patch_failure_does_not_abort_the_tick() {
        let mut state = empty_cluster_state();
        state.expect_list_runner_sets().returning(|_| {
            Ok(vec![
                runner_set("flaky", Some(1), 3),
                runner_set("healthy", Some(1), 2),
            ])
        });
        state
            .expect_patch_max_runners()
            .withf(|_, name, _| name == "flaky")
            .times(1)
            .returning(|_, _, _| Err(Error::list("injected failure")));
        state
            .expect_patch_max_runners()
            .withf(|_, name, _| name == "healthy")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let reconciler = reconciler_with(state, Config::default());
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_capacity_failure_aborts_the_tick() {
        let mut state = MockClusterState::new();
        state
            .expect_list_nodes()
            .returning(|| Err(Error::list("api server down")));
        state.expect_list_runner_sets().never();

        let reconciler = reconciler_with(state, Config::default());
        let err = reconciler.reconcile_once().await.unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_the_tick() {
        let mut state = empty_cluster_state();
        state
            .expect_list_runner_sets()
            .returning(|_| Err(Error::list("forbidden")));
        state.expect_patch_max_runners().never();

        let reconciler = reconciler_with(state, Config::default());
        let err = reconciler.reconcile_once().await.unwrap_err();
        assert!(matches!(err, Error::List(_)));
    }

    #[tokio::test]
    async fn test_disabled_and_invalid_sets_are_skipped() {
        let mut state = empty_cluster_state();
        state.expect_list_runner_sets().returning(|_| {
            let mut invalid = runner_set("misconfigured", None, 0);
            invalid
                .metadata
                .annotations
                .as_mut()
                .unwrap()
                .insert(ANNOTATION_CPU.to_string(), "lots".to_string());
            Ok(vec![
                disabled_runner_set("opted-out"),
                invalid,
                runner_set("good", None, 2),
            ])
        });
        state
            .expect_patch_max_runners()
            .withf(|_, name, max| name == "good" && *max == 2)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let reconciler = reconciler_with(state, Config::default());
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.enabled, 1);
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn test_no_runner_sets_is_a_quiet_tick() {
        let mut state = empty_cluster_state();
        state.expect_list_runner_sets().returning(|_| Ok(vec![]));

        let reconciler = reconciler_with(state, Config::default());
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary, TickSummary::default());
    }

    #[tokio::test]
    async fn test_run_returns_after_cancellation() {
        let mut state = empty_cluster_state();
        state.expect_list_runner_sets().returning(|_| Ok(vec![]));

        let reconciler = reconciler_with(state, Config::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        // The pre-cancelled token stops the loop right after the initial tick
        tokio::time::timeout(Duration::from_secs(5), reconciler.run(cancel))
            .await
            .expect("loop must observe cancellation")
            .unwrap();
    }
}
