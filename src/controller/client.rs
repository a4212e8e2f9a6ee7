//! Cluster-state source abstraction
//!
//! The reconciler and capacity calculator never touch `kube::Client`
//! directly; they go through [`ClusterState`], which tests replace with a
//! mock or an in-memory fake.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::crd::AutoscalingRunnerSet;
use crate::Error;

/// Field manager name used for patches issued by this controller
const FIELD_MANAGER: &str = "gantry-controller";

/// Capability set over the cluster-state source
///
/// One method per operation the pipeline needs: node and pod listings feed
/// the capacity calculator, runner-set listing feeds the extractor, and the
/// patch publishes allocations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// List all nodes in the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// List all pods in the cluster, across namespaces
    async fn list_pods(&self) -> Result<Vec<Pod>, Error>;

    /// List runner sets in the given namespaces (empty means cluster-wide)
    async fn list_runner_sets(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<AutoscalingRunnerSet>, Error>;

    /// Partially update a runner set's `maxRunners` field
    async fn patch_max_runners(
        &self,
        namespace: &str,
        name: &str,
        max_runners: i32,
    ) -> Result<(), Error>;
}

/// Real [`ClusterState`] implementation backed by a Kubernetes client
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    /// Create a new KubeClusterState wrapping the given kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&Default::default()).await?.items)
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list(&Default::default()).await?.items)
    }

    async fn list_runner_sets(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<AutoscalingRunnerSet>, Error> {
        if namespaces.is_empty() {
            let api: Api<AutoscalingRunnerSet> = Api::all(self.client.clone());
            return Ok(api.list(&Default::default()).await?.items);
        }

        let mut all = Vec::new();
        for namespace in namespaces {
            let api: Api<AutoscalingRunnerSet> =
                Api::namespaced(self.client.clone(), namespace);
            all.extend(api.list(&Default::default()).await?.items);
        }
        Ok(all)
    }

    async fn patch_max_runners(
        &self,
        namespace: &str,
        name: &str,
        max_runners: i32,
    ) -> Result<(), Error> {
        let api: Api<AutoscalingRunnerSet> = Api::namespaced(self.client.clone(), namespace);

        let patch = serde_json::json!({
            "spec": {
                "maxRunners": max_runners
            }
        });

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}
