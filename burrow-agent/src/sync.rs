use burrow_core::node::{NodeRecord, NodeRecordError};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::Store;
use log::{error, info};
use tokio::sync::watch::Receiver;

use crate::{reconciler::RouteReconciler, routes::RouteTable};

pub enum LoopCommand {
    Continue,
    Break,
}

/// Runs a reconcile pass whenever the node reflector signals a change.
/// Bursts of events collapse into a single pass over the latest state.
pub struct RouteSynchronizer<T: RouteTable> {
    reconciler: RouteReconciler<T>,
    refresh_signal: Receiver<()>,
    nodes: Store<Node>,
}

impl<T: RouteTable> RouteSynchronizer<T> {
    pub fn new(reconciler: RouteReconciler<T>, nodes: Store<Node>, refresh_signal: Receiver<()>) -> Self {
        Self {
            reconciler,
            refresh_signal,
            nodes,
        }
    }

    pub async fn start(&mut self) {
        info!("Starting route synchronization...");

        while let LoopCommand::Continue = self.wait_and_synchronize().await {}

        info!("Exiting route synchronization...");
    }

    async fn wait_and_synchronize(&mut self) -> LoopCommand {
        if self.refresh_signal.changed().await.is_err() {
            return LoopCommand::Break;
        }

        self.synchronize().await;

        LoopCommand::Continue
    }

    async fn synchronize(&mut self) {
        let nodes = match self.node_records() {
            Ok(nodes) => nodes,
            Err(err) => {
                error!("Skipping route synchronization! {err}");
                return;
            }
        };

        match self.reconciler.reconcile(&nodes).await {
            Ok(summary) if summary.is_empty() => info!("Routes are up to date"),
            Ok(summary) => info!("Routes synchronized: {summary}"),
            Err(err) => error!("Route synchronization failed! {err}"),
        }
    }

    fn node_records(&self) -> Result<Vec<NodeRecord>, NodeRecordError> {
        self.nodes
            .state()
            .iter()
            .map(|node| NodeRecord::try_from(node.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::{
        api::core::v1::{Node, NodeAddress, NodeSpec, NodeStatus},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };
    use kube::runtime::{reflector, watcher::Event};
    use tokio::sync::watch;

    use crate::reconciler::{
        tests::{context, net, Call, MockRouteTable},
        RouteReconciler,
    };

    use super::{LoopCommand, RouteSynchronizer};

    fn node(name: &str, address: &str, pod_cidr: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                pod_cidr: Some(pod_cidr.to_owned()),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    address: address.to_owned(),
                    type_: "InternalIP".to_owned(),
                }]),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn signal_triggers_pass_over_store_contents() {
        let (store, mut writer) = reflector::store::<Node>();
        let (tx, rx) = watch::channel(());
        let reconciler = RouteReconciler::initialize(context(), MockRouteTable::default())
            .await
            .unwrap();
        let mut synchronizer = RouteSynchronizer::new(reconciler, store, rx);

        writer.apply_watcher_event(&Event::Restarted(vec![
            node("A", "192.168.1.2", "10.244.1.0/24"),
            node("B", "192.168.1.3", "10.244.2.0/24"),
        ]));
        tx.send_replace(());

        assert!(matches!(
            synchronizer.wait_and_synchronize().await,
            LoopCommand::Continue
        ));
        assert_eq!(
            synchronizer.reconciler.table().calls,
            vec![Call::Add(net("10.244.2.0/24"))]
        );

        writer.apply_watcher_event(&Event::Deleted(node("B", "192.168.1.3", "10.244.2.0/24")));
        tx.send_replace(());
        synchronizer.wait_and_synchronize().await;

        assert!(synchronizer.reconciler.cached_routes().is_empty());
    }

    #[tokio::test]
    async fn malformed_node_skips_the_pass() {
        let (store, mut writer) = reflector::store::<Node>();
        let (tx, rx) = watch::channel(());
        let reconciler = RouteReconciler::initialize(context(), MockRouteTable::default())
            .await
            .unwrap();
        let mut synchronizer = RouteSynchronizer::new(reconciler, store, rx);

        writer.apply_watcher_event(&Event::Restarted(vec![
            node("B", "192.168.1.3", "10.244.2.0/24"),
            node("C", "192.168.1.4", "not-a-cidr"),
        ]));
        tx.send_replace(());
        synchronizer.wait_and_synchronize().await;

        assert!(synchronizer.reconciler.table().calls.is_empty());
    }

    #[tokio::test]
    async fn ipv6_node_does_not_block_the_pass() {
        let (store, mut writer) = reflector::store::<Node>();
        let (tx, rx) = watch::channel(());
        let reconciler = RouteReconciler::initialize(context(), MockRouteTable::default())
            .await
            .unwrap();
        let mut synchronizer = RouteSynchronizer::new(reconciler, store, rx);

        writer.apply_watcher_event(&Event::Restarted(vec![
            node("B", "192.168.1.3", "10.244.2.0/24"),
            node("C", "192.168.1.4", "fd00:10:244:3::/64"),
        ]));
        tx.send_replace(());
        synchronizer.wait_and_synchronize().await;

        assert_eq!(
            synchronizer.reconciler.table().calls,
            vec![Call::Add(net("10.244.2.0/24"))]
        );
    }

    #[tokio::test]
    async fn closed_signal_stops_the_loop() {
        let (store, _writer) = reflector::store::<Node>();
        let (tx, rx) = watch::channel(());
        let reconciler = RouteReconciler::initialize(context(), MockRouteTable::default())
            .await
            .unwrap();
        let mut synchronizer = RouteSynchronizer::new(reconciler, store, rx);

        drop(tx);

        assert!(matches!(
            synchronizer.wait_and_synchronize().await,
            LoopCommand::Break
        ));
    }
}
