use futures::{Future, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Node, NodeSpec, NodeStatus};
use kube::{
    runtime::{
        reflector::{self, reflector, Store},
        watcher::{watcher, Config},
    },
    Api, Client, ResourceExt,
};
use log::warn;
use tokio::sync::watch::{self, Receiver};

pub async fn get_own_node(client: &Client, name: &str) -> kube::Result<Node> {
    Api::<Node>::all(client.clone()).get(name).await
}

/// Mirrors every node of the cluster, keeping only the pod CIDR and the
/// addresses. Each watch event, deletions included, bumps the returned signal.
pub fn start_node_reflector(
    client: &Client,
) -> (impl Future<Output = ()>, Store<Node>, Receiver<()>) {
    let (tx, rx) = watch::channel::<()>(());

    let watcher_config = Config::default();
    let watcher = watcher(Api::<Node>::all(client.clone()), watcher_config)
        .map_ok(|event| event.modify(trim_node));

    let (store, writer) = reflector::store();
    let reflector = reflector(writer, watcher).for_each(move |event| {
        if let Err(err) = event {
            warn!("Node watch failed! {err}");
        }

        tx.send_replace(());
        std::future::ready(())
    });

    (reflector, store, rx)
}

fn trim_node(node: &mut Node) {
    node.managed_fields_mut().clear();
    node.annotations_mut().clear();
    node.labels_mut().clear();
    node.finalizers_mut().clear();
    node.owner_references_mut().clear();

    let pod_cidr = node.spec.as_ref().and_then(|spec| spec.pod_cidr.to_owned());
    let addresses = node
        .status
        .as_ref()
        .and_then(|status| status.addresses.to_owned());

    node.spec = Some(NodeSpec {
        pod_cidr,
        ..Default::default()
    });
    node.status = Some(NodeStatus {
        addresses,
        ..Default::default()
    });
}
