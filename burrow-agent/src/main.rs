use std::{net::Ipv4Addr, process::exit};

use burrow_core::{
    config::SubnetConfig,
    dataplane::ensure_bridge,
    iproute::LinkInfo,
    ip::{gateway_of, WithPrefix},
    node::NodeRecord,
};
use clap::Parser;
use kube::Client;
use log::{error, info, warn};
use tokio::join;

use crate::{
    config::AgentConfig,
    host::find_uplink,
    nat::{ensure_rules, forwarding_rules},
    node::{get_own_node, start_node_reflector},
    reconciler::{
        context::{ReconcilerContext, ReconcilerContextBuilder},
        RouteReconciler,
    },
    routes::IpRouteTable,
    sync::RouteSynchronizer,
};

mod config;
mod host;
mod nat;
mod node;
mod reconciler;
mod routes;
mod sync;

#[tokio::main]
async fn main() {
    let config = AgentConfig::parse();

    configure_logger(&config);

    let client = create_client().await;
    let own_node = get_own_node_record(&client, &config.node_name).await;
    let internal_address = own_node.internal_address.unwrap_or_else(|| {
        error!("Node {} has no internal IPv4 address!", own_node.name);
        exit(9)
    });

    let uplink = get_uplink(internal_address);
    let context = get_reconciler_context(&config, &own_node, &uplink);

    publish_subnet(&config, &context);
    prepare_bridge(&config, &context);

    if config.enable_iptables {
        ensure_rules(&forwarding_rules(&config.bridge, &uplink.ifname, context.subnet))
            .await
            .unwrap_or_else(|err| {
                error!("Couldn't install forwarding rules! {err}");
                exit(13)
            });
    }

    let reconciler = RouteReconciler::initialize(context, IpRouteTable::new(&uplink))
        .await
        .unwrap_or_else(|err| {
            error!("Couldn't read existing routes! {err}");
            exit(14)
        });

    let (reflector, store, refresh_signal) = start_node_reflector(&client);
    let mut synchronizer = RouteSynchronizer::new(reconciler, store, refresh_signal);

    join!(reflector, synchronizer.start());
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            error!("Couldn't create client! {error:?}");
            exit(6)
        }
    }
}

async fn get_own_node_record(client: &Client, name: &str) -> NodeRecord {
    let node = get_own_node(client, name).await.unwrap_or_else(|err| {
        error!("Couldn't retrieve node {name}! {err}");
        exit(7)
    });

    NodeRecord::try_from(&node).unwrap_or_else(|err| {
        error!("Invalid node data! {err}");
        exit(8)
    })
}

fn get_uplink(internal_address: Ipv4Addr) -> LinkInfo {
    find_uplink(internal_address).unwrap_or_else(|err| {
        error!("Couldn't find the uplink interface! {err}");
        exit(10)
    })
}

fn get_reconciler_context(
    config: &AgentConfig,
    own_node: &NodeRecord,
    uplink: &LinkInfo,
) -> ReconcilerContext {
    ReconcilerContextBuilder::default()
        .with_node(own_node)
        .cluster_cidr(config.cluster_cidr.trunc())
        .uplink_index(uplink.ifindex)
        .build()
        .unwrap_or_else(|err| {
            error!("Node {} has no pod CIDR assigned! {err}", own_node.name);
            exit(11)
        })
        .validated()
        .unwrap_or_else(|err| {
            error!("Invalid node configuration! {err}");
            exit(12)
        })
}

fn publish_subnet(config: &AgentConfig, context: &ReconcilerContext) {
    let subnet_config = SubnetConfig {
        subnet: context.subnet,
        bridge: config.bridge.to_owned(),
    };

    subnet_config.store(&config.subnet_file).unwrap_or_else(|err| {
        error!("Couldn't publish the node subnet! {err}");
        exit(15)
    });

    info!(
        "Published subnet {} to {}",
        context.subnet,
        config.subnet_file.display()
    );
}

// the plugin creates the bridge on demand too, so failing here isn't fatal
fn prepare_bridge(config: &AgentConfig, context: &ReconcilerContext) {
    let gateway = gateway_of(&context.subnet).and_then(|ip| ip.with_prefix(context.subnet.prefix_len()));

    let Some(gateway) = gateway else {
        warn!("Subnet {} has no room for a bridge address", context.subnet);
        return;
    };

    if let Err(err) = ensure_bridge(&config.bridge, config.mtu, gateway) {
        warn!("Couldn't prepare bridge {}! {err}", config.bridge);
    }
}

fn configure_logger(config: &AgentConfig) {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(config.log_level())
        .parse_default_env()
        .init()
}
