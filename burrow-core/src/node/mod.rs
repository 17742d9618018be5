use std::net::{AddrParseError, Ipv4Addr};

use ipnet::{AddrParseError as NetParseError, Ipv4Net, Ipv6Net};
use k8s_openapi::api::core::v1::{Node, NodeAddress};
use log::warn;
use thiserror::Error;

use crate::helpers::{NonEmpty, RequireMetadata};

pub const INTERNAL_IP_ADDRESS_TYPE: &str = "InternalIP";

#[derive(Debug, Error)]
pub enum NodeRecordError {
    #[error("Node is missing its name!")]
    MissingName,
    #[error("Node '{}' has a malformed pod CIDR '{}'! {}", .0, .1, .2)]
    MalformedPodCidr(String, String, NetParseError),
}

/// The part of a cluster node that routing cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub internal_address: Option<Ipv4Addr>,
    pub pod_cidr: Option<Ipv4Net>,
}

impl TryFrom<&Node> for NodeRecord {
    type Error = NodeRecordError;

    fn try_from(node: &Node) -> Result<Self, Self::Error> {
        let name = node.require_name_or(NodeRecordError::MissingName)?.to_owned();
        let pod_cidr = node
            .spec
            .as_ref()
            .and_then(|spec| spec.pod_cidr.as_deref())
            .non_empty()
            .map(|raw| parse_pod_cidr(&name, raw))
            .transpose()?
            .flatten();
        let internal_address = node
            .status
            .as_ref()
            .and_then(|status| status.addresses.as_ref())
            .and_then(|addresses| first_internal_ipv4(&name, addresses));

        Ok(Self {
            name,
            internal_address,
            pod_cidr,
        })
    }
}

/// IPv6 pod CIDRs fall outside any IPv4 cluster range and are treated as
/// absent.
fn parse_pod_cidr(node_name: &str, raw: &str) -> Result<Option<Ipv4Net>, NodeRecordError> {
    match raw.parse::<Ipv4Net>() {
        Ok(net) => Ok(Some(net)),
        Err(_) if raw.parse::<Ipv6Net>().is_ok() => {
            warn!("Ignoring IPv6 pod CIDR '{raw}' of node {node_name}");
            Ok(None)
        }
        Err(err) => Err(NodeRecordError::MalformedPodCidr(
            node_name.to_owned(),
            raw.to_owned(),
            err,
        )),
    }
}

fn first_internal_ipv4(node_name: &str, addresses: &[NodeAddress]) -> Option<Ipv4Addr> {
    addresses
        .iter()
        .filter(|address| address.type_ == INTERNAL_IP_ADDRESS_TYPE)
        .find_map(|address| match address.address.parse::<Ipv4Addr>() {
            Ok(ip) => Some(ip),
            Err(err) => {
                log_unusable_address(node_name, &address.address, err);
                None
            }
        })
}

fn log_unusable_address(node_name: &str, raw: &str, err: AddrParseError) {
    warn!("Ignoring internal address '{raw}' of node {node_name}: {err}");
}
