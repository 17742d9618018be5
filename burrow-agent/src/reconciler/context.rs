use burrow_core::node::NodeRecord;
use derive_builder::Builder;
use ipnet::Ipv4Net;

use super::error::ReconcilerError;

/// What the reconciler knows about the node it runs on.
#[derive(Debug, Clone, Builder)]
pub struct ReconcilerContext {
    #[builder(setter(into))]
    pub node_name: String,
    pub subnet: Ipv4Net,
    pub cluster_cidr: Ipv4Net,
    pub uplink_index: u32,
}

impl ReconcilerContextBuilder {
    pub fn with_node(&mut self, node: &NodeRecord) -> &mut Self {
        let builder = self.node_name(node.name.to_owned());

        match node.pod_cidr {
            Some(subnet) => builder.subnet(subnet.trunc()),
            None => builder,
        }
    }
}

impl ReconcilerContext {
    pub fn validated(self) -> Result<Self, ReconcilerError> {
        if !self.cluster_cidr.contains(&self.subnet) {
            return Err(ReconcilerError::SubnetOutsideCluster(
                self.subnet,
                self.cluster_cidr,
            ));
        }

        Ok(self)
    }

    /// Kernel routes this node is responsible for: remote pod subnets on the
    /// uplink.
    pub fn owns_destination(&self, destination: &Ipv4Net) -> bool {
        self.cluster_cidr.contains(destination) && destination.trunc() != self.subnet
    }
}
