use std::{collections::BTreeMap, fmt::Display};

use burrow_core::node::NodeRecord;
use ipnet::Ipv4Net;
use log::{debug, info, warn};

use crate::routes::{RouteEntry, RouteTable};

use self::{context::ReconcilerContext, error::ReconcilerError};

pub mod context;
pub mod error;

/// Routes changed by a single pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<Ipv4Net>,
    pub replaced: Vec<Ipv4Net>,
    pub deleted: Vec<Ipv4Net>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.replaced.is_empty() && self.deleted.is_empty()
    }
}

impl Display for ReconcileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} replaced, {} deleted",
            self.added.len(),
            self.replaced.len(),
            self.deleted.len()
        )
    }
}

/// Keeps one kernel route per remote node subnet, pointing at that node's
/// internal address through the uplink.
///
/// The cache only ever holds routes the kernel accepted. A failed pass leaves
/// it describing exactly what was applied before the failure.
#[derive(Debug)]
pub struct RouteReconciler<T: RouteTable> {
    context: ReconcilerContext,
    table: T,
    cache: BTreeMap<Ipv4Net, RouteEntry>,
}

impl<T: RouteTable> RouteReconciler<T> {
    /// Seeds the cache from routes already on the uplink, so routes installed
    /// by a previous run are updated or removed rather than duplicated.
    pub async fn initialize(context: ReconcilerContext, table: T) -> Result<Self, ReconcilerError> {
        let cache = table
            .list()
            .await
            .map_err(ReconcilerError::ListError)?
            .into_iter()
            .filter(|route| route.link_index == context.uplink_index)
            .filter(|route| context.owns_destination(&route.destination))
            .map(|route| (route.destination.trunc(), route))
            .collect::<BTreeMap<_, _>>();

        info!("Found {} existing pod route(s) on the uplink", cache.len());

        Ok(Self {
            context,
            table,
            cache,
        })
    }

    pub fn cached_routes(&self) -> &BTreeMap<Ipv4Net, RouteEntry> {
        &self.cache
    }

    pub fn desired_routes(&self, nodes: &[NodeRecord]) -> BTreeMap<Ipv4Net, RouteEntry> {
        nodes
            .iter()
            .filter(|node| node.name != self.context.node_name)
            .filter_map(|node| {
                let pod_cidr = node.pod_cidr?.trunc();

                if !self.context.cluster_cidr.contains(&pod_cidr) {
                    debug!("Skipping node {}: {pod_cidr} is outside the cluster range", node.name);
                    return None;
                }

                let Some(via) = node.internal_address else {
                    warn!("Skipping node {}: it has no internal IPv4 address", node.name);
                    return None;
                };

                Some((pod_cidr, RouteEntry::new(pod_cidr, via, self.context.uplink_index)))
            })
            .collect()
    }

    /// Brings the kernel in line with `nodes`. Stops at the first failing
    /// kernel operation.
    pub async fn reconcile(&mut self, nodes: &[NodeRecord]) -> Result<ReconcileSummary, ReconcilerError> {
        let desired = self.desired_routes(nodes);
        let mut summary = ReconcileSummary::default();

        for (destination, route) in &desired {
            match self.cache.get(destination) {
                Some(cached) if cached.same_route(route) => continue,
                Some(_) => {
                    info!("Replacing route {route}");
                    self.table
                        .replace(route)
                        .await
                        .map_err(|err| ReconcilerError::ApplyError("replace", *destination, err))?;
                    summary.replaced.push(*destination);
                }
                None => {
                    info!("Adding route {route}");
                    self.table
                        .add(route)
                        .await
                        .map_err(|err| ReconcilerError::ApplyError("add", *destination, err))?;
                    summary.added.push(*destination);
                }
            }

            self.cache.insert(*destination, route.clone());
        }

        let stale = self
            .cache
            .keys()
            .filter(|destination| !desired.contains_key(destination))
            .copied()
            .collect::<Vec<_>>();

        for destination in stale {
            if let Some(route) = self.cache.get(&destination) {
                info!("Deleting route {route}");
                self.table
                    .delete(route)
                    .await
                    .map_err(|err| ReconcilerError::ApplyError("delete", destination, err))?;
            }

            self.cache.remove(&destination);
            summary.deleted.push(destination);
        }

        Ok(summary)
    }

    #[cfg(test)]
    pub fn table(&self) -> &T {
        &self.table
    }
}
