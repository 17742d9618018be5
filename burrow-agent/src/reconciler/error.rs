use ipnet::Ipv4Net;
use thiserror::Error;

use crate::routes::RouteTableError;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Node subnet {} lies outside the cluster range {}!", .0, .1)]
    SubnetOutsideCluster(Ipv4Net, Ipv4Net),
    #[error("Couldn't read the kernel routing table! Reason: {}", .0)]
    ListError(RouteTableError),
    #[error("Couldn't {} route to {}! Reason: {}", .0, .1, .2)]
    ApplyError(&'static str, Ipv4Net, RouteTableError),
}
