use std::{
    io::{self, ErrorKind},
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use ipnet::Ipv4Net;
use log::{debug, info, warn};
use thiserror::Error;

use crate::iproute::{ip, link_by_name, IpCommandError, LinkInfo};

use self::netns::NetNs;

pub mod netns;

const HOST_VETH_PREFIX: &str = "veth";
const PEER_VETH_PREFIX: &str = "burrow";

#[derive(Debug, Error)]
pub enum DataplaneError {
    #[error("Kernel operation failed! {}", .0)]
    IpCommandError(IpCommandError),
    #[error("Couldn't open network namespace '{}'! {}", .0.display(), .1)]
    NamespaceError(PathBuf, io::Error),
    #[error("Couldn't switch to network namespace '{}'! {}", .0.display(), .1)]
    SetNsError(PathBuf, nix::Error),
    #[error("Interface '{}' doesn't exist!", .0)]
    InterfaceNotFound(String),
    #[error("Interface '{}' doesn't hold {}!", .0, .1)]
    AddressMismatch(String, Ipv4Addr),
}

impl From<IpCommandError> for DataplaneError {
    fn from(value: IpCommandError) -> Self {
        Self::IpCommandError(value)
    }
}

/// Both ends of a freshly wired veth pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedInterfaces {
    pub host: LinkInfo,
    pub container: LinkInfo,
}

pub fn open_netns(path: &Path) -> Result<NetNs, DataplaneError> {
    NetNs::open(path).map_err(|err| DataplaneError::NamespaceError(path.to_owned(), err))
}

/// Returns the bridge called `name`, creating it with `gateway` assigned when
/// it doesn't exist yet.
pub fn ensure_bridge(name: &str, mtu: u32, gateway: Ipv4Net) -> Result<LinkInfo, DataplaneError> {
    if let Some(bridge) = link_by_name(name)? {
        if bridge.is_up() {
            debug!("Bridge {name} already exists");
            return Ok(bridge);
        }

        info!("Bringing bridge {name} up...");
        ip(["link", "set", name, "up"])?;

        return link_by_name(name)?.ok_or_else(|| DataplaneError::InterfaceNotFound(name.to_owned()));
    }

    info!("Creating bridge {name} with {gateway}...");

    let mtu = mtu.to_string();
    let gateway = gateway.to_string();

    // concurrent invocations race to create the bridge, losing is fine
    ignore_existing(ip(["link", "add", "name", name, "mtu", &mtu, "type", "bridge"]))?;
    ignore_existing(ip(["addr", "add", &gateway, "dev", name]))?;
    ip(["link", "set", name, "up"])?;

    link_by_name(name)?.ok_or_else(|| DataplaneError::InterfaceNotFound(name.to_owned()))
}

fn ignore_existing(result: Result<String, IpCommandError>) -> Result<(), IpCommandError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_already_exists() => Ok(()),
        Err(err) => Err(err),
    }
}

/// Connects the namespace at `netns` to `bridge` through a new veth pair,
/// configuring `address` and a default route via `gateway` on the container end.
pub fn attach_container(
    netns: &NetNs,
    bridge: &str,
    mtu: u32,
    if_name: &str,
    address: Ipv4Net,
    gateway: Ipv4Addr,
) -> Result<AttachedInterfaces, DataplaneError> {
    let suffix = format!("{:08x}", rand::random::<u32>());
    let host_veth = format!("{HOST_VETH_PREFIX}{suffix}");
    let peer_veth = format!("{PEER_VETH_PREFIX}{suffix}");
    let mtu = mtu.to_string();
    let netns_path = netns.path().to_string_lossy().into_owned();

    info!("Attaching {if_name} ({address}) in {netns_path} to {bridge} via {host_veth}...");

    ip([
        "link", "add", &host_veth, "mtu", &mtu, "type", "veth", "peer", "name", &peer_veth,
        "mtu", &mtu,
    ])?;

    let container = ip(["link", "set", &peer_veth, "netns", &netns_path])
        .map_err(DataplaneError::from)
        .and_then(|_| {
            netns.run(|| configure_container_end(&peer_veth, if_name, address, gateway))
        });

    let container = match container {
        Ok(container) => container,
        Err(err) => {
            remove_dangling_veth(&host_veth);
            return Err(err);
        }
    };

    ip(["link", "set", &host_veth, "master", bridge])?;
    ip(["link", "set", &host_veth, "up"])?;

    let host = link_by_name(&host_veth)?
        .ok_or_else(|| DataplaneError::InterfaceNotFound(host_veth.clone()))?;

    Ok(AttachedInterfaces { host, container })
}

fn configure_container_end(
    peer_veth: &str,
    if_name: &str,
    address: Ipv4Net,
    gateway: Ipv4Addr,
) -> Result<LinkInfo, DataplaneError> {
    let address = address.to_string();
    let gateway = gateway.to_string();

    ip(["link", "set", peer_veth, "name", if_name])?;
    ip(["addr", "add", &address, "dev", if_name])?;
    ip(["link", "set", if_name, "up"])?;
    ip(["route", "add", "default", "via", &gateway, "dev", if_name])?;

    link_by_name(if_name)?.ok_or_else(|| DataplaneError::InterfaceNotFound(if_name.to_owned()))
}

// removing one end of a veth pair takes the other one with it
fn remove_dangling_veth(host_veth: &str) {
    if let Err(err) = ip(["link", "del", host_veth]) {
        if !err.is_not_found() {
            warn!("Couldn't clean up {host_veth}! {err}");
        }
    }
}

/// Removes `if_name` from the namespace at `netns_path`. A missing interface
/// or an already destroyed namespace count as done.
pub fn detach_container(netns_path: &Path, if_name: &str) -> Result<(), DataplaneError> {
    if netns_path.as_os_str().is_empty() {
        debug!("No network namespace given, nothing to detach");
        return Ok(());
    }

    let netns = match NetNs::open(netns_path) {
        Ok(netns) => netns,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("Network namespace {netns_path:?} is already gone");
            return Ok(());
        }
        Err(err) => return Err(DataplaneError::NamespaceError(netns_path.to_owned(), err)),
    };

    netns.run(|| match ip(["link", "del", if_name]) {
        Ok(_) => {
            info!("Removed {if_name} from {netns_path:?}");
            Ok(())
        }
        Err(err) if err.is_not_found() => {
            debug!("{if_name} is already gone from {netns_path:?}");
            Ok(())
        }
        Err(err) => Err(err.into()),
    })
}

/// Confirms that `if_name` inside `netns` holds `expected`.
pub fn verify_container(
    netns: &NetNs,
    if_name: &str,
    expected: Ipv4Addr,
) -> Result<(), DataplaneError> {
    netns.run(|| {
        let link = link_by_name(if_name)?
            .ok_or_else(|| DataplaneError::InterfaceNotFound(if_name.to_owned()))?;

        if link.has_address(&expected) {
            Ok(())
        } else {
            Err(DataplaneError::AddressMismatch(if_name.to_owned(), expected))
        }
    })
}
