use std::net::Ipv4Addr;

use burrow_core::iproute::{ipv4_links, IpCommandError, LinkInfo};
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Couldn't list host interfaces! {}", .0)]
    IpCommandError(#[from] IpCommandError),
    #[error("No host interface holds {}!", .0)]
    UplinkNotFound(Ipv4Addr),
}

/// Finds the interface carrying the node's internal address. Routes to other
/// nodes leave through it.
pub fn find_uplink(internal_address: Ipv4Addr) -> Result<LinkInfo, HostError> {
    let uplink = select_uplink(ipv4_links()?, internal_address)
        .ok_or(HostError::UplinkNotFound(internal_address))?;

    info!(
        "Using {} (index {}) as the uplink",
        uplink.ifname, uplink.ifindex
    );

    Ok(uplink)
}

fn select_uplink(links: Vec<LinkInfo>, internal_address: Ipv4Addr) -> Option<LinkInfo> {
    links
        .into_iter()
        .find(|link| link.has_address(&internal_address))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use burrow_core::iproute::{AddrInfo, LinkInfo};

    use super::select_uplink;

    fn link(ifindex: u32, ifname: &str, address: Ipv4Addr) -> LinkInfo {
        LinkInfo {
            ifindex,
            ifname: ifname.to_owned(),
            addr_info: vec![AddrInfo {
                family: "inet".to_owned(),
                local: IpAddr::V4(address),
                prefixlen: 24,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn picks_interface_holding_internal_address() {
        let links = vec![
            link(1, "lo", Ipv4Addr::LOCALHOST),
            link(2, "eth0", Ipv4Addr::new(192, 168, 1, 2)),
            link(3, "cni0", Ipv4Addr::new(10, 244, 1, 1)),
        ];

        let uplink = select_uplink(links, Ipv4Addr::new(192, 168, 1, 2)).unwrap();

        assert_eq!(uplink.ifname, "eth0");
        assert_eq!(uplink.ifindex, 2);
    }

    #[test]
    fn unknown_address_has_no_uplink() {
        let links = vec![link(2, "eth0", Ipv4Addr::new(192, 168, 1, 2))];

        assert!(select_uplink(links, Ipv4Addr::new(192, 168, 1, 9)).is_none());
    }
}
