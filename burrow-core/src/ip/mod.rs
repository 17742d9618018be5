use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// Increments an address by one, carrying across octets.
pub fn next_address(ip: Ipv4Addr) -> Option<Ipv4Addr> {
    u32::from(ip).checked_add(1).map(Ipv4Addr::from)
}

/// The first address after the network address, reserved for the bridge.
pub fn gateway_of(subnet: &Ipv4Net) -> Option<Ipv4Addr> {
    next_address(subnet.network()).filter(|gateway| subnet.contains(gateway))
}

pub trait WithPrefix {
    fn with_prefix(self, prefix_len: u8) -> Option<Ipv4Net>;
}

impl WithPrefix for Ipv4Addr {
    fn with_prefix(self, prefix_len: u8) -> Option<Ipv4Net> {
        Ipv4Net::new(self, prefix_len).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ipnet::Ipv4Net;

    use super::{gateway_of, next_address, WithPrefix};

    #[test]
    fn next_address_carries_across_octets() {
        assert_eq!(
            next_address(Ipv4Addr::new(10, 244, 1, 255)),
            Some(Ipv4Addr::new(10, 244, 2, 0))
        );
        assert_eq!(
            next_address(Ipv4Addr::new(10, 255, 255, 255)),
            Some(Ipv4Addr::new(11, 0, 0, 0))
        );
        assert_eq!(next_address(Ipv4Addr::BROADCAST), None);
    }

    #[test]
    fn gateway_is_first_address_after_network() {
        let subnet: Ipv4Net = "10.244.1.0/24".parse().unwrap();

        assert_eq!(gateway_of(&subnet), Some(Ipv4Addr::new(10, 244, 1, 1)));
    }

    #[test]
    fn host_route_has_no_gateway() {
        let subnet: Ipv4Net = "10.244.1.7/32".parse().unwrap();

        assert_eq!(gateway_of(&subnet), None);
    }

    #[test]
    fn with_prefix_keeps_host_bits() {
        let net = Ipv4Addr::new(10, 244, 1, 2).with_prefix(24).unwrap();

        assert_eq!(net.to_string(), "10.244.1.2/24");
        assert!(Ipv4Addr::new(10, 244, 1, 2).with_prefix(33).is_none());
    }
}
