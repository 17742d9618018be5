use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use log::{debug, info};
use thiserror::Error;

use crate::{
    ip::{gateway_of, next_address, WithPrefix},
    store::{LeaseStore, StoreError},
};

#[derive(Debug, Error)]
pub enum IpamError {
    #[error("The address space of {} was exhausted!", .0)]
    AddressSpaceExhausted(Ipv4Net),
    #[error("Subnet {} is too small to hold a gateway and a single container!", .0)]
    SubnetTooSmall(Ipv4Net),
    #[error("Container '{}' has no address allocated!", .0)]
    ContainerNotFound(String),
    #[error("Lease store failure! {}", .0)]
    StoreError(StoreError),
}

impl From<StoreError> for IpamError {
    fn from(value: StoreError) -> Self {
        Self::StoreError(value)
    }
}

/// Single-address allocator over a node subnet whose first host address is
/// reserved for the bridge.
///
/// The engine itself holds no lease state; every operation locks and reloads
/// the lease store, so concurrent plugin processes see each other's changes.
#[derive(Debug)]
pub struct Ipam<'a> {
    subnet: Ipv4Net,
    gateway: Ipv4Addr,
    store: &'a LeaseStore,
}

impl<'a> Ipam<'a> {
    pub fn new(subnet: Ipv4Net, store: &'a LeaseStore) -> Result<Self, IpamError> {
        let subnet = subnet.trunc();
        let gateway = gateway_of(&subnet).ok_or(IpamError::SubnetTooSmall(subnet))?;

        let ipam = Self {
            subnet,
            gateway,
            store,
        };

        ipam.next_address(gateway)
            .map_err(|_| IpamError::SubnetTooSmall(subnet))?;

        Ok(ipam)
    }

    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn prefix_len(&self) -> u8 {
        self.subnet.prefix_len()
    }

    /// `ip` combined with the subnet mask, as configured on an interface.
    pub fn with_prefix(&self, ip: Ipv4Addr) -> Ipv4Net {
        // the prefix comes from a valid network, so this can't fail
        ip.with_prefix(self.prefix_len()).unwrap_or(self.subnet)
    }

    pub fn next_address(&self, ip: Ipv4Addr) -> Result<Ipv4Addr, IpamError> {
        next_address(ip)
            .filter(|next| self.subnet.contains(next))
            .ok_or(IpamError::AddressSpaceExhausted(self.subnet))
    }

    /// Returns the address bound to `container_id`, binding the next free one
    /// after the last allocation if there is none yet.
    pub fn allocate(&self, container_id: &str, if_name: &str) -> Result<Ipv4Addr, IpamError> {
        let mut session = self.store.lock()?;

        if let Some(ip) = session.lookup_by_container(container_id) {
            info!("Container {container_id} already holds {ip}");
            return Ok(ip);
        }

        // a missing or foreign `last` starts the scan at the subnet's upper
        // bound, so the first candidate wraps to the address after the gateway
        let start = match session.last() {
            Some(last) if last > self.gateway && self.subnet.contains(&last) => last,
            _ => self.subnet.broadcast(),
        };
        let mut current = start;

        loop {
            current = match self.next_address(current) {
                Ok(next) => next,
                Err(_) => self.next_address(self.gateway)?,
            };

            if !session.contains(&current) {
                session.put(current, container_id, if_name)?;
                info!("Allocated {current} to container {container_id}");

                return Ok(current);
            }

            debug!("{current} is taken, moving on");

            if current == start {
                return Err(IpamError::AddressSpaceExhausted(self.subnet));
            }
        }
    }

    /// Frees whatever `container_id` holds. Unknown containers are not an error.
    pub fn release(&self, container_id: &str) -> Result<(), IpamError> {
        let mut session = self.store.lock()?;

        match session.remove(container_id)? {
            Some(ip) => info!("Released {ip} held by container {container_id}"),
            None => debug!("Container {container_id} held no address, nothing to release"),
        }

        Ok(())
    }

    pub fn check(&self, container_id: &str) -> Result<Ipv4Addr, IpamError> {
        let session = self.store.lock()?;

        session
            .lookup_by_container(container_id)
            .ok_or_else(|| IpamError::ContainerNotFound(container_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ipnet::Ipv4Net;
    use tempfile::TempDir;

    use crate::store::LeaseStore;

    use super::{Ipam, IpamError};

    fn store() -> (TempDir, LeaseStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LeaseStore::open(dir.path(), "burrow").unwrap();

        (dir, store)
    }

    fn subnet(raw: &str) -> Ipv4Net {
        raw.parse().unwrap()
    }

    #[test]
    fn gateway_is_first_host_address() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.244.1.0/24"), &store).unwrap();

        assert_eq!(ipam.gateway(), Ipv4Addr::new(10, 244, 1, 1));
        assert_eq!(ipam.with_prefix(ipam.gateway()).to_string(), "10.244.1.1/24");
    }

    #[test]
    fn host_bits_in_subnet_are_dropped() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.244.1.77/24"), &store).unwrap();

        assert_eq!(ipam.subnet(), subnet("10.244.1.0/24"));
        assert_eq!(ipam.gateway(), Ipv4Addr::new(10, 244, 1, 1));
    }

    #[test]
    fn allocates_sequentially_after_gateway() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.244.1.0/24"), &store).unwrap();

        let allocated = ["a", "b", "c"]
            .iter()
            .map(|id| ipam.allocate(id, "eth0").unwrap())
            .collect::<Vec<_>>();

        assert_eq!(
            allocated,
            vec![
                Ipv4Addr::new(10, 244, 1, 2),
                Ipv4Addr::new(10, 244, 1, 3),
                Ipv4Addr::new(10, 244, 1, 4),
            ]
        );
    }

    #[test]
    fn allocation_is_idempotent_per_container() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.244.1.0/24"), &store).unwrap();

        let first = ipam.allocate("a", "eth0").unwrap();
        ipam.allocate("b", "eth0").unwrap();
        let last_before = store.lock().unwrap().last();

        let again = ipam.allocate("a", "eth0").unwrap();

        assert_eq!(first, again);
        assert_eq!(store.lock().unwrap().last(), last_before);
    }

    #[test]
    fn exhausted_subnet_reports_error() {
        let (_dir, store) = store();
        // network .0, gateway .1, allocatable .2 and .3
        let ipam = Ipam::new(subnet("10.0.0.0/30"), &store).unwrap();

        assert_eq!(ipam.allocate("a", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(ipam.allocate("b", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 3));
        assert!(matches!(
            ipam.allocate("c", "eth0"),
            Err(IpamError::AddressSpaceExhausted(_))
        ));
        assert!(matches!(
            ipam.allocate("d", "eth0"),
            Err(IpamError::AddressSpaceExhausted(_))
        ));
    }

    #[test]
    fn released_address_is_reused_only_after_wrapping() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.0.0.0/29"), &store).unwrap();

        for id in ["a", "b", "c"] {
            ipam.allocate(id, "eth0").unwrap();
        }

        ipam.release("a").unwrap();

        // .2 is free again, but the scan continues after .4
        assert_eq!(ipam.allocate("d", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(ipam.allocate("e", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 6));
        assert_eq!(ipam.allocate("f", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(ipam.allocate("g", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert!(matches!(
            ipam.allocate("h", "eth0"),
            Err(IpamError::AddressSpaceExhausted(_))
        ));
    }

    #[test]
    fn released_address_right_after_last_is_reused_immediately() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.0.0.0/29"), &store).unwrap();

        for id in ["a", "b", "c", "d", "e", "f"] {
            ipam.allocate(id, "eth0").unwrap();
        }

        ipam.release("a").unwrap();
        assert_eq!(ipam.allocate("g", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 2));

        // last is .2 now, so a freed .3 is the very next candidate
        ipam.release("b").unwrap();
        assert_eq!(ipam.allocate("h", "eth0").unwrap(), Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn release_of_unknown_container_changes_nothing() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.244.1.0/24"), &store).unwrap();

        ipam.allocate("a", "eth0").unwrap();
        let before = store.lock().unwrap().snapshot().clone();

        ipam.release("unknown").unwrap();

        assert_eq!(store.lock().unwrap().snapshot(), &before);
    }

    #[test]
    fn check_distinguishes_known_and_unknown_containers() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.244.1.0/24"), &store).unwrap();

        let ip = ipam.allocate("a", "eth0").unwrap();

        assert_eq!(ipam.check("a").unwrap(), ip);
        assert!(matches!(
            ipam.check("b"),
            Err(IpamError::ContainerNotFound(id)) if id == "b"
        ));
    }

    #[test]
    fn too_small_subnets_are_rejected_up_front() {
        let (_dir, store) = store();

        assert!(matches!(
            Ipam::new(subnet("10.0.0.0/31"), &store),
            Err(IpamError::SubnetTooSmall(_))
        ));
        assert!(matches!(
            Ipam::new(subnet("10.0.0.0/32"), &store),
            Err(IpamError::SubnetTooSmall(_))
        ));
    }

    #[test]
    fn stale_last_outside_subnet_restarts_after_gateway() {
        let (_dir, store) = store();

        store
            .lock()
            .unwrap()
            .put(Ipv4Addr::new(10, 244, 9, 9), "old", "eth0")
            .unwrap();

        let ipam = Ipam::new(subnet("10.244.1.0/24"), &store).unwrap();

        assert_eq!(ipam.allocate("a", "eth0").unwrap(), Ipv4Addr::new(10, 244, 1, 2));
    }

    #[test]
    fn next_address_stays_inside_subnet() {
        let (_dir, store) = store();
        let ipam = Ipam::new(subnet("10.244.1.0/24"), &store).unwrap();

        assert_eq!(
            ipam.next_address(Ipv4Addr::new(10, 244, 1, 254)).unwrap(),
            Ipv4Addr::new(10, 244, 1, 255)
        );
        assert!(matches!(
            ipam.next_address(Ipv4Addr::new(10, 244, 1, 255)),
            Err(IpamError::AddressSpaceExhausted(_))
        ));
    }
}
