use burrow_core::{
    config::PluginConfig,
    dataplane::{attach_container, detach_container, ensure_bridge, open_netns, verify_container},
    ipam::Ipam,
    store::LeaseStore,
};
use log::info;

use crate::{
    args::CmdArgs,
    error::PluginError,
    types::{CniResult, Interface},
};

pub fn cmd_add(args: &CmdArgs, config: &PluginConfig) -> Result<CniResult, PluginError> {
    let store = LeaseStore::open(&config.data_dir, &config.name)?;
    let ipam = Ipam::new(config.subnet, &store)?;
    let gateway = ipam.gateway();

    let ip = ipam.allocate(&args.container_id, &args.if_name)?;
    let address = ipam.with_prefix(ip);

    ensure_bridge(&config.bridge, config.mtu, ipam.with_prefix(gateway))?;

    let netns = open_netns(&args.netns)?;
    let attached = attach_container(&netns, &config.bridge, config.mtu, &args.if_name, address, gateway)?;

    info!("Container {} is reachable at {address}", args.container_id);

    let mut result = CniResult::new(&config.cni_version);
    result.add_interface(Interface {
        name: attached.host.ifname,
        mac: attached.host.address,
        sandbox: None,
    });
    let container = result.add_interface(Interface {
        name: attached.container.ifname,
        mac: attached.container.address,
        sandbox: Some(args.netns.to_string_lossy().into_owned()),
    });
    result.add_ip(address, gateway, Some(container));
    result.add_default_route(gateway);

    Ok(result)
}

pub fn cmd_del(args: &CmdArgs, config: &PluginConfig) -> Result<(), PluginError> {
    let store = LeaseStore::open(&config.data_dir, &config.name)?;
    let ipam = Ipam::new(config.subnet, &store)?;

    ipam.release(&args.container_id)?;
    detach_container(&args.netns, &args.if_name)?;

    Ok(())
}

pub fn cmd_check(args: &CmdArgs, config: &PluginConfig) -> Result<(), PluginError> {
    let store = LeaseStore::open(&config.data_dir, &config.name)?;
    let ipam = Ipam::new(config.subnet, &store)?;

    let ip = ipam.check(&args.container_id)?;
    let netns = open_netns(&args.netns)?;

    verify_container(&netns, &args.if_name, ip)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::PathBuf};

    use burrow_core::{config::PluginConfig, ipam::IpamError, store::LeaseStore};

    use crate::{args::CmdArgs, error::PluginError};

    use super::{cmd_check, cmd_del};

    fn config(data_dir: PathBuf) -> PluginConfig {
        PluginConfig {
            cni_version: "1.0.0".to_owned(),
            name: "burrow".to_owned(),
            data_dir,
            subnet: "10.244.1.0/24".parse().unwrap(),
            bridge: "cni0".to_owned(),
            mtu: 1500,
        }
    }

    fn args(container_id: &str) -> CmdArgs {
        CmdArgs {
            container_id: container_id.to_owned(),
            netns: PathBuf::new(),
            if_name: "eth0".to_owned(),
            args: HashMap::new(),
            path: Vec::new(),
        }
    }

    #[test]
    fn del_releases_lease_without_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path().to_owned());
        let store = LeaseStore::open(dir.path(), "burrow").unwrap();

        store
            .lock()
            .unwrap()
            .put("10.244.1.2".parse().unwrap(), "abc123", "eth0")
            .unwrap();

        cmd_del(&args("abc123"), &config).unwrap();

        assert_eq!(store.lock().unwrap().lookup_by_container("abc123"), None);
    }

    #[test]
    fn del_of_unknown_container_succeeds() {
        let dir = tempfile::tempdir().unwrap();

        cmd_del(&args("never-added"), &config(dir.path().to_owned())).unwrap();
    }

    #[test]
    fn check_of_unknown_container_fails() {
        let dir = tempfile::tempdir().unwrap();

        let result = cmd_check(&args("never-added"), &config(dir.path().to_owned()));

        assert!(matches!(
            result,
            Err(PluginError::IpamError(IpamError::ContainerNotFound(_)))
        ));
    }
}
