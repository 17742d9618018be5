use std::path::PathBuf;

use burrow_core::config::{DEFAULT_BRIDGE_NAME, DEFAULT_MTU, DEFAULT_SUBNET_FILE};
use clap::Parser;
use ipnet::Ipv4Net;

pub const CLUSTER_CIDR_ENV: &str = "BURROW_CLUSTER_CIDR";
pub const NODE_NAME_ENV: &str = "NODE_NAME";
pub const ENABLE_IPTABLES_ENV: &str = "BURROW_ENABLE_IPTABLES";

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct AgentConfig {
    /// cluster-wide pod address range, every node subnet is carved out of it
    #[arg(long, env = CLUSTER_CIDR_ENV)]
    pub cluster_cidr: Ipv4Net,
    /// name of the node this agent runs on
    #[arg(long, env = NODE_NAME_ENV)]
    pub node_name: String,
    /// install forwarding and masquerade rules for the node subnet
    #[arg(long, env = ENABLE_IPTABLES_ENV)]
    pub enable_iptables: bool,
    /// bridge the plugin attaches containers to
    #[arg(long, default_value = DEFAULT_BRIDGE_NAME)]
    pub bridge: String,
    /// where to publish the node subnet for the plugin
    #[arg(long, default_value = DEFAULT_SUBNET_FILE)]
    pub subnet_file: PathBuf,
    /// MTU of the bridge
    #[arg(long, default_value_t = DEFAULT_MTU)]
    pub mtu: u32,
    /// enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose_logging: bool,
}

impl AgentConfig {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose_logging {
            true => log::LevelFilter::Debug,
            false => log::LevelFilter::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::Parser;

    use super::AgentConfig;

    #[test]
    fn defaults_are_filled_in() {
        let config = AgentConfig::try_parse_from([
            "burrow-agent",
            "--cluster-cidr",
            "10.244.0.0/16",
            "--node-name",
            "worker-1",
        ])
        .unwrap();

        assert_eq!(config.cluster_cidr, "10.244.0.0/16".parse().unwrap());
        assert_eq!(config.node_name, "worker-1");
        assert!(!config.enable_iptables);
        assert_eq!(config.bridge, "cni0");
        assert_eq!(config.subnet_file, Path::new("/run/burrow/subnet.json"));
        assert_eq!(config.mtu, 1500);
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn malformed_cluster_cidr_is_rejected() {
        let result = AgentConfig::try_parse_from([
            "burrow-agent",
            "--cluster-cidr",
            "10.244.0.0",
            "--node-name",
            "worker-1",
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn ipv6_cluster_cidr_is_rejected() {
        let result = AgentConfig::try_parse_from([
            "burrow-agent",
            "--cluster-cidr",
            "fd00::/48",
            "--node-name",
            "worker-1",
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let config = AgentConfig::try_parse_from([
            "burrow-agent",
            "--cluster-cidr",
            "10.244.0.0/16",
            "--node-name",
            "worker-1",
            "--enable-iptables",
            "--bridge",
            "br-pods",
            "--mtu",
            "1450",
            "-v",
        ])
        .unwrap();

        assert!(config.enable_iptables);
        assert_eq!(config.bridge, "br-pods");
        assert_eq!(config.mtu, 1450);
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }
}
