use std::{
    fs,
    path::{Path, PathBuf},
};

use ipnet::Ipv4Net;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SUBNET_FILE: &str = "/run/burrow/subnet.json";
pub const DEFAULT_BRIDGE_NAME: &str = "cni0";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/cni/burrow";
pub const DEFAULT_MTU: u32 = 1500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Io error on '{}': {}", .0.display(), .1)]
    IoError(PathBuf, std::io::Error),
    #[error("Couldn't parse the network configuration! {}", .0)]
    InvalidNetConf(serde_json::Error),
    #[error("Couldn't parse the subnet file '{}'! {}", .0.display(), .1)]
    InvalidSubnetFile(PathBuf, serde_json::Error),
    #[error("Serialization error: {}", .0)]
    SerializationError(serde_json::Error),
    #[error("'{}' is missing from the network configuration!", .0)]
    MissingField(&'static str),
}

/// The node's pod subnet and bridge, published by the agent for plugin invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConfig {
    pub subnet: Ipv4Net,
    pub bridge: String,
}

impl SubnetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading subnet configuration from {path:?}");

        let raw = fs::read(path).map_err(|err| ConfigError::IoError(path.to_owned(), err))?;

        serde_json::from_slice(&raw)
            .map_err(|err| ConfigError::InvalidSubnetFile(path.to_owned(), err))
    }

    pub fn store(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| ConfigError::IoError(parent.to_owned(), err))?;
        }

        let raw = serde_json::to_vec(self).map_err(ConfigError::SerializationError)?;

        fs::write(path, raw).map_err(|err| ConfigError::IoError(path.to_owned(), err))
    }
}

/// Network configuration as handed over by the container runtime.
///
/// Only the fields the plugin consumes are modelled, everything else in the
/// payload (`ipam`, `runtimeConfig`, `args`, ...) is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    pub cni_version: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    pub data_dir: Option<PathBuf>,
    pub subnet: Option<Ipv4Net>,
    pub bridge: Option<String>,
    pub mtu: Option<u32>,
    pub subnet_file: Option<PathBuf>,
}

impl NetConf {
    pub fn parse(bytes: &[u8]) -> Result<Self, ConfigError> {
        let conf: NetConf = serde_json::from_slice(bytes).map_err(ConfigError::InvalidNetConf)?;

        if conf.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }

        if conf.cni_version.is_empty() {
            return Err(ConfigError::MissingField("cniVersion"));
        }

        Ok(conf)
    }
}

/// Everything a single plugin invocation needs, with defaults and the subnet
/// file already folded in.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub cni_version: String,
    pub name: String,
    pub data_dir: PathBuf,
    pub subnet: Ipv4Net,
    pub bridge: String,
    pub mtu: u32,
}

impl PluginConfig {
    pub fn from_stdin_data(bytes: &[u8]) -> Result<Self, ConfigError> {
        Self::resolve(NetConf::parse(bytes)?)
    }

    pub fn resolve(conf: NetConf) -> Result<Self, ConfigError> {
        let (subnet, bridge) = match (conf.subnet, conf.bridge) {
            (Some(subnet), Some(bridge)) => (subnet, bridge),
            (subnet, bridge) => {
                let path = conf
                    .subnet_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SUBNET_FILE));
                let published = SubnetConfig::load(&path)?;

                (
                    subnet.unwrap_or(published.subnet),
                    bridge.unwrap_or(published.bridge),
                )
            }
        };

        Ok(Self {
            cni_version: conf.cni_version,
            name: conf.name,
            data_dir: conf
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            subnet,
            bridge,
            mtu: conf.mtu.unwrap_or(DEFAULT_MTU),
        })
    }
}
