use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::Serialize;

use crate::error::PluginError;

pub const IMPLEMENTED_VERSION: &str = "1.0.0";
pub const SUPPORTED_VERSIONS: [&str; 5] = ["0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"];

pub fn ensure_supported_version(cni_version: &str) -> Result<(), PluginError> {
    match SUPPORTED_VERSIONS.contains(&cni_version) {
        true => Ok(()),
        false => Err(PluginError::IncompatibleVersion(cni_version.to_owned())),
    }
}

/// Result of a successful ADD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    pub ips: Vec<IpConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpConfig {
    // pre-1.0 results tag every address with its family
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    pub address: Ipv4Net,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub dst: Ipv4Net,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<Ipv4Addr>,
}

impl CniResult {
    pub fn new(cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_owned(),
            interfaces: Vec::new(),
            ips: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Returns the index the interface got, for [`IpConfig::interface`].
    pub fn add_interface(&mut self, interface: Interface) -> usize {
        self.interfaces.push(interface);
        self.interfaces.len() - 1
    }

    pub fn add_ip(&mut self, address: Ipv4Net, gateway: Ipv4Addr, interface: Option<usize>) {
        let version = match self.cni_version.starts_with("0.") {
            true => Some("4"),
            false => None,
        };

        self.ips.push(IpConfig {
            version,
            interface,
            address,
            gateway: Some(gateway),
        });
    }

    pub fn add_default_route(&mut self, gateway: Ipv4Addr) {
        if let Ok(dst) = Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0) {
            self.routes.push(Route {
                dst,
                gw: Some(gateway),
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub cni_version: &'static str,
    pub supported_versions: Vec<&'static str>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            cni_version: IMPLEMENTED_VERSION,
            supported_versions: SUPPORTED_VERSIONS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CniError {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}
