use std::io;

use burrow_core::{
    config::ConfigError, dataplane::DataplaneError, ipam::IpamError, store::StoreError,
};
use thiserror::Error;

pub const CODE_INCOMPATIBLE_VERSION: u32 = 1;
pub const CODE_UNKNOWN_CONTAINER: u32 = 3;
pub const CODE_INVALID_ENVIRONMENT: u32 = 4;
pub const CODE_IO_FAILURE: u32 = 5;
pub const CODE_DECODING_FAILURE: u32 = 6;
pub const CODE_INVALID_NETWORK_CONFIG: u32 = 7;
pub const CODE_TRY_AGAIN_LATER: u32 = 11;
pub const CODE_INTERNAL: u32 = 999;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("CNI version {} isn't supported!", .0)]
    IncompatibleVersion(String),
    #[error("{} must be set!", .0)]
    MissingEnvironment(&'static str),
    #[error("Unknown CNI_COMMAND '{}'!", .0)]
    UnknownCommand(String),
    #[error("Couldn't read the network configuration from stdin! {}", .0)]
    StdinError(io::Error),
    #[error("{}", .0)]
    ConfigError(#[from] ConfigError),
    #[error("{}", .0)]
    IpamError(#[from] IpamError),
    #[error("{}", .0)]
    StoreError(#[from] StoreError),
    #[error("{}", .0)]
    DataplaneError(#[from] DataplaneError),
    #[error("Couldn't print the result! {}", .0)]
    OutputError(serde_json::Error),
}

impl PluginError {
    pub fn code(&self) -> u32 {
        match self {
            Self::IncompatibleVersion(_) => CODE_INCOMPATIBLE_VERSION,
            Self::MissingEnvironment(_) | Self::UnknownCommand(_) => CODE_INVALID_ENVIRONMENT,
            Self::StdinError(_) => CODE_IO_FAILURE,
            Self::ConfigError(ConfigError::InvalidNetConf(_)) => CODE_DECODING_FAILURE,
            Self::ConfigError(ConfigError::IoError(_, _)) => CODE_IO_FAILURE,
            Self::ConfigError(_) => CODE_INVALID_NETWORK_CONFIG,
            Self::IpamError(IpamError::AddressSpaceExhausted(_)) => CODE_TRY_AGAIN_LATER,
            Self::IpamError(IpamError::SubnetTooSmall(_)) => CODE_INVALID_NETWORK_CONFIG,
            Self::IpamError(IpamError::ContainerNotFound(_)) => CODE_UNKNOWN_CONTAINER,
            Self::IpamError(IpamError::StoreError(_))
            | Self::StoreError(_)
            | Self::DataplaneError(_)
            | Self::OutputError(_) => CODE_INTERNAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use burrow_core::{config::ConfigError, ipam::IpamError};

    use super::PluginError;

    #[test]
    fn maps_errors_to_cni_codes() {
        let subnet = "10.0.0.0/30".parse().unwrap();

        assert_eq!(PluginError::IncompatibleVersion("0.2.0".to_owned()).code(), 1);
        assert_eq!(PluginError::MissingEnvironment("CNI_IFNAME").code(), 4);
        assert_eq!(PluginError::UnknownCommand("FOO".to_owned()).code(), 4);
        assert_eq!(
            PluginError::from(ConfigError::MissingField("name")).code(),
            7
        );
        assert_eq!(
            PluginError::from(IpamError::AddressSpaceExhausted(subnet)).code(),
            11
        );
        assert_eq!(
            PluginError::from(IpamError::ContainerNotFound("abc".to_owned())).code(),
            3
        );
    }
}
