use std::{
    collections::HashMap,
    io::{self, Read},
    path::PathBuf,
};

use crate::error::PluginError;

pub const CNI_COMMAND_ENV: &str = "CNI_COMMAND";
pub const CNI_CONTAINERID_ENV: &str = "CNI_CONTAINERID";
pub const CNI_NETNS_ENV: &str = "CNI_NETNS";
pub const CNI_IFNAME_ENV: &str = "CNI_IFNAME";
pub const CNI_ARGS_ENV: &str = "CNI_ARGS";
pub const CNI_PATH_ENV: &str = "CNI_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Check,
    Version,
}

impl Command {
    pub fn parse(raw: &str) -> Result<Self, PluginError> {
        match raw {
            "ADD" => Ok(Self::Add),
            "DEL" => Ok(Self::Del),
            "CHECK" => Ok(Self::Check),
            "VERSION" => Ok(Self::Version),
            other => Err(PluginError::UnknownCommand(other.to_owned())),
        }
    }
}

/// One plugin invocation as described by the runtime's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdArgs {
    pub container_id: String,
    pub netns: PathBuf,
    pub if_name: String,
    pub args: HashMap<String, String>,
    pub path: Vec<PathBuf>,
}

impl CmdArgs {
    /// DEL may run after the sandbox is gone, so it tolerates a missing netns.
    pub fn from_lookup(
        command: Command,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PluginError> {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(PluginError::MissingEnvironment(name))
        };

        let container_id = require(CNI_CONTAINERID_ENV)?;
        let if_name = require(CNI_IFNAME_ENV)?;
        let netns = match command {
            Command::Del => lookup(CNI_NETNS_ENV).unwrap_or_default(),
            _ => require(CNI_NETNS_ENV)?,
        };

        Ok(Self {
            container_id,
            netns: PathBuf::from(netns),
            if_name,
            args: parse_cni_args(&lookup(CNI_ARGS_ENV).unwrap_or_default()),
            path: lookup(CNI_PATH_ENV)
                .map(|path| std::env::split_paths(&path).collect())
                .unwrap_or_default(),
        })
    }

    pub fn from_env(command: Command) -> Result<Self, PluginError> {
        Self::from_lookup(command, |name| std::env::var(name).ok())
    }
}

pub fn command_from_env() -> Result<Command, PluginError> {
    let raw = std::env::var(CNI_COMMAND_ENV)
        .map_err(|_| PluginError::MissingEnvironment(CNI_COMMAND_ENV))?;

    Command::parse(&raw)
}

pub fn read_stdin() -> Result<Vec<u8>, PluginError> {
    let mut stdin_data = Vec::new();

    io::stdin()
        .read_to_end(&mut stdin_data)
        .map_err(PluginError::StdinError)?;

    Ok(stdin_data)
}

/// `CNI_ARGS` is a `;` separated list of `KEY=VALUE` pairs.
fn parse_cni_args(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
