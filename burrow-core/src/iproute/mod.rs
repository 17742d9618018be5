//! Thin layer over the iproute2 `ip` binary, the kernel collaborator for link,
//! address and route manipulation.
//!
//! Commands run synchronously in the calling thread, which matters: a child
//! process inherits the network namespace of the thread that spawned it.

use std::{
    ffi::OsStr,
    io,
    net::{IpAddr, Ipv4Addr},
    process::{Command, Output},
};

use ipnet::Ipv4Net;
use log::debug;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

pub const IP_BINARY: &str = "ip";

const NOT_FOUND_MARKERS: [&str; 3] = ["Cannot find device", "does not exist", "No such process"];
const ALREADY_EXISTS_MARKER: &str = "File exists";

#[derive(Debug, Error)]
pub enum IpCommandError {
    #[error("Couldn't execute '{}'! {}", .0, .1)]
    SpawnError(String, io::Error),
    #[error("'{}' failed: {}", .0, .1)]
    CommandFailed(String, String),
    #[error("Couldn't parse the output of '{}'! {}", .0, .1)]
    ParseError(String, serde_json::Error),
}

impl IpCommandError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::CommandFailed(_, stderr) => NOT_FOUND_MARKERS
                .iter()
                .any(|marker| stderr.contains(marker)),
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::CommandFailed(_, stderr) => stderr.contains(ALREADY_EXISTS_MARKER),
            _ => false,
        }
    }
}

pub fn command_line<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter().fold(program.to_owned(), |mut line, arg| {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
        line
    })
}

/// Turns a finished process into its stdout, or an error carrying stderr.
pub fn check_output(command_line: String, output: Output) -> Result<String, IpCommandError> {
    if !output.status.success() {
        return Err(IpCommandError::CommandFailed(
            command_line,
            String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn parse_json<T: DeserializeOwned>(command_line: &str, stdout: &str) -> Result<T, IpCommandError> {
    // `ip -j` prints nothing at all when there is nothing to show
    let stdout = match stdout.trim() {
        "" => "[]",
        trimmed => trimmed,
    };

    serde_json::from_str(stdout)
        .map_err(|err| IpCommandError::ParseError(command_line.to_owned(), err))
}

/// Runs `ip <args>` and returns its stdout.
pub fn ip<I, S>(args: I) -> Result<String, IpCommandError>
where
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    let line = command_line(IP_BINARY, args.clone());

    debug!("Running '{line}'");

    let output = Command::new(IP_BINARY)
        .args(args)
        .output()
        .map_err(|err| IpCommandError::SpawnError(line.clone(), err))?;

    check_output(line, output)
}

/// Runs `ip -j <args>` and deserializes its output.
pub fn ip_json<T, I, S>(args: I) -> Result<T, IpCommandError>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    let args = std::iter::once("-j".to_owned())
        .chain(args.into_iter().map(|arg| arg.as_ref().to_string_lossy().into_owned()))
        .collect::<Vec<_>>();
    let stdout = ip(&args)?;

    parse_json(&command_line(IP_BINARY, &args), &stdout)
}

/// One entry of `ip -j addr show` / `ip -j link show`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinkInfo {
    pub ifindex: u32,
    pub ifname: String,
    pub address: Option<String>,
    pub mtu: Option<u32>,
    pub master: Option<String>,
    pub flags: Vec<String>,
    pub addr_info: Vec<AddrInfo>,
}

impl LinkInfo {
    pub fn ipv4_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.addr_info.iter().filter_map(|addr| match addr.local {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
    }

    pub fn has_address(&self, ip: &Ipv4Addr) -> bool {
        self.ipv4_addresses().any(|address| &address == ip)
    }

    pub fn is_up(&self) -> bool {
        self.flags.iter().any(|flag| flag == "UP")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddrInfo {
    #[serde(default)]
    pub family: String,
    pub local: IpAddr,
    pub prefixlen: u8,
}

/// One entry of `ip -j route show`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouteInfo {
    pub dst: String,
    pub gateway: Option<Ipv4Addr>,
    pub dev: Option<String>,
    pub protocol: Option<String>,
    pub scope: Option<String>,
    pub metric: Option<u32>,
    pub flags: Vec<String>,
}

impl RouteInfo {
    /// `ip` prints `default` for 0.0.0.0/0 and drops the `/32` of host routes.
    pub fn destination(&self) -> Option<Ipv4Net> {
        match self.dst.as_str() {
            "default" => Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).ok(),
            dst if dst.contains('/') => dst.parse().ok(),
            dst => dst
                .parse::<Ipv4Addr>()
                .ok()
                .and_then(|ip| Ipv4Net::new(ip, 32).ok()),
        }
    }
}

/// Looks up a link by name, `None` when the kernel doesn't know it.
pub fn link_by_name(name: &str) -> Result<Option<LinkInfo>, IpCommandError> {
    match ip_json::<Vec<LinkInfo>, _, _>(["addr", "show", "dev", name]) {
        Ok(links) => Ok(links.into_iter().find(|link| link.ifname == name)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Every link that carries at least one IPv4 address.
pub fn ipv4_links() -> Result<Vec<LinkInfo>, IpCommandError> {
    Ok(ip_json::<Vec<LinkInfo>, _, _>(["-4", "addr", "show"])?
        .into_iter()
        .filter(|link| !link.ifname.is_empty())
        .collect())
}
