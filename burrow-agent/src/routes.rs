use std::{collections::HashMap, fmt::Display, net::Ipv4Addr};

use burrow_core::iproute::{
    check_output, command_line, parse_json, IpCommandError, LinkInfo, RouteInfo, IP_BINARY,
};
use ipnet::Ipv4Net;
use log::debug;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("Route command failed! {}", .0)]
    IpCommandError(#[from] IpCommandError),
    #[error("No interface with index {}!", .0)]
    LinkNotFound(u32),
}

/// A kernel route. Protocol and metric are informational and ignored when
/// comparing routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Net,
    pub via: Option<Ipv4Addr>,
    pub link_index: u32,
    pub protocol: Option<String>,
    pub metric: Option<u32>,
}

impl RouteEntry {
    pub fn new(destination: Ipv4Net, via: Ipv4Addr, link_index: u32) -> Self {
        Self {
            destination,
            via: Some(via),
            link_index,
            protocol: None,
            metric: None,
        }
    }

    pub fn same_route(&self, other: &RouteEntry) -> bool {
        self.destination.network() == other.destination.network()
            && self.destination.prefix_len() == other.destination.prefix_len()
            && self.via == other.via
            && self.link_index == other.link_index
    }
}

impl Display for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.via {
            Some(via) => write!(f, "{} via {} dev #{}", self.destination, via, self.link_index),
            None => write!(f, "{} dev #{}", self.destination, self.link_index),
        }
    }
}

/// The kernel's main IPv4 routing table.
pub trait RouteTable {
    async fn list(&self) -> Result<Vec<RouteEntry>, RouteTableError>;
    async fn add(&mut self, route: &RouteEntry) -> Result<(), RouteTableError>;
    async fn replace(&mut self, route: &RouteEntry) -> Result<(), RouteTableError>;
    async fn delete(&mut self, route: &RouteEntry) -> Result<(), RouteTableError>;
}

/// [`RouteTable`] backed by the `ip` binary.
#[derive(Debug)]
pub struct IpRouteTable {
    known_links: HashMap<u32, String>,
}

impl IpRouteTable {
    pub fn new(uplink: &LinkInfo) -> Self {
        Self {
            known_links: HashMap::from([(uplink.ifindex, uplink.ifname.to_owned())]),
        }
    }

    async fn run(args: &[String]) -> Result<String, IpCommandError> {
        let line = command_line(IP_BINARY, args);

        debug!("Running '{line}'");

        let output = Command::new(IP_BINARY)
            .args(args)
            .output()
            .await
            .map_err(|err| IpCommandError::SpawnError(line.clone(), err))?;

        check_output(line, output)
    }

    async fn run_json<T: serde::de::DeserializeOwned>(args: &[&str]) -> Result<T, IpCommandError> {
        let args = std::iter::once("-j")
            .chain(args.iter().copied())
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let stdout = Self::run(&args).await?;

        parse_json(&command_line(IP_BINARY, &args), &stdout)
    }

    async fn links(&self) -> Result<HashMap<u32, String>, IpCommandError> {
        Ok(Self::run_json::<Vec<LinkInfo>>(&["link", "show"])
            .await?
            .into_iter()
            .filter(|link| !link.ifname.is_empty())
            .map(|link| (link.ifindex, link.ifname))
            .collect())
    }

    async fn link_name(&mut self, index: u32) -> Result<String, RouteTableError> {
        if let Some(name) = self.known_links.get(&index) {
            return Ok(name.to_owned());
        }

        let links = self.links().await?;

        self.known_links.extend(links);
        self.known_links
            .get(&index)
            .cloned()
            .ok_or(RouteTableError::LinkNotFound(index))
    }

    async fn modify(&mut self, verb: &str, route: &RouteEntry) -> Result<(), RouteTableError> {
        let dev = self.link_name(route.link_index).await?;
        let mut args = vec![
            "route".to_owned(),
            verb.to_owned(),
            route.destination.to_string(),
        ];

        if let Some(via) = route.via {
            args.extend(["via".to_owned(), via.to_string()]);
        }

        args.extend(["dev".to_owned(), dev]);

        Self::run(&args).await?;

        Ok(())
    }
}

impl RouteTable for IpRouteTable {
    async fn list(&self) -> Result<Vec<RouteEntry>, RouteTableError> {
        let links = self.links().await?;
        let indices = links
            .into_iter()
            .map(|(index, name)| (name, index))
            .collect::<HashMap<_, _>>();
        let routes = Self::run_json::<Vec<RouteInfo>>(&["-4", "route", "show", "table", "main"])
            .await?;

        Ok(routes
            .into_iter()
            .filter_map(|route| to_entry(route, &indices))
            .collect())
    }

    async fn add(&mut self, route: &RouteEntry) -> Result<(), RouteTableError> {
        self.modify("add", route).await
    }

    async fn replace(&mut self, route: &RouteEntry) -> Result<(), RouteTableError> {
        self.modify("replace", route).await
    }

    async fn delete(&mut self, route: &RouteEntry) -> Result<(), RouteTableError> {
        self.modify("del", route).await
    }
}

fn to_entry(route: RouteInfo, indices: &HashMap<String, u32>) -> Option<RouteEntry> {
    let destination = route.destination()?;
    let link_index = *indices.get(route.dev.as_ref()?)?;

    Some(RouteEntry {
        destination,
        via: route.gateway,
        link_index,
        protocol: route.protocol,
        metric: route.metric,
    })
}
