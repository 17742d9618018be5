use std::io;

use burrow_core::iproute::command_line;
use ipnet::Ipv4Net;
use log::{debug, info};
use thiserror::Error;
use tokio::process::Command;

const IPTABLES_BINARY: &str = "iptables";

#[derive(Debug, Error)]
pub enum NatError {
    #[error("Couldn't execute '{}'! {}", .0, .1)]
    SpawnError(String, io::Error),
    #[error("'{}' failed: {}", .0, .1)]
    CommandFailed(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IptablesRule {
    pub table: &'static str,
    pub chain: &'static str,
    pub spec: Vec<String>,
}

impl IptablesRule {
    fn new(table: &'static str, chain: &'static str, spec: &[&str]) -> Self {
        Self {
            table,
            chain,
            spec: spec.iter().map(|part| part.to_string()).collect(),
        }
    }

    fn args(&self, operation: &str) -> Vec<String> {
        ["-t", self.table, operation, self.chain]
            .into_iter()
            .map(str::to_owned)
            .chain(self.spec.iter().cloned())
            .collect()
    }
}

/// Lets pod traffic through the host and masquerades whatever leaves the
/// node subnet.
pub fn forwarding_rules(bridge: &str, uplink: &str, subnet: Ipv4Net) -> Vec<IptablesRule> {
    let subnet = subnet.to_string();

    vec![
        IptablesRule::new("filter", "FORWARD", &["-i", bridge, "-j", "ACCEPT"]),
        IptablesRule::new("filter", "FORWARD", &["-i", uplink, "-j", "ACCEPT"]),
        IptablesRule::new("nat", "POSTROUTING", &["-s", &subnet, "-j", "MASQUERADE"]),
    ]
}

pub async fn ensure_rules(rules: &[IptablesRule]) -> Result<(), NatError> {
    for rule in rules {
        ensure_rule(rule).await?;
    }

    Ok(())
}

async fn ensure_rule(rule: &IptablesRule) -> Result<(), NatError> {
    let check = rule.args("-C");
    let line = command_line(IPTABLES_BINARY, &check);
    let output = Command::new(IPTABLES_BINARY)
        .args(&check)
        .output()
        .await
        .map_err(|err| NatError::SpawnError(line.clone(), err))?;

    if output.status.success() {
        debug!("Rule already present: {line}");
        return Ok(());
    }

    let append = rule.args("-A");
    let line = command_line(IPTABLES_BINARY, &append);

    info!("Installing rule: {line}");

    let output = Command::new(IPTABLES_BINARY)
        .args(&append)
        .output()
        .await
        .map_err(|err| NatError::SpawnError(line.clone(), err))?;

    if !output.status.success() {
        return Err(NatError::CommandFailed(
            line,
            String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use burrow_core::iproute::command_line;

    use super::forwarding_rules;

    #[test]
    fn covers_bridge_uplink_and_masquerade() {
        let rules = forwarding_rules("cni0", "eth0", "10.244.1.0/24".parse().unwrap());
        let lines = rules
            .iter()
            .map(|rule| command_line("iptables", rule.args("-A")))
            .collect::<Vec<_>>();

        assert_eq!(
            lines,
            vec![
                "iptables -t filter -A FORWARD -i cni0 -j ACCEPT",
                "iptables -t filter -A FORWARD -i eth0 -j ACCEPT",
                "iptables -t nat -A POSTROUTING -s 10.244.1.0/24 -j MASQUERADE",
            ]
        );
    }

    #[test]
    fn check_uses_same_rule_spec() {
        let rules = forwarding_rules("cni0", "eth0", "10.244.1.0/24".parse().unwrap());

        assert_eq!(
            command_line("iptables", rules[2].args("-C")),
            "iptables -t nat -C POSTROUTING -s 10.244.1.0/24 -j MASQUERADE"
        );
    }
}
