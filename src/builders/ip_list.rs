// IP blocklist / allowlist builder.
//
// One IP set per list and two rules referencing it: one inspecting the
// forwarded-IP header, one inspecting the connection peer. The action is
// fixed by the list kind and does not follow the enforcement mode.

use ipnet::IpNet;
use log::{debug, warn};
use std::collections::HashSet;
use std::net::IpAddr;

use super::{BandOutput, BuildContext, RuleBuilder};
use crate::compile_error::CompileError;
use crate::firewall_rule::{ForwardedIpConfig, Rule, RuleAction, RuleVerdict, Statement};
use crate::priority_band::{PriorityAllocator, PriorityBand};
use crate::resource_set::{BackingResource, IpSet, IpVersion};

/// Whether listed addresses are blocked or allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpListKind {
    Block,
    Allow,
}

impl IpListKind {
    fn action(&self) -> RuleAction {
        match self {
            IpListKind::Block => RuleAction::Block,
            IpListKind::Allow => RuleAction::Allow,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            IpListKind::Block => "blocked",
            IpListKind::Allow => "allowed",
        }
    }
}

/// Builder for one of the four IP lists
#[derive(Debug, Clone, Copy)]
pub struct IpListBuilder<'a> {
    kind: IpListKind,
    version: IpVersion,
    addresses: Option<&'a [String]>,
}

impl<'a> IpListBuilder<'a> {
    pub fn new(kind: IpListKind, version: IpVersion, addresses: Option<&'a [String]>) -> Self {
        Self {
            kind,
            version,
            addresses,
        }
    }

    /// Configuration field the list came from, e.g. `blockedIPv4`
    pub fn field_name(&self) -> String {
        let version = match self.version {
            IpVersion::Ipv4 => "IPv4",
            IpVersion::Ipv6 => "IPv6",
        };
        format!("{}{}", self.kind.label(), version)
    }

    /// Rule name prefix, e.g. `blocked_ipv4`
    fn rule_prefix(&self) -> String {
        format!("{}_{}", self.kind.label(), self.version.label())
    }

    /// Parse, version-check and canonicalize the configured addresses.
    ///
    /// Bare addresses become host routes, host bits are truncated and repeated
    /// entries keep their first position.
    fn normalize(&self, addresses: &[String]) -> Result<Vec<String>, CompileError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(addresses.len());

        for raw in addresses {
            let net = parse_network(raw.trim()).ok_or_else(|| CompileError::InvalidAddress {
                field: self.field_name(),
                address: raw.clone(),
                reason: "not an IP address or CIDR range".to_string(),
            })?;

            let matches_version = match (self.version, net) {
                (IpVersion::Ipv4, IpNet::V4(_)) | (IpVersion::Ipv6, IpNet::V6(_)) => true,
                _ => false,
            };
            if !matches_version {
                return Err(CompileError::InvalidAddress {
                    field: self.field_name(),
                    address: raw.clone(),
                    reason: format!("expected an {} range", self.version.label()),
                });
            }

            let canonical = net.trunc().to_string();
            if canonical != *raw {
                debug!("{}: normalized {} to {}", self.field_name(), raw, canonical);
            }
            if seen.insert(canonical.clone()) {
                normalized.push(canonical);
            }
        }

        Ok(normalized)
    }
}

fn parse_network(value: &str) -> Option<IpNet> {
    value
        .parse::<IpNet>()
        .ok()
        .or_else(|| value.parse::<IpAddr>().ok().map(IpNet::from))
}

impl<'a> RuleBuilder for IpListBuilder<'a> {
    fn band(&self) -> PriorityBand {
        match (self.kind, self.version) {
            (IpListKind::Block, IpVersion::Ipv4) => PriorityBand::BlockV4,
            (IpListKind::Block, IpVersion::Ipv6) => PriorityBand::BlockV6,
            (IpListKind::Allow, IpVersion::Ipv4) => PriorityBand::AllowV4,
            (IpListKind::Allow, IpVersion::Ipv6) => PriorityBand::AllowV6,
        }
    }

    fn build(
        &self,
        ctx: &BuildContext<'_>,
        allocator: &mut PriorityAllocator,
    ) -> Result<Option<BandOutput>, CompileError> {
        let addresses = match self.addresses {
            Some(addresses) => addresses,
            None => return Ok(None),
        };

        let addresses = self.normalize(addresses)?;
        if addresses.is_empty() {
            warn!(
                "{} is configured but empty; its rules will never match",
                self.field_name()
            );
        }

        let ip_set = IpSet {
            name: ctx.resource_name(&format!("{}-{}", self.kind.label(), self.version.label())),
            scope: ctx.scope,
            ip_version: self.version,
            addresses,
        };

        let slots = allocator.allocate(self.band(), 2)?;
        let verdict = RuleVerdict::Action(self.kind.action());
        let prefix = self.rule_prefix();

        let forwarded_name = format!("{}_forwarded_ip", prefix);
        let forwarded = Rule::new(
            forwarded_name.as_str(),
            slots[0],
            verdict,
            Statement::IpSetReference {
                ip_set: ip_set.name.clone(),
                forwarded_ip_config: Some(ForwardedIpConfig::for_ip_set()),
            },
        )
        .with_visibility(ctx.visibility(&forwarded_name));

        let source_name = format!("{}_source_ip", prefix);
        let source = Rule::new(
            source_name.as_str(),
            slots[1],
            verdict,
            Statement::IpSetReference {
                ip_set: ip_set.name.clone(),
                forwarded_ip_config: None,
            },
        )
        .with_visibility(ctx.visibility(&source_name));

        debug!(
            "{}: {} address(es) at priorities {:?}",
            self.band(),
            ip_set.addresses.len(),
            slots
        );

        Ok(Some(
            BandOutput::new(self.band())
                .with_rule(forwarded)
                .with_rule(source)
                .with_resource(BackingResource::IpSet(ip_set)),
        ))
    }
}
