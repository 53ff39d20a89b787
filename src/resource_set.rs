// Backing resources referenced by compiled rules.
//
// IP sets and regex pattern sets are owned by the policy, not by any single
// rule. Several rules may point at the same set by name; the registry makes
// sure each set is defined exactly once.

use serde::{Deserialize, Serialize};

use crate::compile_error::CompileError;
use crate::policy_config::Scope;

/// Address family of an IP set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpVersion {
    Ipv4,
    Ipv6,
}

impl IpVersion {
    /// Short label used in rule and resource names
    pub fn label(&self) -> &'static str {
        match self {
            IpVersion::Ipv4 => "ipv4",
            IpVersion::Ipv6 => "ipv6",
        }
    }
}

/// Named collection of CIDR ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpSet {
    pub name: String,
    pub scope: Scope,
    pub ip_version: IpVersion,
    pub addresses: Vec<String>,
}

/// Named collection of regular expressions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexPatternSet {
    pub name: String,
    pub scope: Scope,
    pub patterns: Vec<String>,
}

/// A resource a builder needs provisioned alongside its rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingResource {
    IpSet(IpSet),
    RegexPatternSet(RegexPatternSet),
}

impl BackingResource {
    pub fn name(&self) -> &str {
        match self {
            BackingResource::IpSet(set) => &set.name,
            BackingResource::RegexPatternSet(set) => &set.name,
        }
    }
}

/// Every backing resource of one policy, each defined once
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSets {
    pub ip_sets: Vec<IpSet>,
    pub regex_pattern_sets: Vec<RegexPatternSet>,
}

impl ResourceSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, returning the name rules should reference.
    ///
    /// Registering an identical definition twice is a no-op. A different
    /// definition under a taken name is a `DuplicateName`.
    pub fn register(&mut self, resource: BackingResource) -> Result<String, CompileError> {
        let name = resource.name().to_string();

        match (self.get(&name), &resource) {
            (None, _) => {}
            (Some(existing), incoming) if existing == *incoming => return Ok(name),
            (Some(_), _) => return Err(CompileError::DuplicateName(name)),
        }

        match resource {
            BackingResource::IpSet(set) => self.ip_sets.push(set),
            BackingResource::RegexPatternSet(set) => self.regex_pattern_sets.push(set),
        }
        Ok(name)
    }

    /// Look up a resource by name
    pub fn get(&self, name: &str) -> Option<BackingResource> {
        if let Some(set) = self.ip_sets.iter().find(|s| s.name == name) {
            return Some(BackingResource::IpSet(set.clone()));
        }
        self.regex_pattern_sets
            .iter()
            .find(|s| s.name == name)
            .map(|set| BackingResource::RegexPatternSet(set.clone()))
    }

    pub fn ip_set(&self, name: &str) -> Option<&IpSet> {
        self.ip_sets.iter().find(|s| s.name == name)
    }

    pub fn regex_pattern_set(&self, name: &str) -> Option<&RegexPatternSet> {
        self.regex_pattern_sets.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ip_set(name).is_some() || self.regex_pattern_set(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.ip_sets.len() + self.regex_pattern_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
