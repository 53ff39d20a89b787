// Declarative policy configuration and its loaders.
//
// Every optional feature is switched on by the presence of its sub-config.
// An absent list disables the feature; an explicitly empty list keeps it on
// with a backing resource that matches nothing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::firewall_rule::{Aggregation, Rule};

/// Where the compiled policy is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Attached to a regional load balancer or API
    #[default]
    Regional,
    /// Attached to a CDN distribution
    Edge,
}

/// Action taken when no rule terminates evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultAction {
    #[default]
    Allow,
    Block,
}

/// Opt-in (or mandatory) managed rule group, addressed by its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedGroupToggle {
    /// Group key, e.g. `php` or `sql-injection`
    pub name: String,
    /// Rules inside the group that must not fire
    #[serde(default)]
    pub excluded_rules: Vec<String>,
}

impl ManagedGroupToggle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            excluded_rules: Vec::new(),
        }
    }

    pub fn with_excluded_rules(mut self, rules: Vec<String>) -> Self {
        self.excluded_rules = rules;
        self
    }
}

/// Rate-based rule settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Requests per evaluation window above which the rule matches
    pub threshold: u64,
    #[serde(default)]
    pub aggregation: Aggregation,
}

/// What happens to the log sink when the policy is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemovalPolicy {
    #[default]
    Retain,
    Destroy,
}

/// Request log destination, handed to the provisioning layer unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    pub sink_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

/// Input of the compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Policy name, unique within its scope
    pub name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub default_action: DefaultAction,
    /// false = observe (count) mode, true = block mode
    #[serde(default)]
    pub enforce: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "blockedIPv4", default, skip_serializing_if = "Option::is_none")]
    pub blocked_ipv4: Option<Vec<String>>,
    #[serde(rename = "blockedIPv6", default, skip_serializing_if = "Option::is_none")]
    pub blocked_ipv6: Option<Vec<String>>,
    #[serde(rename = "allowedIPv4", default, skip_serializing_if = "Option::is_none")]
    pub allowed_ipv4: Option<Vec<String>>,
    #[serde(rename = "allowedIPv6", default, skip_serializing_if = "Option::is_none")]
    pub allowed_ipv6: Option<Vec<String>>,

    /// Regexes matched against the URI path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_paths: Option<Vec<String>>,
    /// Regexes matched against the User-Agent header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_user_agents: Option<Vec<String>>,

    #[serde(default)]
    pub managed_groups: Vec<ManagedGroupToggle>,
    /// Extra exclusions for the always-on common rule set
    #[serde(default)]
    pub excluded_common_rules: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default)]
    pub pre_rules: Vec<Rule>,
    #[serde(default)]
    pub post_rules: Vec<Rule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl PolicyConfig {
    /// Regional, default-allow, observe-mode policy with every feature off
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Scope::default(),
            default_action: DefaultAction::default(),
            enforce: false,
            description: None,
            blocked_ipv4: None,
            blocked_ipv6: None,
            allowed_ipv4: None,
            allowed_ipv6: None,
            allowed_paths: None,
            allowed_user_agents: None,
            managed_groups: Vec::new(),
            excluded_common_rules: Vec::new(),
            rate_limit: None,
            pre_rules: Vec::new(),
            post_rules: Vec::new(),
            logging: None,
        }
    }

    // Builder methods
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_default_action(mut self, action: DefaultAction) -> Self {
        self.default_action = action;
        self
    }

    pub fn with_enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_blocked_ipv4(mut self, addresses: Vec<String>) -> Self {
        self.blocked_ipv4 = Some(addresses);
        self
    }

    pub fn with_blocked_ipv6(mut self, addresses: Vec<String>) -> Self {
        self.blocked_ipv6 = Some(addresses);
        self
    }

    pub fn with_allowed_ipv4(mut self, addresses: Vec<String>) -> Self {
        self.allowed_ipv4 = Some(addresses);
        self
    }

    pub fn with_allowed_ipv6(mut self, addresses: Vec<String>) -> Self {
        self.allowed_ipv6 = Some(addresses);
        self
    }

    pub fn with_allowed_paths(mut self, patterns: Vec<String>) -> Self {
        self.allowed_paths = Some(patterns);
        self
    }

    pub fn with_allowed_user_agents(mut self, patterns: Vec<String>) -> Self {
        self.allowed_user_agents = Some(patterns);
        self
    }

    pub fn with_managed_group(mut self, toggle: ManagedGroupToggle) -> Self {
        self.managed_groups.push(toggle);
        self
    }

    pub fn with_excluded_common_rules(mut self, rules: Vec<String>) -> Self {
        self.excluded_common_rules = rules;
        self
    }

    pub fn with_rate_limit(mut self, threshold: u64, aggregation: Aggregation) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            threshold,
            aggregation,
        });
        self
    }

    pub fn with_pre_rule(mut self, rule: Rule) -> Self {
        self.pre_rules.push(rule);
        self
    }

    pub fn with_post_rule(mut self, rule: Rule) -> Self {
        self.post_rules.push(rule);
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Errors raised while reading or writing a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    ReadError { path: String, reason: String },

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// JSON loader for policy configurations
pub struct PolicyConfigParser;

impl PolicyConfigParser {
    /// Parse a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<PolicyConfig, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::JsonParseError(e.to_string()))
    }

    /// Parse a configuration from JSON bytes
    pub fn from_json_bytes(bytes: &[u8]) -> Result<PolicyConfig, ConfigError> {
        serde_json::from_slice(bytes).map_err(|e| ConfigError::JsonParseError(e.to_string()))
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<PolicyConfig, ConfigError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_bytes(&bytes)
    }

    /// Serialize a configuration to pretty JSON
    pub fn to_json(config: &PolicyConfig) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))
    }
}
