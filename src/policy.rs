// Compiled policy: the ordered rule list plus everything the provisioning
// layer needs to materialize it.
//
// A Policy is only produced by PolicyCompiler and has no mutators. A changed
// configuration means compiling a new one.

use sha2::{Digest, Sha256};

use crate::builders::managed_group::ManagedGroup;
use crate::firewall_rule::{EnforcementMode, Rule, VisibilityConfig};
use crate::policy_config::{ConfigError, DefaultAction, LoggingConfig, Scope};
use crate::priority_band::PriorityBand;
use crate::resource_set::ResourceSets;
use crate::wafv2_document::WebAclDocument;

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    name: String,
    scope: Scope,
    description: Option<String>,
    default_action: DefaultAction,
    mode: EnforcementMode,
    visibility: VisibilityConfig,
    rules: Vec<Rule>,
    resources: ResourceSets,
    logging: Option<LoggingConfig>,
}

impl Policy {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        scope: Scope,
        description: Option<String>,
        default_action: DefaultAction,
        mode: EnforcementMode,
        rules: Vec<Rule>,
        resources: ResourceSets,
        logging: Option<LoggingConfig>,
    ) -> Self {
        Self {
            visibility: VisibilityConfig::for_metric(&[&name]),
            name,
            scope,
            description,
            default_action,
            mode,
            rules,
            resources,
            logging,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn default_action(&self) -> DefaultAction {
        self.default_action
    }

    /// Mode the mode-sensitive rules were compiled for
    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    pub fn visibility(&self) -> &VisibilityConfig {
        &self.visibility
    }

    /// Rules in ascending priority order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Backing IP sets and regex pattern sets, each defined once
    pub fn resources(&self) -> &ResourceSets {
        &self.resources
    }

    pub fn logging(&self) -> Option<&LoggingConfig> {
        self.logging.as_ref()
    }

    pub fn priorities(&self) -> Vec<u32> {
        self.rules.iter().map(|rule| rule.priority).collect()
    }

    /// Rules whose priority falls in the given band
    pub fn rules_in_band(&self, band: PriorityBand) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.band() == Some(band))
            .collect()
    }

    /// Whether a rule's verdict is derived from the enforcement mode.
    ///
    /// True for every managed group except bad-actors, and for the rate-based
    /// rule.
    pub fn is_mode_sensitive(rule: &Rule) -> bool {
        match rule.band() {
            Some(PriorityBand::Managed) => ManagedGroup::all()
                .iter()
                .find(|group| group.priority() == rule.priority)
                .map(|group| group.is_mode_sensitive())
                .unwrap_or(false),
            Some(PriorityBand::RateLimit) => true,
            _ => false,
        }
    }

    pub fn mode_sensitive_rules(&self) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| Self::is_mode_sensitive(rule))
            .collect()
    }

    /// The policy in the firewall service's web ACL shape
    pub fn document(&self) -> WebAclDocument<'_> {
        WebAclDocument::from(self)
    }

    /// Serialize the service document to pretty JSON for the provisioning layer
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(&self.document())
            .map_err(|e| ConfigError::SerializationError(e.to_string()))
    }

    /// SHA-256 of the serialized service document, hex encoded.
    ///
    /// Compiling the same configuration twice yields the same fingerprint.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let bytes = serde_json::to_vec(&self.document())
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}
