// Rule builders, one per feature category.
//
// Each builder owns one priority band, reads only its own slice of the
// configuration and returns the rules and backing resources for that band.
// A builder whose feature is switched off returns `None`.

pub mod custom_rule;
pub mod ip_list;
pub mod managed_group;
pub mod rate_limit;
pub mod regex_allowlist;

use crate::compile_error::CompileError;
use crate::firewall_rule::{metric_name, EnforcementMode, Rule, VisibilityConfig};
use crate::policy_config::Scope;
use crate::priority_band::{PriorityAllocator, PriorityBand};
use crate::resource_set::BackingResource;

/// Policy-wide inputs every builder may consult
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub policy_name: &'a str,
    pub scope: Scope,
    pub mode: EnforcementMode,
}

impl<'a> BuildContext<'a> {
    pub fn new(policy_name: &'a str, scope: Scope, mode: EnforcementMode) -> Self {
        Self {
            policy_name,
            scope,
            mode,
        }
    }

    /// Name of a policy-owned backing resource, e.g. `acme-blocked-ipv4`.
    ///
    /// Sanitized like metric names, so `acme prod` yields `acme_prod-...`.
    pub fn resource_name(&self, suffix: &str) -> String {
        metric_name(&[self.policy_name, suffix])
    }

    /// Visibility settings for a generated rule
    pub fn visibility(&self, rule_name: &str) -> VisibilityConfig {
        VisibilityConfig::for_metric(&[self.policy_name, rule_name])
    }
}

/// Rules and resources produced for one band
#[derive(Debug, Clone, PartialEq)]
pub struct BandOutput {
    pub band: PriorityBand,
    pub rules: Vec<Rule>,
    pub resources: Vec<BackingResource>,
}

impl BandOutput {
    pub fn new(band: PriorityBand) -> Self {
        Self {
            band,
            rules: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_resource(mut self, resource: BackingResource) -> Self {
        self.resources.push(resource);
        self
    }
}

/// A feature category that materializes into zero or more rules
pub trait RuleBuilder {
    /// Band the builder's rules land in
    fn band(&self) -> PriorityBand;

    /// Build the band's rules, or `None` when the feature is off
    fn build(
        &self,
        ctx: &BuildContext<'_>,
        allocator: &mut PriorityAllocator,
    ) -> Result<Option<BandOutput>, CompileError>;
}
