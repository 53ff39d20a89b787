// Managed rule group inclusion.
//
// Groups are emitted in a fixed order, each at its own fixed slot of the
// managed band. bad-actors and common are always on; the rest are opt-in.
// The override follows the enforcement mode, except for bad-actors which
// always enforces and carries a curated exclusion list instead.

use log::debug;
use std::collections::BTreeMap;
use std::fmt;

use super::{BandOutput, BuildContext, RuleBuilder};
use crate::compile_error::CompileError;
use crate::firewall_rule::{EnforcementMode, OverrideAction, Rule, RuleVerdict, Statement};
use crate::policy_config::ManagedGroupToggle;
use crate::priority_band::{PriorityAllocator, PriorityBand};

/// Vendor publishing the managed rule groups
pub const MANAGED_GROUP_VENDOR: &str = "AWS";

/// Rules of the bad-actors group known to misfire on legitimate traffic
pub const BAD_ACTORS_CURATED_EXCLUSIONS: [&str; 3] = [
    "Host_localhost_HEADER",
    "PROPFIND_METHOD",
    "ExploitablePaths_URIPATH",
];

/// Managed rule groups in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedGroup {
    BadActors,
    Common,
    Php,
    IpReputation,
    AnonymousIp,
    SqlInjection,
    BotControl,
}

impl ManagedGroup {
    pub fn all() -> [ManagedGroup; 7] {
        [
            ManagedGroup::BadActors,
            ManagedGroup::Common,
            ManagedGroup::Php,
            ManagedGroup::IpReputation,
            ManagedGroup::AnonymousIp,
            ManagedGroup::SqlInjection,
            ManagedGroup::BotControl,
        ]
    }

    /// Key used in `managedGroups[].name`
    pub fn key(&self) -> &'static str {
        match self {
            ManagedGroup::BadActors => "bad-actors",
            ManagedGroup::Common => "common",
            ManagedGroup::Php => "php",
            ManagedGroup::IpReputation => "ip-reputation",
            ManagedGroup::AnonymousIp => "anonymous-ip",
            ManagedGroup::SqlInjection => "sql-injection",
            ManagedGroup::BotControl => "bot-control",
        }
    }

    pub fn from_key(key: &str) -> Option<ManagedGroup> {
        Self::all().into_iter().find(|group| group.key() == key)
    }

    /// Name of the compiled rule
    pub fn rule_name(&self) -> &'static str {
        match self {
            ManagedGroup::BadActors => "bad_actors_rule",
            ManagedGroup::Common => "common_rule_set",
            ManagedGroup::Php => "php_rule_set",
            ManagedGroup::IpReputation => "ip_reputation_list",
            ManagedGroup::AnonymousIp => "anonymous_ip_list",
            ManagedGroup::SqlInjection => "sql_injection_rule_set",
            ManagedGroup::BotControl => "bot_control_rule_set",
        }
    }

    /// Vendor's name for the group
    pub fn vendor_group_name(&self) -> &'static str {
        match self {
            ManagedGroup::BadActors => "AWSManagedRulesKnownBadInputsRuleSet",
            ManagedGroup::Common => "AWSManagedRulesCommonRuleSet",
            ManagedGroup::Php => "AWSManagedRulesPHPRuleSet",
            ManagedGroup::IpReputation => "AWSManagedRulesAmazonIpReputationList",
            ManagedGroup::AnonymousIp => "AWSManagedRulesAnonymousIpList",
            ManagedGroup::SqlInjection => "AWSManagedRulesSQLiRuleSet",
            ManagedGroup::BotControl => "AWSManagedRulesBotControlRuleSet",
        }
    }

    /// Fixed slot inside the managed band
    pub fn priority(&self) -> u32 {
        let offset = Self::all()
            .iter()
            .position(|group| group == self)
            .unwrap_or_default() as u32;
        *PriorityBand::Managed.range().start() + offset
    }

    /// Emitted whether or not the configuration mentions it
    pub fn is_mandatory(&self) -> bool {
        matches!(self, ManagedGroup::BadActors | ManagedGroup::Common)
    }

    /// Override follows the enforcement mode
    pub fn is_mode_sensitive(&self) -> bool {
        !matches!(self, ManagedGroup::BadActors)
    }

    pub fn override_action(&self, mode: EnforcementMode) -> OverrideAction {
        if self.is_mode_sensitive() {
            mode.group_override()
        } else {
            OverrideAction::None
        }
    }
}

impl fmt::Display for ManagedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Builder for the managed band
#[derive(Debug, Clone, Copy)]
pub struct ManagedGroupBuilder<'a> {
    toggles: &'a [ManagedGroupToggle],
    excluded_common_rules: &'a [String],
}

impl<'a> ManagedGroupBuilder<'a> {
    pub fn new(toggles: &'a [ManagedGroupToggle], excluded_common_rules: &'a [String]) -> Self {
        Self {
            toggles,
            excluded_common_rules,
        }
    }

    /// Resolve toggles to groups, keeping each group's explicit exclusions
    fn enabled_groups(&self) -> Result<BTreeMap<ManagedGroup, Vec<String>>, CompileError> {
        let mut enabled: BTreeMap<ManagedGroup, Vec<String>> = ManagedGroup::all()
            .into_iter()
            .filter(ManagedGroup::is_mandatory)
            .map(|group| (group, Vec::new()))
            .collect();
        let mut toggled = Vec::new();

        for toggle in self.toggles {
            let group = ManagedGroup::from_key(toggle.name.trim()).ok_or_else(|| {
                CompileError::EmptyRequiredField {
                    field: "managedGroups.name".to_string(),
                    reason: format!("unknown managed group {:?}", toggle.name),
                }
            })?;

            if toggled.contains(&group) {
                return Err(CompileError::DuplicateName(group.rule_name().to_string()));
            }
            toggled.push(group);

            enabled
                .entry(group)
                .or_default()
                .extend(toggle.excluded_rules.iter().cloned());
        }

        if let Some(common) = enabled.get_mut(&ManagedGroup::Common) {
            common.extend(self.excluded_common_rules.iter().cloned());
        }

        Ok(enabled)
    }

    fn exclusions(group: ManagedGroup, explicit: Vec<String>) -> Vec<String> {
        let curated: &[&str] = match group {
            ManagedGroup::BadActors => &BAD_ACTORS_CURATED_EXCLUSIONS,
            _ => &[],
        };

        let mut excluded: Vec<String> = Vec::new();
        for rule in curated.iter().map(|r| r.to_string()).chain(explicit) {
            if !rule.is_empty() && !excluded.contains(&rule) {
                excluded.push(rule);
            }
        }
        excluded
    }
}

impl<'a> RuleBuilder for ManagedGroupBuilder<'a> {
    fn band(&self) -> PriorityBand {
        PriorityBand::Managed
    }

    fn build(
        &self,
        ctx: &BuildContext<'_>,
        allocator: &mut PriorityAllocator,
    ) -> Result<Option<BandOutput>, CompileError> {
        let mut output = BandOutput::new(self.band());

        // BTreeMap iteration follows ManagedGroup's declaration order
        for (group, explicit) in self.enabled_groups()? {
            let priority = allocator.claim(self.band(), group.priority())?;
            let rule = Rule::new(
                group.rule_name(),
                priority,
                RuleVerdict::OverrideAction(group.override_action(ctx.mode)),
                Statement::ManagedRuleGroup {
                    vendor_name: MANAGED_GROUP_VENDOR.to_string(),
                    name: group.vendor_group_name().to_string(),
                    excluded_rules: Self::exclusions(group, explicit),
                },
            )
            .with_visibility(ctx.visibility(group.rule_name()));

            debug!(
                "{}: {} at priority {} (override {:?})",
                self.band(),
                group,
                priority,
                group.override_action(ctx.mode)
            );
            output = output.with_rule(rule);
        }

        Ok(Some(output))
    }
}
