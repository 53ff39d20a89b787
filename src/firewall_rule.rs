// Compiled firewall rule and the pieces it is made of.
//
// A rule is name + priority + verdict + statement + visibility. Statements are
// a tagged sum type with one variant per matcher kind; the variants only meet
// when rules are flattened into the policy's rule list.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::priority_band::PriorityBand;

/// Header inspected by forwarded-IP matchers
pub const FORWARDED_IP_HEADER: &str = "X-Forwarded-For";

// ============================================================================
// Actions and enforcement mode
// ============================================================================

/// Terminating or counting action of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Allow,
    Block,
    Count,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Allow => write!(f, "ALLOW"),
            RuleAction::Block => write!(f, "BLOCK"),
            RuleAction::Count => write!(f, "COUNT"),
        }
    }
}

/// Override applied on top of a managed rule group's own actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideAction {
    /// The group's own actions apply
    None,
    /// Every match inside the group is downgraded to COUNT
    Count,
}

/// What a rule does on match.
///
/// Plain rules carry an action, rule-group references carry an override.
/// Serializes as `{"action": ...}` or `{"overrideAction": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleVerdict {
    Action(RuleAction),
    OverrideAction(OverrideAction),
}

impl RuleVerdict {
    pub fn action(&self) -> Option<RuleAction> {
        match self {
            RuleVerdict::Action(action) => Some(*action),
            RuleVerdict::OverrideAction(_) => None,
        }
    }

    pub fn override_action(&self) -> Option<OverrideAction> {
        match self {
            RuleVerdict::Action(_) => None,
            RuleVerdict::OverrideAction(action) => Some(*action),
        }
    }
}

/// Global observe-vs-enforce switch.
///
/// Passed explicitly into every mode-sensitive builder; nothing reads it from
/// ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Count-only, mode-sensitive rules never block
    Observe,
    /// Mode-sensitive rules block
    Enforce,
}

impl EnforcementMode {
    pub fn from_enforce(enforce: bool) -> Self {
        if enforce {
            EnforcementMode::Enforce
        } else {
            EnforcementMode::Observe
        }
    }

    pub fn is_enforcing(&self) -> bool {
        matches!(self, EnforcementMode::Enforce)
    }

    /// Override for mode-sensitive managed rule groups
    pub fn group_override(&self) -> OverrideAction {
        match self {
            EnforcementMode::Enforce => OverrideAction::None,
            EnforcementMode::Observe => OverrideAction::Count,
        }
    }

    /// Action for mode-sensitive plain rules (rate limiting)
    pub fn rule_action(&self) -> RuleAction {
        match self {
            EnforcementMode::Enforce => RuleAction::Block,
            EnforcementMode::Observe => RuleAction::Count,
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementMode::Observe => write!(f, "observe"),
            EnforcementMode::Enforce => write!(f, "enforce"),
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Behavior when the forwarded-IP header is missing or malformed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackBehavior {
    Match,
    NoMatch,
}

/// Which address of a multi-valued forwarded header is inspected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForwardedIpPosition {
    First,
    Last,
    Any,
}

/// Inspect a header instead of the connection peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedIpConfig {
    pub header_name: String,
    pub fallback_behavior: FallbackBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<ForwardedIpPosition>,
}

impl ForwardedIpConfig {
    /// Config used by IP-set rules: first address, missing header never matches
    pub fn for_ip_set() -> Self {
        Self {
            header_name: FORWARDED_IP_HEADER.to_string(),
            fallback_behavior: FallbackBehavior::NoMatch,
            position: Some(ForwardedIpPosition::First),
        }
    }

    /// Config used by rate-based rules: missing header still counts
    pub fn for_rate_limit() -> Self {
        Self {
            header_name: FORWARDED_IP_HEADER.to_string(),
            fallback_behavior: FallbackBehavior::Match,
            position: None,
        }
    }
}

/// Key requests are grouped by when counting against a rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregation {
    #[default]
    ForwardedIp,
    SourceIp,
}

/// Request component a regex pattern set is matched against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MatchField {
    UriPath,
    SingleHeader { name: String },
}

/// Matcher of a rule, one variant per statement kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Statement {
    /// Match the request address against a named IP set
    #[serde(rename_all = "camelCase")]
    IpSetReference {
        ip_set: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forwarded_ip_config: Option<ForwardedIpConfig>,
    },

    /// Match a request field against a named regex pattern set
    #[serde(rename_all = "camelCase")]
    RegexPatternSetReference { regex_set: String, field: MatchField },

    /// Evaluate a vendor-curated rule group
    #[serde(rename_all = "camelCase")]
    ManagedRuleGroup {
        vendor_name: String,
        name: String,
        #[serde(default)]
        excluded_rules: Vec<String>,
    },

    /// Count requests per aggregation key and match above the limit
    #[serde(rename_all = "camelCase")]
    RateBased {
        limit: u64,
        aggregate_key: Aggregation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forwarded_ip_config: Option<ForwardedIpConfig>,
    },

    /// Caller-defined matcher passed through untouched
    Custom { definition: serde_json::Value },
}

impl Statement {
    /// Name of the backing IP set or regex set, if the statement uses one
    pub fn resource_ref(&self) -> Option<&str> {
        match self {
            Statement::IpSetReference { ip_set, .. } => Some(ip_set),
            Statement::RegexPatternSetReference { regex_set, .. } => Some(regex_set),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Statement::IpSetReference { .. } => "ipSetReference",
            Statement::RegexPatternSetReference { .. } => "regexPatternSetReference",
            Statement::ManagedRuleGroup { .. } => "managedRuleGroup",
            Statement::RateBased { .. } => "rateBased",
            Statement::Custom { .. } => "custom",
        }
    }
}

// ============================================================================
// Rule
// ============================================================================

/// Metrics and request sampling settings of a rule or policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityConfig {
    pub metric_name: String,
    #[serde(default = "default_true")]
    pub sampled_requests_enabled: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            metric_name: String::new(),
            sampled_requests_enabled: true,
            metrics_enabled: true,
        }
    }
}

impl VisibilityConfig {
    /// Sampling and metrics on, metric name derived from the parts
    pub fn for_metric(parts: &[&str]) -> Self {
        Self {
            metric_name: metric_name(parts),
            sampled_requests_enabled: true,
            metrics_enabled: true,
        }
    }
}

/// Join parts with `-`, replacing anything outside `[A-Za-z0-9_-]` with `_`
pub fn metric_name(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// One named, prioritized match-and-act unit of a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    pub priority: u32,
    #[serde(flatten)]
    pub verdict: RuleVerdict,
    pub statement: Statement,
    #[serde(default)]
    pub visibility: VisibilityConfig,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        verdict: RuleVerdict,
        statement: Statement,
    ) -> Self {
        let name = name.into();
        Self {
            visibility: VisibilityConfig::for_metric(&[&name]),
            name,
            priority,
            verdict,
            statement,
        }
    }

    pub fn with_visibility(mut self, visibility: VisibilityConfig) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn action(&self) -> Option<RuleAction> {
        self.verdict.action()
    }

    pub fn override_action(&self) -> Option<OverrideAction> {
        self.verdict.override_action()
    }

    /// Band the rule's priority falls in
    pub fn band(&self) -> Option<PriorityBand> {
        PriorityBand::classify(self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_derived_verdicts() {
        let observe = EnforcementMode::from_enforce(false);
        assert_eq!(observe.group_override(), OverrideAction::Count);
        assert_eq!(observe.rule_action(), RuleAction::Count);

        let enforce = EnforcementMode::from_enforce(true);
        assert!(enforce.is_enforcing());
        assert_eq!(enforce.group_override(), OverrideAction::None);
        assert_eq!(enforce.rule_action(), RuleAction::Block);
    }

    #[test]
    fn test_rule_serializes_to_rule_list_shape() {
        let rule = Rule::new(
            "blocked_ipv4_forwarded_ip",
            1,
            RuleVerdict::Action(RuleAction::Block),
            Statement::IpSetReference {
                ip_set: "acme-blocked-ipv4".into(),
                forwarded_ip_config: Some(ForwardedIpConfig::for_ip_set()),
            },
        );

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "blocked_ipv4_forwarded_ip",
                "priority": 1,
                "action": "BLOCK",
                "statement": {
                    "type": "ipSetReference",
                    "ipSet": "acme-blocked-ipv4",
                    "forwardedIpConfig": {
                        "headerName": "X-Forwarded-For",
                        "fallbackBehavior": "NO_MATCH",
                        "position": "FIRST"
                    }
                },
                "visibility": {
                    "metricName": "blocked_ipv4_forwarded_ip",
                    "sampledRequestsEnabled": true,
                    "metricsEnabled": true
                }
            })
        );
    }

    #[test]
    fn test_caller_rule_parses_with_defaults() {
        let value = json!({
            "name": "custom",
            "priority": 5,
            "overrideAction": "COUNT",
            "statement": {
                "type": "managedRuleGroup",
                "vendorName": "AWS",
                "name": "AWSManagedRulesLinuxRuleSet"
            }
        });

        let rule: Rule = serde_json::from_value(value).unwrap();
        assert_eq!(rule.override_action(), Some(OverrideAction::Count));
        assert_eq!(rule.action(), None);
        assert!(rule.visibility.metric_name.is_empty());
        assert!(rule.visibility.sampled_requests_enabled);
        assert_eq!(rule.band(), Some(PriorityBand::PreCustom));
    }

    #[test]
    fn test_metric_name_sanitizes() {
        assert_eq!(metric_name(&["acme prod", "rate_limit_rule"]), "acme_prod-rate_limit_rule");
        assert_eq!(metric_name(&["", "x.y"]), "x_y");
    }
}
