// Emission of a compiled policy in the firewall service's own shape.
//
// The compiler works on the typed rule model; this module is the single point
// where the statement variants are united into the service's flat rule list,
// with its PascalCase field names and `{"Block": {}}`-style action objects.
// The documents borrow from the Policy and are only built for serialization.
//
// IP sets and regex pattern sets have no ARN before provisioning, so rule
// statements carry the policy-local resource name in their `ARN` field. The
// provisioning layer swaps in the real ARN when it materializes the sets.

use serde::Serialize;

use crate::firewall_rule::{
    Aggregation, FallbackBehavior, ForwardedIpConfig, ForwardedIpPosition, MatchField,
    OverrideAction, Rule, RuleAction, RuleVerdict, Statement, VisibilityConfig,
};
use crate::policy::Policy;
use crate::policy_config::{DefaultAction, LoggingConfig, RemovalPolicy, Scope};
use crate::resource_set::{IpSet, IpVersion, RegexPatternSet};

/// Serializes as `{}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Empty {}

/// Service scope name; edge policies are attached to the CDN
pub fn scope_name(scope: Scope) -> &'static str {
    match scope {
        Scope::Regional => "REGIONAL",
        Scope::Edge => "CLOUDFRONT",
    }
}

/// Service aggregate key type of a rate-based rule
pub fn aggregate_key_type(aggregation: Aggregation) -> &'static str {
    match aggregation {
        Aggregation::ForwardedIp => "FORWARDED_IP",
        Aggregation::SourceIp => "IP",
    }
}

// ============================================================================
// Web ACL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebAclDocument<'a> {
    pub name: &'a str,
    pub scope: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub default_action: ActionDocument,
    pub visibility_config: VisibilityDocument<'a>,
    pub rules: Vec<RuleDocument<'a>>,
    #[serde(rename = "IPSets")]
    pub ip_sets: Vec<IpSetDocument<'a>>,
    pub regex_pattern_sets: Vec<RegexPatternSetDocument<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging_configuration: Option<LoggingDocument<'a>>,
}

impl<'a> From<&'a Policy> for WebAclDocument<'a> {
    fn from(policy: &'a Policy) -> Self {
        let default_action = match policy.default_action() {
            DefaultAction::Allow => ActionDocument::Allow(Empty {}),
            DefaultAction::Block => ActionDocument::Block(Empty {}),
        };

        Self {
            name: policy.name(),
            scope: scope_name(policy.scope()),
            description: policy.description(),
            default_action,
            visibility_config: VisibilityDocument::from(policy.visibility()),
            rules: policy.rules().iter().map(RuleDocument::from).collect(),
            ip_sets: policy
                .resources()
                .ip_sets
                .iter()
                .map(IpSetDocument::from)
                .collect(),
            regex_pattern_sets: policy
                .resources()
                .regex_pattern_sets
                .iter()
                .map(RegexPatternSetDocument::from)
                .collect(),
            logging_configuration: policy.logging().map(LoggingDocument::from),
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionDocument {
    Allow(Empty),
    Block(Empty),
    Count(Empty),
}

impl From<RuleAction> for ActionDocument {
    fn from(action: RuleAction) -> Self {
        match action {
            RuleAction::Allow => ActionDocument::Allow(Empty {}),
            RuleAction::Block => ActionDocument::Block(Empty {}),
            RuleAction::Count => ActionDocument::Count(Empty {}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverrideActionDocument {
    None(Empty),
    Count(Empty),
}

impl From<OverrideAction> for OverrideActionDocument {
    fn from(action: OverrideAction) -> Self {
        match action {
            OverrideAction::None => OverrideActionDocument::None(Empty {}),
            OverrideAction::Count => OverrideActionDocument::Count(Empty {}),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VisibilityDocument<'a> {
    pub sampled_requests_enabled: bool,
    #[serde(rename = "CloudWatchMetricsEnabled")]
    pub metrics_enabled: bool,
    pub metric_name: &'a str,
}

impl<'a> From<&'a VisibilityConfig> for VisibilityDocument<'a> {
    fn from(visibility: &'a VisibilityConfig) -> Self {
        Self {
            sampled_requests_enabled: visibility.sampled_requests_enabled,
            metrics_enabled: visibility.metrics_enabled,
            metric_name: &visibility.metric_name,
        }
    }
}

/// One entry of the service's rule list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleDocument<'a> {
    pub name: &'a str,
    pub priority: u32,
    pub statement: StatementDocument<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_action: Option<OverrideActionDocument>,
    pub visibility_config: VisibilityDocument<'a>,
}

impl<'a> From<&'a Rule> for RuleDocument<'a> {
    fn from(rule: &'a Rule) -> Self {
        let (action, override_action) = match rule.verdict {
            RuleVerdict::Action(action) => (Some(action.into()), None),
            RuleVerdict::OverrideAction(action) => (None, Some(action.into())),
        };

        Self {
            name: &rule.name,
            priority: rule.priority,
            statement: StatementDocument::from(&rule.statement),
            action,
            override_action,
            visibility_config: VisibilityDocument::from(&rule.visibility),
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Statement keyed by its service statement type.
///
/// Caller-defined statements are already in service shape and pass through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StatementDocument<'a> {
    #[serde(rename = "IPSetReferenceStatement")]
    IpSetReference(IpSetReferenceDocument<'a>),
    RegexPatternSetReferenceStatement(RegexPatternSetReferenceDocument<'a>),
    ManagedRuleGroupStatement(ManagedRuleGroupDocument<'a>),
    RateBasedStatement(RateBasedDocument<'a>),
    #[serde(untagged)]
    Custom(&'a serde_json::Value),
}

impl<'a> From<&'a Statement> for StatementDocument<'a> {
    fn from(statement: &'a Statement) -> Self {
        match statement {
            Statement::IpSetReference {
                ip_set,
                forwarded_ip_config,
            } => StatementDocument::IpSetReference(IpSetReferenceDocument {
                arn: ip_set,
                forwarded_ip_config: forwarded_ip_config.as_ref().map(ForwardedIpDocument::from),
            }),
            Statement::RegexPatternSetReference { regex_set, field } => {
                StatementDocument::RegexPatternSetReferenceStatement(
                    RegexPatternSetReferenceDocument {
                        arn: regex_set,
                        field_to_match: FieldToMatchDocument::from(field),
                        text_transformations: vec![TextTransformationDocument {
                            priority: 0,
                            kind: "NONE",
                        }],
                    },
                )
            }
            Statement::ManagedRuleGroup {
                vendor_name,
                name,
                excluded_rules,
            } => StatementDocument::ManagedRuleGroupStatement(ManagedRuleGroupDocument {
                vendor_name,
                name,
                excluded_rules: excluded_rules
                    .iter()
                    .map(|rule| ExcludedRuleDocument { name: rule })
                    .collect(),
            }),
            Statement::RateBased {
                limit,
                aggregate_key,
                forwarded_ip_config,
            } => StatementDocument::RateBasedStatement(RateBasedDocument {
                limit: *limit,
                aggregate_key_type: aggregate_key_type(*aggregate_key),
                forwarded_ip_config: forwarded_ip_config.as_ref().map(ForwardedIpDocument::from),
            }),
            Statement::Custom { definition } => StatementDocument::Custom(definition),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForwardedIpDocument<'a> {
    pub header_name: &'a str,
    pub fallback_behavior: FallbackBehavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<ForwardedIpPosition>,
}

impl<'a> From<&'a ForwardedIpConfig> for ForwardedIpDocument<'a> {
    fn from(config: &'a ForwardedIpConfig) -> Self {
        Self {
            header_name: &config.header_name,
            fallback_behavior: config.fallback_behavior,
            position: config.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpSetReferenceDocument<'a> {
    #[serde(rename = "ARN")]
    pub arn: &'a str,
    #[serde(rename = "IPSetForwardedIPConfig", skip_serializing_if = "Option::is_none")]
    pub forwarded_ip_config: Option<ForwardedIpDocument<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegexPatternSetReferenceDocument<'a> {
    #[serde(rename = "ARN")]
    pub arn: &'a str,
    pub field_to_match: FieldToMatchDocument<'a>,
    pub text_transformations: Vec<TextTransformationDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldToMatchDocument<'a> {
    UriPath(Empty),
    SingleHeader {
        #[serde(rename = "Name")]
        name: &'a str,
    },
}

impl<'a> From<&'a MatchField> for FieldToMatchDocument<'a> {
    fn from(field: &'a MatchField) -> Self {
        match field {
            MatchField::UriPath => FieldToMatchDocument::UriPath(Empty {}),
            MatchField::SingleHeader { name } => FieldToMatchDocument::SingleHeader { name },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextTransformationDocument {
    pub priority: u32,
    #[serde(rename = "Type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedRuleGroupDocument<'a> {
    pub vendor_name: &'a str,
    pub name: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_rules: Vec<ExcludedRuleDocument<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExcludedRuleDocument<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RateBasedDocument<'a> {
    pub limit: u64,
    pub aggregate_key_type: &'static str,
    #[serde(rename = "ForwardedIPConfig", skip_serializing_if = "Option::is_none")]
    pub forwarded_ip_config: Option<ForwardedIpDocument<'a>>,
}

// ============================================================================
// Backing resources and logging
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpSetDocument<'a> {
    pub name: &'a str,
    pub scope: &'static str,
    #[serde(rename = "IPAddressVersion")]
    pub ip_address_version: IpVersion,
    pub addresses: &'a [String],
}

impl<'a> From<&'a IpSet> for IpSetDocument<'a> {
    fn from(set: &'a IpSet) -> Self {
        Self {
            name: &set.name,
            scope: scope_name(set.scope),
            ip_address_version: set.ip_version,
            addresses: &set.addresses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegexPatternSetDocument<'a> {
    pub name: &'a str,
    pub scope: &'static str,
    pub regular_expression_list: Vec<RegexDocument<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegexDocument<'a> {
    pub regex_string: &'a str,
}

impl<'a> From<&'a RegexPatternSet> for RegexPatternSetDocument<'a> {
    fn from(set: &'a RegexPatternSet) -> Self {
        Self {
            name: &set.name,
            scope: scope_name(set.scope),
            regular_expression_list: set
                .patterns
                .iter()
                .map(|pattern| RegexDocument {
                    regex_string: pattern,
                })
                .collect(),
        }
    }
}

/// Log sink settings, passed through for the provisioning layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingDocument<'a> {
    pub sink_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    pub removal_policy: RemovalPolicy,
}

impl<'a> From<&'a LoggingConfig> for LoggingDocument<'a> {
    fn from(logging: &'a LoggingConfig) -> Self {
        Self {
            sink_name: &logging.sink_name,
            retention_days: logging.retention_days,
            removal_policy: logging.removal_policy,
        }
    }
}
