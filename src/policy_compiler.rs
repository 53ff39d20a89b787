// Policy assembly and whole-policy validation.
//
// compile() runs every builder in band-table order against one allocator,
// registers their backing resources, interleaves caller pre-rules into the
// sub-10 region and validates the result. Compilation is all-or-nothing: any
// error aborts without returning a partial policy.

use log::{debug, info};
use std::collections::{HashMap, HashSet};

use crate::builders::custom_rule::{CustomPosition, CustomRuleBuilder};
use crate::builders::ip_list::{IpListBuilder, IpListKind};
use crate::builders::managed_group::ManagedGroupBuilder;
use crate::builders::rate_limit::RateLimitBuilder;
use crate::builders::regex_allowlist::{AllowlistTarget, RegexAllowlistBuilder};
use crate::builders::{BuildContext, RuleBuilder};
use crate::compile_error::CompileError;
use crate::firewall_rule::{EnforcementMode, Rule, RuleVerdict};
use crate::policy::Policy;
use crate::policy_config::PolicyConfig;
use crate::priority_band::{PriorityAllocator, PriorityBand};
use crate::resource_set::{IpVersion, ResourceSets};

/// Stateless `PolicyConfig -> Policy` compiler
pub struct PolicyCompiler;

impl PolicyCompiler {
    /// Compile a configuration into a validated policy
    pub fn compile(config: &PolicyConfig) -> Result<Policy, CompileError> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(CompileError::EmptyRequiredField {
                field: "name".to_string(),
                reason: "policy name cannot be empty".to_string(),
            });
        }

        let mode = EnforcementMode::from_enforce(config.enforce);
        let ctx = BuildContext::new(name, config.scope, mode);
        let mut allocator = PriorityAllocator::new();
        let mut resources = ResourceSets::new();
        let mut pre_rules = Vec::new();
        let mut generated = Vec::new();

        for builder in Self::pipeline(config) {
            let output = match builder.build(&ctx, &mut allocator)? {
                Some(output) => output,
                None => {
                    debug!("{}: disabled", builder.band());
                    continue;
                }
            };

            for resource in output.resources {
                resources.register(resource)?;
            }

            match output.band {
                PriorityBand::PreCustom => pre_rules = output.rules,
                _ => generated.extend(output.rules),
            }
        }

        let rules = Self::interleave(pre_rules, generated);
        let policy = Policy::new(
            name.to_string(),
            config.scope,
            config.description.clone(),
            config.default_action,
            mode,
            rules,
            resources,
            config.logging.clone(),
        );

        PolicyValidator::validate(&policy)?;

        info!(
            "Compiled policy {}: {} rules, {} backing resources, mode {}",
            policy.name(),
            policy.rules().len(),
            policy.resources().len(),
            mode
        );
        Ok(policy)
    }

    /// One builder per band, in band-table order.
    ///
    /// Blocklists come before allowlists so that explicit blocks always win
    /// against overlapping allows.
    pub fn pipeline(config: &PolicyConfig) -> Vec<Box<dyn RuleBuilder + '_>> {
        vec![
            Box::new(CustomRuleBuilder::new(CustomPosition::Pre, &config.pre_rules)),
            Box::new(IpListBuilder::new(
                IpListKind::Block,
                IpVersion::Ipv4,
                config.blocked_ipv4.as_deref(),
            )),
            Box::new(IpListBuilder::new(
                IpListKind::Block,
                IpVersion::Ipv6,
                config.blocked_ipv6.as_deref(),
            )),
            Box::new(RegexAllowlistBuilder::new(
                AllowlistTarget::Path,
                config.allowed_paths.as_deref(),
            )),
            Box::new(IpListBuilder::new(
                IpListKind::Allow,
                IpVersion::Ipv4,
                config.allowed_ipv4.as_deref(),
            )),
            Box::new(IpListBuilder::new(
                IpListKind::Allow,
                IpVersion::Ipv6,
                config.allowed_ipv6.as_deref(),
            )),
            Box::new(RegexAllowlistBuilder::new(
                AllowlistTarget::UserAgent,
                config.allowed_user_agents.as_deref(),
            )),
            Box::new(ManagedGroupBuilder::new(
                &config.managed_groups,
                &config.excluded_common_rules,
            )),
            Box::new(RateLimitBuilder::new(config.rate_limit.as_ref())),
            Box::new(CustomRuleBuilder::new(CustomPosition::Post, &config.post_rules)),
        ]
    }

    /// Merge caller pre-rules into the generated rules by priority.
    ///
    /// Both inputs are ascending. Pre-rules share the sub-10 region with the
    /// blocklist bands, so a pre-rule at 5 lands after blocklist rules 1-4.
    fn interleave(pre_rules: Vec<Rule>, generated: Vec<Rule>) -> Vec<Rule> {
        let mut merged = Vec::with_capacity(pre_rules.len() + generated.len());
        let mut pre = pre_rules.into_iter().peekable();

        for rule in generated {
            while let Some(next) = pre.next_if(|p| p.priority <= rule.priority) {
                merged.push(next);
            }
            merged.push(rule);
        }
        merged.extend(pre);
        merged
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Whole-policy invariant checks, run on every compiled policy
pub struct PolicyValidator;

impl PolicyValidator {
    pub fn validate(policy: &Policy) -> Result<(), CompileError> {
        Self::validate_names(policy.rules())?;
        Self::validate_priorities(policy.rules())?;
        Self::validate_order(policy.rules())?;
        Self::validate_mode_consistency(policy)?;
        Self::validate_resource_refs(policy)?;
        Ok(())
    }

    /// Every priority appears once
    fn validate_priorities(rules: &[Rule]) -> Result<(), CompileError> {
        let mut seen: HashMap<u32, &str> = HashMap::new();
        for rule in rules {
            if let Some(first) = seen.insert(rule.priority, &rule.name) {
                return Err(CompileError::DuplicatePriority {
                    priority: rule.priority,
                    first: first.to_string(),
                    second: rule.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every name appears once
    fn validate_names(rules: &[Rule]) -> Result<(), CompileError> {
        let mut seen = HashSet::new();
        for rule in rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(CompileError::DuplicateName(rule.name.clone()));
            }
        }
        Ok(())
    }

    /// Strictly ascending by priority; a violation is a compiler defect
    fn validate_order(rules: &[Rule]) -> Result<(), CompileError> {
        for pair in rules.windows(2) {
            if pair[0].priority >= pair[1].priority {
                return Err(CompileError::InternalInvariant(format!(
                    "rule {} (priority {}) emitted before rule {} (priority {})",
                    pair[0].name, pair[0].priority, pair[1].name, pair[1].priority
                )));
            }
        }
        Ok(())
    }

    /// All mode-sensitive rules carry the verdict derived from the policy mode
    fn validate_mode_consistency(policy: &Policy) -> Result<(), CompileError> {
        let mode = policy.mode();
        for rule in policy.mode_sensitive_rules() {
            let expected = match rule.verdict {
                RuleVerdict::OverrideAction(_) => RuleVerdict::OverrideAction(mode.group_override()),
                RuleVerdict::Action(_) => RuleVerdict::Action(mode.rule_action()),
            };
            if rule.verdict != expected {
                return Err(CompileError::InternalInvariant(format!(
                    "rule {} has verdict {:?}, expected {:?} in {} mode",
                    rule.name, rule.verdict, expected, mode
                )));
            }
        }
        Ok(())
    }

    /// Generated rules only reference resources the policy defines.
    ///
    /// Caller rules may point at externally provisioned sets and are skipped.
    fn validate_resource_refs(policy: &Policy) -> Result<(), CompileError> {
        for rule in policy.rules() {
            let generated = rule.band().map(|band| band.is_fixed()).unwrap_or(false);
            if !generated {
                continue;
            }
            if let Some(reference) = rule.statement.resource_ref() {
                if !policy.resources().contains(reference) {
                    return Err(CompileError::InternalInvariant(format!(
                        "rule {} references undefined resource {}",
                        rule.name, reference
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall_rule::{
        Aggregation, OverrideAction, RuleAction, Statement, VisibilityConfig,
    };
    use crate::policy_config::{
        DefaultAction, LoggingConfig, ManagedGroupToggle, PolicyConfigParser, RemovalPolicy, Scope,
    };
    use serde_json::json;

    fn acme() -> PolicyConfig {
        PolicyConfig::new("acme")
            .with_scope(Scope::Regional)
            .with_default_action(DefaultAction::Allow)
            .with_enforce(false)
    }

    fn custom(name: &str, priority: u32) -> Rule {
        Rule::new(
            name,
            priority,
            RuleVerdict::Action(RuleAction::Block),
            Statement::Custom {
                definition: json!({"byteMatch": {"searchString": "/admin"}}),
            },
        )
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn everything(enforce: bool) -> PolicyConfig {
        acme()
            .with_enforce(enforce)
            .with_pre_rule(custom("geo_block", 5))
            .with_blocked_ipv4(strings(&["1.2.3.4/32"]))
            .with_blocked_ipv6(strings(&["2001:db8::/32"]))
            .with_allowed_paths(strings(&["^/health$"]))
            .with_allowed_ipv4(strings(&["10.0.0.0/8"]))
            .with_allowed_ipv6(strings(&["fd00::/8"]))
            .with_allowed_user_agents(strings(&["^curl.*"]))
            .with_managed_group(ManagedGroupToggle::new("php"))
            .with_managed_group(ManagedGroupToggle::new("ip-reputation"))
            .with_managed_group(ManagedGroupToggle::new("anonymous-ip"))
            .with_managed_group(ManagedGroupToggle::new("sql-injection"))
            .with_managed_group(ManagedGroupToggle::new("bot-control"))
            .with_rate_limit(1000, Aggregation::ForwardedIp)
            .with_post_rule(custom("late_count", 40))
    }

    // Scenario 1
    #[test]
    fn test_minimal_policy() {
        let policy = PolicyCompiler::compile(&acme()).unwrap();

        assert_eq!(policy.rules().len(), 2);
        assert_eq!(policy.default_action(), DefaultAction::Allow);

        let bad_actors = &policy.rules()[0];
        assert_eq!(bad_actors.name, "bad_actors_rule");
        assert_eq!(bad_actors.priority, 20);
        assert_eq!(bad_actors.override_action(), Some(OverrideAction::None));

        let common = &policy.rules()[1];
        assert_eq!(common.name, "common_rule_set");
        assert_eq!(common.priority, 21);
        assert_eq!(common.override_action(), Some(OverrideAction::Count));

        assert!(policy.resources().is_empty());
    }

    // Scenario 2
    #[test]
    fn test_ipv4_blocklist_adds_two_rules() {
        let config = acme().with_blocked_ipv4(strings(&["1.2.3.4/32"]));
        let policy = PolicyCompiler::compile(&config).unwrap();

        assert_eq!(policy.rules().len(), 4);
        let blocks = policy.rules_in_band(PriorityBand::BlockV4);
        assert_eq!(blocks.iter().map(|r| r.priority).collect::<Vec<_>>(), vec![1, 2]);
        assert!(blocks.iter().all(|r| r.action() == Some(RuleAction::Block)));
        assert!(blocks
            .iter()
            .all(|r| r.statement.resource_ref() == Some("acme-blocked-ipv4")));

        assert_eq!(policy.resources().ip_sets.len(), 1);
        assert_eq!(policy.resources().ip_sets[0].addresses, vec!["1.2.3.4/32"]);
    }

    // Scenario 3
    #[test]
    fn test_rate_limit_follows_mode() {
        let observe = acme().with_rate_limit(1000, Aggregation::ForwardedIp);
        let observed = PolicyCompiler::compile(&observe).unwrap();
        let rule = observed.rule("rate_limit_rule").unwrap();
        assert_eq!(rule.priority, 30);
        assert_eq!(rule.action(), Some(RuleAction::Count));

        let enforced = PolicyCompiler::compile(&observe.clone().with_enforce(true)).unwrap();
        let rule = enforced.rule("rate_limit_rule").unwrap();
        assert_eq!(rule.action(), Some(RuleAction::Block));

        assert_eq!(observed.priorities(), enforced.priorities());
    }

    // Scenario 4
    #[test]
    fn test_pre_rule_placement_and_collision() {
        let policy = PolicyCompiler::compile(&acme().with_pre_rule(custom("custom", 5))).unwrap();
        assert_eq!(policy.rules()[0].name, "custom");
        assert_eq!(policy.rules()[0].priority, 5);

        let err = PolicyCompiler::compile(&acme().with_pre_rule(custom("custom", 15))).unwrap_err();
        assert!(matches!(err, CompileError::PriorityCollision { priority: 15, .. }));
    }

    // Scenario 5
    #[test]
    fn test_duplicate_custom_names() {
        let config = acme()
            .with_pre_rule(custom("custom", 5))
            .with_post_rule(custom("custom", 40));
        let err = PolicyCompiler::compile(&config).unwrap_err();
        assert_eq!(err, CompileError::DuplicateName("custom".into()));
    }

    #[test]
    fn test_same_name_and_priority_reports_name() {
        let config = acme()
            .with_pre_rule(custom("custom", 5))
            .with_pre_rule(custom("custom", 5));
        let err = PolicyCompiler::compile(&config).unwrap_err();
        assert_eq!(err, CompileError::DuplicateName("custom".into()));
    }

    #[test]
    fn test_custom_rule_shadowing_generated_name() {
        let config = acme().with_post_rule(custom("common_rule_set", 50));
        let err = PolicyCompiler::compile(&config).unwrap_err();
        assert_eq!(err, CompileError::DuplicateName("common_rule_set".into()));
    }

    #[test]
    fn test_duplicate_custom_priorities() {
        let config = acme()
            .with_post_rule(custom("first", 40))
            .with_post_rule(custom("second", 40));
        let err = PolicyCompiler::compile(&config).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicatePriority {
                priority: 40,
                first: "first".into(),
                second: "second".into(),
            }
        );
    }

    // Scenario 6
    #[test]
    fn test_path_and_user_agent_allowlists() {
        let config = acme()
            .with_allowed_paths(strings(&["^/health$"]))
            .with_allowed_user_agents(strings(&["^curl.*"]));
        let policy = PolicyCompiler::compile(&config).unwrap();

        let path = policy.rule("allowed_paths_rule").unwrap();
        let agent = policy.rule("allowed_user_agents_rule").unwrap();
        assert_eq!(path.priority, 10);
        assert_eq!(agent.priority, 15);
        assert_ne!(path.statement.resource_ref(), agent.statement.resource_ref());
        assert_eq!(policy.resources().regex_pattern_sets.len(), 2);
        assert_eq!(policy.rules().len(), 4);
    }

    #[test]
    fn test_every_band_in_order() {
        let policy = PolicyCompiler::compile(&everything(true)).unwrap();

        assert_eq!(
            policy.priorities(),
            vec![1, 2, 3, 4, 5, 10, 11, 12, 13, 14, 15, 20, 21, 22, 23, 24, 25, 26, 30, 40]
        );
        assert_eq!(policy.resources().ip_sets.len(), 4);
        assert_eq!(policy.resources().regex_pattern_sets.len(), 2);
    }

    #[test]
    fn test_band_containment() {
        let config = everything(false);
        let policy = PolicyCompiler::compile(&config).unwrap();

        for builder in PolicyCompiler::pipeline(&config) {
            let band = builder.band();
            let output = builder
                .build(
                    &BuildContext::new("acme", Scope::Regional, EnforcementMode::Observe),
                    &mut PriorityAllocator::new(),
                )
                .unwrap();
            for rule in output.map(|o| o.rules).unwrap_or_default() {
                assert!(band.contains(rule.priority), "{} outside {}", rule.name, band);
                assert_eq!(policy.rule(&rule.name).map(|r| r.priority), Some(rule.priority));
            }
        }
    }

    #[test]
    fn test_pipeline_follows_band_table() {
        let config = acme();
        let bands: Vec<PriorityBand> = PolicyCompiler::pipeline(&config)
            .iter()
            .map(|builder| builder.band())
            .collect();
        assert_eq!(bands, PriorityBand::all().to_vec());
    }

    #[test]
    fn test_determinism() {
        let config = everything(true);
        let first = PolicyCompiler::compile(&config).unwrap();
        let second = PolicyCompiler::compile(&config).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn test_flipping_enforce_only_touches_mode_sensitive_rules() {
        let observed = PolicyCompiler::compile(&everything(false)).unwrap();
        let enforced = PolicyCompiler::compile(&everything(true)).unwrap();
        assert_ne!(observed.fingerprint().unwrap(), enforced.fingerprint().unwrap());
        assert_eq!(observed.rules().len(), enforced.rules().len());

        for (before, after) in observed.rules().iter().zip(enforced.rules()) {
            assert_eq!(before.name, after.name);
            assert_eq!(before.priority, after.priority);
            assert_eq!(before.statement, after.statement);
            assert_eq!(before.visibility, after.visibility);

            if Policy::is_mode_sensitive(before) {
                assert_ne!(before.verdict, after.verdict, "{}", before.name);
            } else {
                assert_eq!(before.verdict, after.verdict, "{}", before.name);
            }
        }

        let sensitive: Vec<&str> = enforced
            .mode_sensitive_rules()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(
            sensitive,
            vec![
                "common_rule_set",
                "php_rule_set",
                "ip_reputation_list",
                "anonymous_ip_list",
                "sql_injection_rule_set",
                "bot_control_rule_set",
                "rate_limit_rule",
            ]
        );
    }

    #[test]
    fn test_mode_consistency_observe() {
        let policy = PolicyCompiler::compile(&everything(false)).unwrap();
        for rule in policy.mode_sensitive_rules() {
            match rule.verdict {
                RuleVerdict::OverrideAction(action) => assert_eq!(action, OverrideAction::Count),
                RuleVerdict::Action(action) => assert_eq!(action, RuleAction::Count),
            }
        }
    }

    #[test]
    fn test_disabled_features_leave_bands_empty() {
        let policy = PolicyCompiler::compile(&acme()).unwrap();
        for band in PriorityBand::all() {
            if band != PriorityBand::Managed {
                assert!(policy.rules_in_band(band).is_empty(), "band {} not empty", band);
            }
        }
    }

    #[test]
    fn test_empty_list_activates_feature() {
        let policy = PolicyCompiler::compile(&acme().with_allowed_ipv4(vec![])).unwrap();
        assert_eq!(policy.rules_in_band(PriorityBand::AllowV4).len(), 2);
        assert!(policy.resources().ip_set("acme-allowed-ipv4").unwrap().addresses.is_empty());
    }

    #[test]
    fn test_resource_names_follow_sanitized_policy_name() {
        let config = PolicyConfig::new("acme prod")
            .with_blocked_ipv4(strings(&["1.2.3.4/32"]))
            .with_allowed_paths(strings(&["^/health$"]));
        let policy = PolicyCompiler::compile(&config).unwrap();

        assert!(policy.resources().ip_set("acme_prod-blocked-ipv4").is_some());
        assert!(policy.resources().regex_pattern_set("acme_prod-allowed-paths").is_some());
        assert_eq!(
            policy.rule("blocked_ipv4_source_ip").unwrap().statement.resource_ref(),
            Some("acme_prod-blocked-ipv4")
        );
    }

    #[test]
    fn test_empty_policy_name() {
        let err = PolicyCompiler::compile(&PolicyConfig::new("  ")).unwrap_err();
        assert!(matches!(err, CompileError::EmptyRequiredField { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_builder_errors_propagate_unchanged() {
        let err = PolicyCompiler::compile(&acme().with_allowed_paths(strings(&["(["]))).unwrap_err();
        assert!(matches!(err, CompileError::InvalidPattern { .. }));

        let config = acme().with_managed_group(ManagedGroupToggle::new("unknown"));
        let err = PolicyCompiler::compile(&config).unwrap_err();
        assert!(matches!(err, CompileError::EmptyRequiredField { .. }));
        assert!(!err.is_internal());
    }

    #[test]
    fn test_pass_through_fields() {
        let logging = LoggingConfig {
            sink_name: "aws-waf-logs-acme".into(),
            retention_days: Some(90),
            removal_policy: RemovalPolicy::Destroy,
        };
        let config = acme()
            .with_scope(Scope::Edge)
            .with_default_action(DefaultAction::Block)
            .with_description("edge policy")
            .with_logging(logging.clone());
        let policy = PolicyCompiler::compile(&config).unwrap();

        assert_eq!(policy.scope(), Scope::Edge);
        assert_eq!(policy.default_action(), DefaultAction::Block);
        assert_eq!(policy.description(), Some("edge policy"));
        assert_eq!(policy.logging(), Some(&logging));
        assert_eq!(policy.visibility(), &VisibilityConfig::for_metric(&["acme"]));
    }

    #[test]
    fn test_compile_from_json_config() {
        let value = json!({
            "name": "acme",
            "enforce": true,
            "blockedIPv4": ["1.2.3.4/32"],
            "rateLimit": {"threshold": 1000},
            "preRules": [{
                "name": "custom",
                "priority": 5,
                "action": "BLOCK",
                "statement": {"type": "custom", "definition": {"geoMatch": {"countryCodes": ["XX"]}}}
            }]
        });
        let config = PolicyConfigParser::from_json(&value.to_string()).unwrap();
        let policy = PolicyCompiler::compile(&config).unwrap();

        assert_eq!(policy.priorities(), vec![1, 2, 5, 20, 21, 30]);
        assert_eq!(policy.rule("custom").unwrap().visibility.metric_name, "acme-custom");

        let output: serde_json::Value = serde_json::from_str(&policy.to_json().unwrap()).unwrap();
        assert_eq!(output["DefaultAction"], json!({"Allow": {}}));
        assert_eq!(output["Rules"][5]["Name"], "rate_limit_rule");
        assert_eq!(output["Rules"][5]["Action"], json!({"Block": {}}));
        assert_eq!(
            output["Rules"][5]["Statement"]["RateBasedStatement"]["AggregateKeyType"],
            "FORWARDED_IP"
        );
        assert_eq!(output["Rules"][3]["OverrideAction"], json!({"None": {}}));
        assert_eq!(
            output["Rules"][2]["Statement"],
            json!({"geoMatch": {"countryCodes": ["XX"]}})
        );
        assert_eq!(output["IPSets"][0]["Name"], "acme-blocked-ipv4");
    }

    #[test]
    fn test_interleave_keeps_order() {
        let merged = PolicyCompiler::interleave(
            vec![custom("zero", 0), custom("five", 5), custom("nine", 9)],
            vec![custom("b1", 1), custom("b2", 2), custom("m20", 20)],
        );
        let priorities: Vec<u32> = merged.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![0, 1, 2, 5, 9, 20]);
    }

    #[test]
    fn test_validator_flags_unsorted_rules_as_internal() {
        let policy = Policy::new(
            "acme".into(),
            Scope::Regional,
            None,
            DefaultAction::Allow,
            EnforcementMode::Observe,
            vec![custom("later", 40), custom("earlier", 5)],
            ResourceSets::new(),
            None,
        );
        let err = PolicyValidator::validate(&policy).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_concurrent_compiles_agree() {
        let config = everything(true);
        let expected = PolicyCompiler::compile(&config).unwrap();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| PolicyCompiler::compile(&config).unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }
}
