// Path and User-Agent allowlists.
//
// One regex pattern set and one ALLOW rule per list. Patterns are checked
// with the regex crate and against the firewall service's pattern-set limits
// before anything is emitted.

use log::{debug, warn};
use regex::Regex;

use super::{BandOutput, BuildContext, RuleBuilder};
use crate::compile_error::CompileError;
use crate::firewall_rule::{MatchField, Rule, RuleAction, RuleVerdict, Statement};
use crate::priority_band::{PriorityAllocator, PriorityBand};
use crate::resource_set::{BackingResource, RegexPatternSet};

/// Longest pattern accepted in a regex pattern set
pub const MAX_PATTERN_LENGTH: usize = 200;

/// Most patterns accepted in one regex pattern set
pub const MAX_PATTERNS_PER_SET: usize = 10;

/// Request component an allowlist matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowlistTarget {
    /// URI path
    Path,
    /// `user-agent` header
    UserAgent,
}

impl AllowlistTarget {
    pub fn field_name(&self) -> &'static str {
        match self {
            AllowlistTarget::Path => "allowedPaths",
            AllowlistTarget::UserAgent => "allowedUserAgents",
        }
    }

    pub fn rule_name(&self) -> &'static str {
        match self {
            AllowlistTarget::Path => "allowed_paths_rule",
            AllowlistTarget::UserAgent => "allowed_user_agents_rule",
        }
    }

    fn resource_suffix(&self) -> &'static str {
        match self {
            AllowlistTarget::Path => "allowed-paths",
            AllowlistTarget::UserAgent => "allowed-user-agents",
        }
    }

    fn match_field(&self) -> MatchField {
        match self {
            AllowlistTarget::Path => MatchField::UriPath,
            AllowlistTarget::UserAgent => MatchField::SingleHeader {
                name: "user-agent".to_string(),
            },
        }
    }
}

/// Builder for the path or User-Agent allowlist
#[derive(Debug, Clone, Copy)]
pub struct RegexAllowlistBuilder<'a> {
    target: AllowlistTarget,
    patterns: Option<&'a [String]>,
}

impl<'a> RegexAllowlistBuilder<'a> {
    pub fn new(target: AllowlistTarget, patterns: Option<&'a [String]>) -> Self {
        Self { target, patterns }
    }

    /// Check every pattern, then collapse repeats keeping first occurrence.
    ///
    /// The set-size limit applies to the collapsed list.
    fn validate(&self, patterns: &[String]) -> Result<Vec<String>, CompileError> {
        let mut unique: Vec<String> = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            if pattern.is_empty() {
                return Err(self.invalid(pattern, "empty pattern".to_string()));
            }
            if pattern.len() > MAX_PATTERN_LENGTH {
                return Err(self.invalid(
                    pattern,
                    format!("longer than {} characters", MAX_PATTERN_LENGTH),
                ));
            }
            Regex::new(pattern).map_err(|e| self.invalid(pattern, e.to_string()))?;

            if !unique.contains(pattern) {
                unique.push(pattern.clone());
            }
        }

        if unique.len() > MAX_PATTERNS_PER_SET {
            return Err(self.invalid(
                "",
                format!(
                    "{} distinct patterns given, a pattern set holds at most {}",
                    unique.len(),
                    MAX_PATTERNS_PER_SET
                ),
            ));
        }

        Ok(unique)
    }

    fn invalid(&self, pattern: &str, reason: String) -> CompileError {
        CompileError::InvalidPattern {
            field: self.target.field_name().to_string(),
            pattern: pattern.to_string(),
            reason,
        }
    }
}

impl<'a> RuleBuilder for RegexAllowlistBuilder<'a> {
    fn band(&self) -> PriorityBand {
        match self.target {
            AllowlistTarget::Path => PriorityBand::AllowPath,
            AllowlistTarget::UserAgent => PriorityBand::AllowUserAgent,
        }
    }

    fn build(
        &self,
        ctx: &BuildContext<'_>,
        allocator: &mut PriorityAllocator,
    ) -> Result<Option<BandOutput>, CompileError> {
        let patterns = match self.patterns {
            Some(patterns) => patterns,
            None => return Ok(None),
        };

        let unique = self.validate(patterns)?;
        if unique.is_empty() {
            warn!(
                "{} is configured but empty; its rule will never match",
                self.target.field_name()
            );
        }

        let pattern_set = RegexPatternSet {
            name: ctx.resource_name(self.target.resource_suffix()),
            scope: ctx.scope,
            patterns: unique,
        };

        let priority = allocator.allocate(self.band(), 1)?[0];
        let rule_name = self.target.rule_name();
        let rule = Rule::new(
            rule_name,
            priority,
            RuleVerdict::Action(RuleAction::Allow),
            Statement::RegexPatternSetReference {
                regex_set: pattern_set.name.clone(),
                field: self.target.match_field(),
            },
        )
        .with_visibility(ctx.visibility(rule_name));

        debug!(
            "{}: {} pattern(s) at priority {}",
            self.band(),
            pattern_set.patterns.len(),
            priority
        );

        Ok(Some(
            BandOutput::new(self.band())
                .with_rule(rule)
                .with_resource(BackingResource::RegexPatternSet(pattern_set)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall_rule::EnforcementMode;
    use crate::policy_config::Scope;

    fn build(target: AllowlistTarget, patterns: &[&str]) -> Result<Option<BandOutput>, CompileError> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        let ctx = BuildContext::new("acme", Scope::Edge, EnforcementMode::Enforce);
        RegexAllowlistBuilder::new(target, Some(&patterns)).build(&ctx, &mut PriorityAllocator::new())
    }

    #[test]
    fn test_path_allowlist() {
        let output = build(AllowlistTarget::Path, &["^/health$"]).unwrap().unwrap();

        assert_eq!(output.rules.len(), 1);
        let rule = &output.rules[0];
        assert_eq!(rule.name, "allowed_paths_rule");
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.action(), Some(RuleAction::Allow));
        assert_eq!(
            rule.statement,
            Statement::RegexPatternSetReference {
                regex_set: "acme-allowed-paths".into(),
                field: MatchField::UriPath,
            }
        );
        assert_eq!(rule.visibility.metric_name, "acme-allowed_paths_rule");

        match &output.resources[0] {
            BackingResource::RegexPatternSet(set) => {
                assert_eq!(set.scope, Scope::Edge);
                assert_eq!(set.patterns, vec!["^/health$"]);
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[test]
    fn test_user_agent_allowlist_matches_header() {
        let output = build(AllowlistTarget::UserAgent, &["^curl.*", "^curl.*"])
            .unwrap()
            .unwrap();

        let rule = &output.rules[0];
        assert_eq!(rule.priority, 15);
        assert!(matches!(
            &rule.statement,
            Statement::RegexPatternSetReference { field: MatchField::SingleHeader { name }, .. }
                if name == "user-agent"
        ));
        match &output.resources[0] {
            BackingResource::RegexPatternSet(set) => assert_eq!(set.patterns.len(), 1),
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[test]
    fn test_absent_allowlist_builds_nothing() {
        let ctx = BuildContext::new("acme", Scope::Regional, EnforcementMode::Observe);
        let builder = RegexAllowlistBuilder::new(AllowlistTarget::Path, None);
        assert!(builder.build(&ctx, &mut PriorityAllocator::new()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = build(AllowlistTarget::Path, &["^/health$", "(unclosed"]).unwrap_err();
        match err {
            CompileError::InvalidPattern { field, pattern, .. } => {
                assert_eq!(field, "allowedPaths");
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_pattern_limits() {
        let long = "a".repeat(MAX_PATTERN_LENGTH + 1);
        assert!(build(AllowlistTarget::UserAgent, &[long.as_str()]).is_err());
        assert!(build(AllowlistTarget::UserAgent, &[""]).is_err());

        let many: Vec<String> = (0..=MAX_PATTERNS_PER_SET).map(|i| format!("^/p{}$", i)).collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        let err = build(AllowlistTarget::Path, &many).unwrap_err();
        assert!(err.to_string().contains("at most 10"));
    }

    #[test]
    fn test_pattern_limit_counts_distinct_patterns() {
        let repeated = vec!["^/health$"; MAX_PATTERNS_PER_SET + 1];
        let output = build(AllowlistTarget::Path, &repeated).unwrap().unwrap();

        match &output.resources[0] {
            BackingResource::RegexPatternSet(set) => assert_eq!(set.patterns, vec!["^/health$"]),
            other => panic!("unexpected resource {:?}", other),
        }
    }
}
