// Rate-based rule builder.
//
// The rule's action (not an override) follows the enforcement mode: COUNT
// while observing, BLOCK when enforcing.

use log::debug;

use super::{BandOutput, BuildContext, RuleBuilder};
use crate::compile_error::CompileError;
use crate::firewall_rule::{Aggregation, ForwardedIpConfig, Rule, RuleVerdict, Statement};
use crate::policy_config::RateLimitConfig;
use crate::priority_band::{PriorityAllocator, PriorityBand};

/// Name of the compiled rate-based rule
pub const RATE_LIMIT_RULE_NAME: &str = "rate_limit_rule";

/// Smallest threshold the firewall service accepts
pub const MIN_RATE_LIMIT: u64 = 100;

/// Largest threshold the firewall service accepts
pub const MAX_RATE_LIMIT: u64 = 2_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitBuilder<'a> {
    config: Option<&'a RateLimitConfig>,
}

impl<'a> RateLimitBuilder<'a> {
    pub fn new(config: Option<&'a RateLimitConfig>) -> Self {
        Self { config }
    }
}

impl<'a> RuleBuilder for RateLimitBuilder<'a> {
    fn band(&self) -> PriorityBand {
        PriorityBand::RateLimit
    }

    fn build(
        &self,
        ctx: &BuildContext<'_>,
        allocator: &mut PriorityAllocator,
    ) -> Result<Option<BandOutput>, CompileError> {
        let config = match self.config {
            Some(config) => config,
            None => return Ok(None),
        };

        if !(MIN_RATE_LIMIT..=MAX_RATE_LIMIT).contains(&config.threshold) {
            return Err(CompileError::InvalidRateLimit {
                threshold: config.threshold,
                min: MIN_RATE_LIMIT,
                max: MAX_RATE_LIMIT,
            });
        }

        // Forwarded aggregation falls back to the peer address when the header is absent
        let forwarded_ip_config = match config.aggregation {
            Aggregation::ForwardedIp => Some(ForwardedIpConfig::for_rate_limit()),
            Aggregation::SourceIp => None,
        };

        let priority = allocator.allocate(self.band(), 1)?[0];
        let action = ctx.mode.rule_action();
        let rule = Rule::new(
            RATE_LIMIT_RULE_NAME,
            priority,
            RuleVerdict::Action(action),
            Statement::RateBased {
                limit: config.threshold,
                aggregate_key: config.aggregation,
                forwarded_ip_config,
            },
        )
        .with_visibility(ctx.visibility(RATE_LIMIT_RULE_NAME));

        debug!(
            "{}: threshold {} by {:?}, action {}",
            self.band(),
            config.threshold,
            config.aggregation,
            action
        );

        Ok(Some(BandOutput::new(self.band()).with_rule(rule)))
    }
}
