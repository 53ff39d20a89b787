// Caller-supplied pre/post rules.
//
// These arrive fully built. The builder only checks that each priority sits
// in the open range for its position, orders them by priority and fills in a
// metric name where the caller left it blank.

use log::debug;

use super::{BandOutput, BuildContext, RuleBuilder};
use crate::compile_error::CompileError;
use crate::firewall_rule::Rule;
use crate::priority_band::{PriorityAllocator, PriorityBand};

/// Position of caller rules relative to the generated ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomPosition {
    Pre,
    Post,
}

impl CustomPosition {
    pub fn field_name(&self) -> &'static str {
        match self {
            CustomPosition::Pre => "preRules",
            CustomPosition::Post => "postRules",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CustomRuleBuilder<'a> {
    position: CustomPosition,
    rules: &'a [Rule],
}

impl<'a> CustomRuleBuilder<'a> {
    pub fn new(position: CustomPosition, rules: &'a [Rule]) -> Self {
        Self { position, rules }
    }
}

impl<'a> RuleBuilder for CustomRuleBuilder<'a> {
    fn band(&self) -> PriorityBand {
        match self.position {
            CustomPosition::Pre => PriorityBand::PreCustom,
            CustomPosition::Post => PriorityBand::PostCustom,
        }
    }

    fn build(
        &self,
        ctx: &BuildContext<'_>,
        allocator: &mut PriorityAllocator,
    ) -> Result<Option<BandOutput>, CompileError> {
        if self.rules.is_empty() {
            return Ok(None);
        }

        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in self.rules {
            if rule.name.trim().is_empty() {
                return Err(CompileError::EmptyRequiredField {
                    field: format!("{}.name", self.position.field_name()),
                    reason: format!("rule at priority {} has no name", rule.priority),
                });
            }
            allocator.check_custom(self.band(), &rule.name, rule.priority)?;

            let mut rule = rule.clone();
            if rule.visibility.metric_name.is_empty() {
                rule.visibility.metric_name = ctx.visibility(&rule.name).metric_name;
            }
            rules.push(rule);
        }

        // Stable, so equal priorities keep caller order for the duplicate check
        rules.sort_by_key(|rule| rule.priority);

        debug!("{}: {} caller rule(s)", self.band(), rules.len());

        Ok(Some(BandOutput {
            band: self.band(),
            rules,
            resources: Vec::new(),
        }))
    }
}
