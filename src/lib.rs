pub mod compile_error;
pub mod priority_band;
pub mod firewall_rule;
pub mod resource_set;
pub mod policy_config;
pub mod builders;
pub mod policy;
pub mod policy_compiler;
pub mod wafv2_document;

pub use compile_error::CompileError;

pub use priority_band::{PriorityAllocator, PriorityBand};

pub use firewall_rule::{
    Aggregation, EnforcementMode, FallbackBehavior, ForwardedIpConfig, ForwardedIpPosition,
    MatchField, OverrideAction, Rule, RuleAction, RuleVerdict, Statement, VisibilityConfig,
};

pub use resource_set::{BackingResource, IpSet, IpVersion, RegexPatternSet, ResourceSets};

pub use policy_config::{
    ConfigError,            // Config load/serialize errors
    DefaultAction,          // Verdict when no rule terminates
    LoggingConfig,          // Request log sink
    ManagedGroupToggle,     // Opt-in managed rule group
    PolicyConfig,           // Compiler input
    PolicyConfigParser,     // JSON loading/serialization
    RateLimitConfig,        // Rate-based rule settings
    RemovalPolicy,          // Log sink teardown behavior
    Scope,                  // Regional or edge deployment
};

pub use builders::{
    BandOutput,             // Rules and resources of one band
    BuildContext,           // Policy-wide builder inputs
    RuleBuilder,            // One builder per band
};

pub use builders::managed_group::ManagedGroup;

pub use policy::Policy;

pub use policy_compiler::{
    PolicyCompiler,         // PolicyConfig -> Policy
    PolicyValidator,        // Whole-policy invariant checks
};

pub use wafv2_document::{
    RuleDocument,           // One entry of the service rule list
    StatementDocument,      // Statement keyed by service statement type
    WebAclDocument,         // Service-shaped policy output
};
