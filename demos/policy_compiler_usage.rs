// demos/policy_compiler_usage.rs
//
// This example demonstrates compiling firewall policies from configuration.
//
// Run with: cargo run --example policy_compiler_usage

use serde_json::json;
use waf_policy::*;

fn main() {
    println!("=== Policy Compiler - Usage Examples ===\n");

    example_1_minimal_policy();
    example_2_full_policy();
    example_3_observe_vs_enforce();
    example_4_compile_errors();
    example_5_json_config();
}

fn print_rules(policy: &Policy) {
    for rule in policy.rules() {
        let verdict = match rule.verdict {
            RuleVerdict::Action(action) => format!("action {}", action),
            RuleVerdict::OverrideAction(action) => format!("override {:?}", action),
        };
        let band = rule
            .band()
            .map(|band| band.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>3}  {:<28} {:<12} {:<22} {}",
            rule.priority,
            rule.name,
            band,
            rule.statement.kind(),
            verdict
        );
    }
}

/// Example 1: Minimal configuration
fn example_1_minimal_policy() {
    println!("Example 1: Minimal Policy");
    println!("=========================");

    let config = PolicyConfig::new("acme");

    match PolicyCompiler::compile(&config) {
        Ok(policy) => {
            println!("✓ Compiled {} ({} rules)", policy.name(), policy.rules().len());
            print_rules(&policy);
        }
        Err(e) => println!("✗ Compilation failed: {}", e),
    }

    println!();
}

/// Example 2: Every feature switched on
fn example_2_full_policy() {
    println!("Example 2: Full Policy");
    println!("======================");

    let config = PolicyConfig::new("storefront")
        .with_description("Public storefront")
        .with_enforce(true)
        .with_blocked_ipv4(vec!["203.0.113.0/24".to_string(), "198.51.100.7".to_string()])
        .with_blocked_ipv6(vec!["2001:db8:dead::/48".to_string()])
        .with_allowed_paths(vec!["^/health$".to_string(), "^/status$".to_string()])
        .with_allowed_ipv4(vec!["10.0.0.0/8".to_string()])
        .with_allowed_user_agents(vec!["^Pingdom.*".to_string()])
        .with_managed_group(ManagedGroupToggle::new("sql-injection"))
        .with_managed_group(ManagedGroupToggle::new("ip-reputation"))
        .with_excluded_common_rules(vec!["SizeRestrictions_BODY".to_string()])
        .with_rate_limit(2000, Aggregation::ForwardedIp)
        .with_logging(LoggingConfig {
            sink_name: "aws-waf-logs-storefront".to_string(),
            retention_days: Some(30),
            removal_policy: RemovalPolicy::Retain,
        });

    let policy = match PolicyCompiler::compile(&config) {
        Ok(policy) => policy,
        Err(e) => {
            println!("✗ Compilation failed: {}", e);
            return;
        }
    };

    println!("✓ Compiled {} in {} mode", policy.name(), policy.mode());
    print_rules(&policy);

    println!("\nBacking resources:");
    for set in &policy.resources().ip_sets {
        println!("  ip set    {:<28} {:?}", set.name, set.addresses);
    }
    for set in &policy.resources().regex_pattern_sets {
        println!("  regex set {:<28} {:?}", set.name, set.patterns);
    }

    match policy.fingerprint() {
        Ok(fingerprint) => println!("\nFingerprint: {}", fingerprint),
        Err(e) => println!("\n✗ Fingerprint failed: {}", e),
    }

    println!();
}

/// Example 3: Flipping the enforcement switch
fn example_3_observe_vs_enforce() {
    println!("Example 3: Observe vs Enforce");
    println!("=============================");

    let base = PolicyConfig::new("acme")
        .with_managed_group(ManagedGroupToggle::new("php"))
        .with_rate_limit(1000, Aggregation::SourceIp);

    for enforce in [false, true] {
        let config = base.clone().with_enforce(enforce);
        match PolicyCompiler::compile(&config) {
            Ok(policy) => {
                println!("Mode: {}", policy.mode());
                for rule in policy.mode_sensitive_rules() {
                    println!("  {:<24} {:?}", rule.name, rule.verdict);
                }
            }
            Err(e) => println!("✗ Compilation failed: {}", e),
        }
    }

    println!();
}

/// Example 4: Configurations the compiler rejects
fn example_4_compile_errors() {
    println!("Example 4: Compile Errors");
    println!("=========================");

    let pre_rule = Rule::new(
        "geo_block",
        15,
        RuleVerdict::Action(RuleAction::Block),
        Statement::Custom {
            definition: json!({"GeoMatchStatement": {"CountryCodes": ["XX"]}}),
        },
    );

    let cases = vec![
        ("empty name", PolicyConfig::new("")),
        (
            "bad pattern",
            PolicyConfig::new("acme").with_allowed_paths(vec!["([".to_string()]),
        ),
        (
            "bad address",
            PolicyConfig::new("acme").with_blocked_ipv4(vec!["2001:db8::/32".to_string()]),
        ),
        ("low rate limit", PolicyConfig::new("acme").with_rate_limit(10, Aggregation::SourceIp)),
        ("pre-rule in allow band", PolicyConfig::new("acme").with_pre_rule(pre_rule)),
    ];

    for (label, config) in cases {
        match PolicyCompiler::compile(&config) {
            Ok(_) => println!("  {:<24} unexpectedly compiled", label),
            Err(e) => println!("  {:<24} ✗ {}", label, e),
        }
    }

    println!();
}

/// Example 5: Loading configuration from JSON
fn example_5_json_config() {
    println!("Example 5: JSON Configuration");
    println!("=============================");

    let raw = json!({
        "name": "api",
        "scope": "EDGE",
        "defaultAction": "BLOCK",
        "allowedIPv4": ["192.0.2.0/24"],
        "managedGroups": [{"name": "bot-control"}]
    });

    let config = match PolicyConfigParser::from_json(&raw.to_string()) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Parse failed: {}", e);
            return;
        }
    };

    match PolicyCompiler::compile(&config).and_then(|policy| {
        policy
            .to_json()
            .map_err(|e| CompileError::InternalInvariant(e.to_string()))
    }) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("✗ {}", e),
    }

    println!();
}
