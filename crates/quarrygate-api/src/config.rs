//! Boot-time configuration. Loaded from TOML by the CLI and threaded
//! through the request pipeline as `AppState`.

use crate::governor::ComplexityCeilings;
use crate::rate_limit::{RateLimitAlgorithm, RateLimitPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    pub watch_paths: Vec<String>,
    pub debounce_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self { enabled: false, watch_paths: vec![], debounce_ms: 500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RoleRateLimit {
    requests: u32,
    window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub strict_methods: bool,
    pub max_relationship_depth: usize,
    pub default_limit: i64,
    pub max_limit: i64,
    pub max_complexity_by_role: HashMap<String, f64>,
    pub default_complexity_ceiling: f64,
    pub rate_limit_algorithm: RateLimitAlgorithmConfig,
    pub rate_limits_by_role: HashMap<String, RoleRateLimit>,
    pub default_rate_limit: RoleRateLimit,
    pub procedure_timeout_ms: u64,
    pub allow_dangerous_operators: bool,
    pub hot_reload: HotReloadConfig,
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitAlgorithmConfig {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl From<RateLimitAlgorithmConfig> for RateLimitAlgorithm {
    fn from(value: RateLimitAlgorithmConfig) -> Self {
        match value {
            RateLimitAlgorithmConfig::FixedWindow => RateLimitAlgorithm::FixedWindow,
            RateLimitAlgorithmConfig::SlidingWindow => RateLimitAlgorithm::SlidingWindow,
            RateLimitAlgorithmConfig::TokenBucket => RateLimitAlgorithm::TokenBucket,
        }
    }
}

impl Default for RoleRateLimit {
    fn default() -> Self {
        Self { requests: 100, window_secs: 60 }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            strict_methods: true,
            max_relationship_depth: 3,
            default_limit: 20,
            max_limit: 200,
            max_complexity_by_role: HashMap::new(),
            default_complexity_ceiling: 100.0,
            rate_limit_algorithm: RateLimitAlgorithmConfig::SlidingWindow,
            rate_limits_by_role: HashMap::new(),
            default_rate_limit: RoleRateLimit::default(),
            procedure_timeout_ms: 10_000,
            allow_dangerous_operators: false,
            hot_reload: HotReloadConfig::default(),
            jwt_secret: String::new(),
        }
    }
}

impl GatewayConfig {
    pub fn complexity_ceilings(&self) -> ComplexityCeilings {
        self.max_complexity_by_role
            .iter()
            .fold(ComplexityCeilings::new(self.default_complexity_ceiling), |acc, (role, ceiling)| {
                acc.with_role(role.clone(), *ceiling)
            })
    }

    pub fn rate_limit_policy_for(&self, role: &str) -> RateLimitPolicy {
        let entry = self.rate_limits_by_role.get(role).unwrap_or(&self.default_rate_limit);
        RateLimitPolicy { max_requests: entry.requests, window: Duration::from_secs(entry.window_secs) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = GatewayConfig::default();
        assert!(config.strict_methods);
        assert_eq!(config.max_relationship_depth, 3);
        assert_eq!(config.default_limit, 20);
        assert_eq!(config.max_limit, 200);
        assert!(!config.allow_dangerous_operators);
    }

    #[test]
    fn per_role_rate_limit_falls_back_to_default() {
        let mut config = GatewayConfig::default();
        config.rate_limits_by_role.insert("admin".into(), RoleRateLimit { requests: 1000, window_secs: 60 });
        assert_eq!(config.rate_limit_policy_for("admin").max_requests, 1000);
        assert_eq!(config.rate_limit_policy_for("viewer").max_requests, 100);
    }
}
