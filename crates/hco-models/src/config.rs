//! Configuration structs shared by every component.
//!
//! These are plain `serde::Deserialize` structs with `Default` impls that
//! match the documented defaults exactly. `hco-orchestrator` is the only
//! crate that actually loads these from files/environment (via the `config`
//! crate, `__`-separated overrides), but the structs themselves live here so
//! every component can depend on them without depending on the loader.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfidenceLevels {
    pub high: u8,
    pub medium: u8,
    pub low: u8,
}

impl Default for ConfidenceLevels {
    fn default() -> Self {
        Self {
            high: 90,
            medium: 80,
            low: 70,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoRouterConfig {
    pub max_bytes: i64,
    pub max_items: i64,
    pub confidence: ConfidenceLevels,
}

impl Default for AutoRouterConfig {
    fn default() -> Self {
        Self {
            max_bytes: 107_374_182_400, // 100 GiB
            max_items: 500_000,
            confidence: ConfidenceLevels::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShardConfig {
    pub max_window_days: i64,
    pub max_bytes: i64,
    pub max_items: i64,
    pub max_per_custodian: u32,
    pub adaptive: bool,
    pub align_calendar: bool,
    pub min_window_days: i64,
    pub max_total_shards: u32,
    pub max_retries: i32,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            max_window_days: 30,
            max_bytes: 50 * (1i64 << 30), // 50 GiB
            max_items: 250_000,
            max_per_custodian: 12,
            adaptive: true,
            align_calendar: true,
            min_window_days: 1,
            max_total_shards: 10_000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub lease_duration_s: u64,
    pub reap_interval_s: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_duration_s: 1800,
            reap_interval_s: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn lease_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_duration_s)
    }

    pub fn reap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reap_interval_s)
    }

    /// Heartbeats extend the lease every `lease_duration / 3`.
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        self.lease_duration() / 3
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeltaConfig {
    pub max_age_days: i64,
    pub max_failures: u32,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            max_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcileConfig {
    /// Percent, not a fraction: `0.1` means `0.1%`, matching the upstream
    /// report's `:F2%` formatting.
    pub size_tolerance_pct: f64,
    pub extra_tolerance_pct: f64,
    pub require_hash_match: bool,
    pub normalize_paths: bool,
    pub include_folders: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            size_tolerance_pct: 0.1,
            extra_tolerance_pct: 0.05,
            require_hash_match: false,
            normalize_paths: true,
            include_folders: false,
        }
    }
}

/// The full, aggregate configuration tree.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct OrchestratorConfig {
    pub auto_router: AutoRouterConfig,
    pub shard: ShardConfig,
    pub scheduler: SchedulerConfig,
    pub delta: DeltaConfig,
    pub reconcile: ReconcileConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.auto_router.max_bytes, 107_374_182_400);
        assert_eq!(cfg.auto_router.max_items, 500_000);
        assert_eq!(cfg.auto_router.confidence.high, 90);
        assert_eq!(cfg.shard.max_window_days, 30);
        assert_eq!(cfg.shard.max_bytes, 50 * (1i64 << 30));
        assert_eq!(cfg.shard.max_items, 250_000);
        assert_eq!(cfg.shard.max_per_custodian, 12);
        assert!(cfg.shard.adaptive);
        assert!(cfg.shard.align_calendar);
        assert_eq!(cfg.shard.min_window_days, 1);
        assert_eq!(cfg.scheduler.lease_duration_s, 1800);
        assert_eq!(cfg.scheduler.reap_interval_s, 60);
        assert_eq!(cfg.shard.max_retries, 3);
        assert_eq!(cfg.delta.max_age_days, 30);
        assert_eq!(cfg.delta.max_failures, 3);
        assert_eq!(cfg.reconcile.size_tolerance_pct, 0.1);
        assert_eq!(cfg.reconcile.extra_tolerance_pct, 0.05);
        assert!(!cfg.reconcile.require_hash_match);
        assert!(cfg.reconcile.normalize_paths);
        assert!(!cfg.reconcile.include_folders);
    }
}
