//! Engine configuration.
//!
//! [`EngineConfig`] is the user-facing option set. It is resolved once, when
//! a pipeline is built, into an immutable [`ExecutionOptions`] shared by
//! every operator; nothing branches on configuration per call after that.

use columnar_model::{DecimalOverflowPolicy, EngineError, NumericOptions, Result};
use gpu_kernels::OpKind;
use gpu_memory_manager::PoolConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Operator kinds allowed to run on the host when they cannot (or may not)
/// run on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostFallbackPolicy {
    All,
    None,
    Only(BTreeSet<OpKind>),
}

impl Default for HostFallbackPolicy {
    fn default() -> Self {
        HostFallbackPolicy::All
    }
}

impl HostFallbackPolicy {
    pub fn allows(&self, op: OpKind) -> bool {
        match self {
            HostFallbackPolicy::All => true,
            HostFallbackPolicy::None => false,
            HostFallbackPolicy::Only(ops) => ops.contains(&op),
        }
    }
}

fn parse_op_list(s: &str) -> Result<BTreeSet<OpKind>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(OpKind::from_str)
        .collect()
}

impl FromStr for HostFallbackPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(HostFallbackPolicy::All),
            "none" | "" => Ok(HostFallbackPolicy::None),
            _ => Ok(HostFallbackPolicy::Only(parse_op_list(s)?)),
        }
    }
}

impl fmt::Display for HostFallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostFallbackPolicy::All => f.write_str("all"),
            HostFallbackPolicy::None => f.write_str("none"),
            HostFallbackPolicy::Only(ops) => {
                let names: Vec<&str> = ops.iter().map(|op| op.name()).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// Fail on integer overflow and division by zero instead of producing null.
    pub strict_arithmetic_mode: bool,
    pub decimal_overflow_policy: DecimalOverflowPolicy,
    /// Maximum device memory handed out as blocks.
    pub device_memory_budget_bytes: usize,
    pub host_fallback_policy: HostFallbackPolicy,
    /// Operator kinds never offloaded to the device.
    pub gpu_deny_list: BTreeSet<OpKind>,
    pub spill_enabled: bool,
    /// Rows per batch when re-chunking sources.
    pub batch_size_rows: usize,
    /// Size of each device arena reserved per size class.
    pub arena_bytes: usize,
    /// Concurrent host <-> device copies.
    pub transfer_streams: usize,
    /// Memory the hash aggregate may use before switching to the sort
    /// strategy. Defaults to a quarter of the device budget.
    pub aggregate_memory_budget_bytes: Option<usize>,
    /// Per-pipeline timeout, checked at batch boundaries.
    pub timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_arithmetic_mode: false,
            decimal_overflow_policy: DecimalOverflowPolicy::Null,
            device_memory_budget_bytes: 1 << 30, // 1GB
            host_fallback_policy: HostFallbackPolicy::All,
            gpu_deny_list: BTreeSet::new(),
            spill_enabled: true,
            batch_size_rows: 64 * 1024,
            arena_bytes: 64 << 20, // 64MB
            transfer_streams: 4,
            aggregate_memory_budget_bytes: None,
            timeout_ms: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        EngineError::InvalidArgument(format!("invalid value '{}' for {}: {}", value, key, e))
    })
}

impl EngineConfig {
    /// Build from `key = value` string pairs, starting from the defaults.
    ///
    /// Keys use the kebab-case names of the fields; underscores are accepted.
    pub fn from_options<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = EngineConfig::default();
        for (key, value) in options {
            config.set(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let normalized = key.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "strict-arithmetic-mode" => self.strict_arithmetic_mode = parse(key, value)?,
            "decimal-overflow-policy" => self.decimal_overflow_policy = value.parse()?,
            "device-memory-budget-bytes" => self.device_memory_budget_bytes = parse(key, value)?,
            "host-fallback-policy" => self.host_fallback_policy = value.parse()?,
            "gpu-deny-list" => self.gpu_deny_list = parse_op_list(value)?,
            "spill-enabled" => self.spill_enabled = parse(key, value)?,
            "batch-size-rows" => self.batch_size_rows = parse(key, value)?,
            "arena-bytes" => self.arena_bytes = parse(key, value)?,
            "transfer-streams" => self.transfer_streams = parse(key, value)?,
            "aggregate-memory-budget-bytes" => {
                self.aggregate_memory_budget_bytes = Some(parse(key, value)?)
            }
            "timeout-ms" => self.timeout_ms = Some(parse(key, value)?),
            _ => {
                return Err(EngineError::InvalidArgument(format!(
                    "unknown configuration key '{}'",
                    key
                )))
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("device-memory-budget-bytes", self.device_memory_budget_bytes),
            ("batch-size-rows", self.batch_size_rows),
            ("arena-bytes", self.arena_bytes),
            ("transfer-streams", self.transfer_streams),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(EngineError::InvalidArgument(format!("{} must be positive", key)));
        }
        Ok(())
    }

    pub fn numeric_options(&self) -> NumericOptions {
        NumericOptions {
            strict_arithmetic: self.strict_arithmetic_mode,
            decimal_overflow: self.decimal_overflow_policy,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            budget_bytes: self.device_memory_budget_bytes,
            arena_bytes: self.arena_bytes,
            spill_enabled: self.spill_enabled,
            transfer_streams: self.transfer_streams,
            ..PoolConfig::default()
        }
    }

    /// Resolve into the immutable options shared by a pipeline.
    pub fn resolve(&self) -> Result<ExecutionOptions> {
        self.validate()?;
        Ok(ExecutionOptions {
            numeric: self.numeric_options(),
            batch_size: self.batch_size_rows,
            aggregate_memory_budget: self
                .aggregate_memory_budget_bytes
                .unwrap_or(self.device_memory_budget_bytes / 4),
            spill_enabled: self.spill_enabled,
            timeout: self.timeout_ms.map(Duration::from_millis),
        })
    }
}

/// Options fixed for the lifetime of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub numeric: NumericOptions,
    pub batch_size: usize,
    pub aggregate_memory_budget: usize,
    pub spill_enabled: bool,
    pub timeout: Option<Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            numeric: NumericOptions::default(),
            batch_size: 64 * 1024,
            aggregate_memory_budget: 256 << 20,
            spill_enabled: true,
            timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert!(!c.strict_arithmetic_mode);
        assert_eq!(c.decimal_overflow_policy, DecimalOverflowPolicy::Null);
        assert!(c.host_fallback_policy.allows(OpKind::Cast));
        let opts = c.resolve().unwrap();
        assert_eq!(opts.aggregate_memory_budget, (1 << 30) / 4);
        assert_eq!(opts.timeout, None);
    }

    #[test]
    fn from_string_options() {
        let c = EngineConfig::from_options([
            ("strict-arithmetic-mode", "true"),
            ("decimal_overflow_policy", "fail"),
            ("device-memory-budget-bytes", "4096"),
            ("host-fallback-policy", "cast, eq"),
            ("gpu-deny-list", "divide"),
            ("spill-enabled", "false"),
            ("timeout-ms", "250"),
        ])
        .unwrap();
        assert_eq!(c.numeric_options(), NumericOptions::strict());
        assert!(c.host_fallback_policy.allows(OpKind::Eq));
        assert!(!c.host_fallback_policy.allows(OpKind::Add));
        assert_eq!(c.host_fallback_policy.to_string(), "eq,cast");
        assert!(c.gpu_deny_list.contains(&OpKind::Divide));
        let pool = c.pool_config();
        assert_eq!(pool.budget_bytes, 4096);
        assert!(!pool.spill_enabled);
        assert_eq!(c.resolve().unwrap().timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn rejects_bad_options() {
        assert!(EngineConfig::from_options([("no-such-key", "1")]).is_err());
        assert!(EngineConfig::from_options([("spill-enabled", "maybe")]).is_err());
        assert!(EngineConfig::from_options([("batch-size-rows", "0")]).is_err());
        assert!(EngineConfig::from_options([("host-fallback-policy", "join")]).is_err());
        assert_eq!(
            EngineConfig::from_options([("host-fallback-policy", "none")])
                .unwrap()
                .host_fallback_policy,
            HostFallbackPolicy::None
        );
    }
}
