//! Numeric error policy passed explicitly to every evaluation call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cast::OverflowPolicy;
use crate::error::{EngineError, Result};
use crate::types::LogicalType;

/// What happens when a decimal result does not fit its precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalOverflowPolicy {
    Fail,
    #[default]
    Null,
}

impl FromStr for DecimalOverflowPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(DecimalOverflowPolicy::Fail),
            "null" => Ok(DecimalOverflowPolicy::Null),
            other => Err(EngineError::InvalidArgument(format!(
                "decimal overflow policy must be 'fail' or 'null', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DecimalOverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecimalOverflowPolicy::Fail => write!(f, "fail"),
            DecimalOverflowPolicy::Null => write!(f, "null"),
        }
    }
}

/// Strict/permissive switches for data-dependent numeric errors.
///
/// `strict_arithmetic` governs integer overflow and division by zero;
/// `decimal_overflow` governs decimal precision overflow. Permissive
/// outcomes are always null, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NumericOptions {
    pub strict_arithmetic: bool,
    pub decimal_overflow: DecimalOverflowPolicy,
}

impl NumericOptions {
    pub fn strict() -> Self {
        Self {
            strict_arithmetic: true,
            decimal_overflow: DecimalOverflowPolicy::Fail,
        }
    }

    pub fn permissive() -> Self {
        Self {
            strict_arithmetic: false,
            decimal_overflow: DecimalOverflowPolicy::Null,
        }
    }

    /// Policy for a result of `data_type` that overflowed.
    pub fn overflow_policy(&self, data_type: &LogicalType) -> OverflowPolicy {
        let fail = match data_type {
            LogicalType::Decimal { .. } => self.decimal_overflow == DecimalOverflowPolicy::Fail,
            _ => self.strict_arithmetic,
        };
        if fail {
            OverflowPolicy::Fail
        } else {
            OverflowPolicy::Null
        }
    }

    /// Resolve a data-dependent error into `Ok(None)` (null) or the error.
    pub fn handle<T>(&self, data_type: &LogicalType, err: EngineError) -> Result<Option<T>> {
        match self.overflow_policy(data_type) {
            OverflowPolicy::Fail => Err(err),
            OverflowPolicy::Null | OverflowPolicy::Saturate => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_per_type() {
        let opts = NumericOptions {
            strict_arithmetic: false,
            decimal_overflow: DecimalOverflowPolicy::Fail,
        };
        assert_eq!(opts.overflow_policy(&LogicalType::Int64), OverflowPolicy::Null);
        let dec = LogicalType::decimal(10, 2).unwrap();
        assert_eq!(opts.overflow_policy(&dec), OverflowPolicy::Fail);
        assert!(opts.handle::<i64>(&dec, EngineError::DivideByZero).is_err());
        assert_eq!(
            opts.handle::<i64>(&LogicalType::Int64, EngineError::DivideByZero).unwrap(),
            None
        );
    }

    #[test]
    fn parse_policy() {
        assert_eq!("FAIL".parse::<DecimalOverflowPolicy>().unwrap(), DecimalOverflowPolicy::Fail);
        assert!("clamp".parse::<DecimalOverflowPolicy>().is_err());
        assert_eq!(DecimalOverflowPolicy::default().to_string(), "null");
    }
}
