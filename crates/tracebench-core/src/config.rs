//! Topology configuration.
//!
//! The ingress boundary hands over a loosely-typed key/value map such as
//!
//! ```yaml
//! Type: standard
//! Latency: 10
//! FailRate: 0.5
//! StageCount: 4
//! ```
//!
//! Keys are matched case-insensitively. [`TopologyConfig::from_map`] turns the
//! map into a validated, immutable [`TopologyConfig`] or a typed
//! [`ConfigError`]; nothing is coerced silently.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

use crate::error::{ConfigError, UnsupportedTopologySnafu, ValidationSnafu};

pub const KEY_TYPE: &str = "type";
pub const KEY_LATENCY: &str = "latency";
pub const KEY_FAIL_RATE: &str = "failrate";
pub const KEY_STAGE_COUNT: &str = "stagecount";
pub const KEY_SEED: &str = "seed";

/// Upper bound on stages; each stage is one spawned worker.
pub const MAX_STAGE_COUNT: usize = 10_000;

/// Raw, case-insensitive configuration map as received from the caller.
pub type RawConfig = IndexMap<String, Value>;

/// Shape of the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyType {
    /// A single linear chain of identical stages.
    Standard,
    /// User-described graph. Not implemented; always rejected.
    Custom,
}

impl TopologyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyType::Standard => "standard",
            TopologyType::Custom => "custom",
        }
    }
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "standard" => Ok(TopologyType::Standard),
            "custom" => Ok(TopologyType::Custom),
            _ => UnsupportedTopologySnafu { topology: s.trim() }.fail(),
        }
    }
}

/// Validated pipeline parameters.
///
/// Latency and failure rate apply uniformly to every stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyConfig {
    topology_type: TopologyType,
    latency_ms: u64,
    fail_rate: f64,
    stage_count: usize,
    seed: Option<u64>,
}

impl TopologyConfig {
    /// Build a standard-topology config from typed values.
    pub fn standard(
        latency_ms: u64,
        fail_rate: f64,
        stage_count: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            topology_type: TopologyType::Standard,
            latency_ms,
            fail_rate,
            stage_count,
            seed: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Fix the failure-injection RNG seed for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Parse and validate a case-insensitive key/value map.
    ///
    /// Required keys: `type`, `latency`, `failrate`, `stagecount`. Optional:
    /// `seed`. Unknown keys are ignored. When the same key appears more than
    /// once with different casing, the last occurrence wins. Numeric fields
    /// are checked before `type`, so an unknown topology with a missing field
    /// reports the missing field.
    pub fn from_map(map: &RawConfig) -> Result<Self, ConfigError> {
        let latency_ms = parse_u64(KEY_LATENCY, required(map, KEY_LATENCY)?)?;
        let fail_rate = parse_f64(KEY_FAIL_RATE, required(map, KEY_FAIL_RATE)?)?;
        let stage_count = parse_u64(KEY_STAGE_COUNT, required(map, KEY_STAGE_COUNT)?)?;
        let stage_count = usize::try_from(stage_count).ok().context(ValidationSnafu {
            field: KEY_STAGE_COUNT,
            reason: format!("{stage_count} does not fit in usize"),
        })?;
        let seed = match lookup(map, KEY_SEED) {
            Some(value) if !value.is_null() => Some(parse_u64(KEY_SEED, value)?),
            _ => None,
        };
        let topology_type = match required(map, KEY_TYPE)? {
            Value::String(s) => s.parse::<TopologyType>()?,
            other => {
                return ValidationSnafu {
                    field: KEY_TYPE,
                    reason: format!("expected a string, got {other}"),
                }
                .fail();
            }
        };

        let config = Self {
            topology_type,
            latency_ms,
            fail_rate,
            stage_count,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant; `Custom` topologies fail here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topology_type != TopologyType::Standard {
            return UnsupportedTopologySnafu {
                topology: self.topology_type.as_str(),
            }
            .fail();
        }
        ensure!(
            self.fail_rate.is_finite() && (0.0..=100.0).contains(&self.fail_rate),
            ValidationSnafu {
                field: KEY_FAIL_RATE,
                reason: format!("{} is outside [0, 100]", self.fail_rate),
            }
        );
        ensure!(
            self.stage_count >= 1,
            ValidationSnafu {
                field: KEY_STAGE_COUNT,
                reason: "must be at least 1",
            }
        );
        ensure!(
            self.stage_count <= MAX_STAGE_COUNT,
            ValidationSnafu {
                field: KEY_STAGE_COUNT,
                reason: format!("{} exceeds the maximum of {MAX_STAGE_COUNT}", self.stage_count),
            }
        );
        Ok(())
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    /// Failure probability in percent, within `[0, 100]`.
    pub fn fail_rate(&self) -> f64 {
        self.fail_rate
    }

    pub fn stage_count(&self) -> usize {
        self.stage_count
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

impl TryFrom<&RawConfig> for TopologyConfig {
    type Error = ConfigError;

    fn try_from(map: &RawConfig) -> Result<Self, Self::Error> {
        Self::from_map(map)
    }
}

fn lookup<'a>(map: &'a RawConfig, key: &str) -> Option<&'a Value> {
    map.iter()
        .rev()
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn required<'a>(map: &'a RawConfig, key: &'static str) -> Result<&'a Value, ConfigError> {
    lookup(map, key)
        .filter(|v| !v.is_null())
        .context(ValidationSnafu {
            field: key,
            reason: "missing required field",
        })
}

fn parse_u64(field: &'static str, value: &Value) -> Result<u64, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.context(ValidationSnafu {
        field,
        reason: format!("expected a non-negative integer, got {value}"),
    })
}

fn parse_f64(field: &'static str, value: &Value) -> Result<f64, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.context(ValidationSnafu {
        field,
        reason: format!("expected a number, got {value}"),
    })
}
