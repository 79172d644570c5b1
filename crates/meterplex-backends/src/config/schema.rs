use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Deserialize;

use meterplex_core::error::{MeterError, Result};
use meterplex_core::scalable::unit_from_nanos;

use crate::backend::Scopes;

/// Label names the exposition backend already uses.
const RESERVED_LABELS: [&str; 13] = [
    "code",
    "method",
    "protocol",
    "entrypoint",
    "router",
    "service",
    "url",
    "tls_version",
    "tls_cipher",
    "le",
    "cn",
    "serial",
    "sans",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    pub version: u32,

    /// Composition order follows list order. Empty means metrics off.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MeterError::UnsupportedVersion);
        }
        let mut exposition_prefixes = BTreeSet::new();
        for b in &self.backends {
            b.validate()?;
            // rendered output is concatenated, so families must not repeat
            if b.kind == BackendKind::Exposition && !exposition_prefixes.insert(b.prefix.as_str()) {
                return Err(MeterError::BadConfig(format!(
                    "backends.prefix {:?} is used by more than one exposition backend",
                    b.prefix
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Exposition,
    Push,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Metric name prefix. Required: there is no process-wide default.
    pub prefix: String,

    /// e.g. "1s", "100ms". Defaults to 1s (exposition) or 1ms (push).
    #[serde(default)]
    pub duration_unit: Option<String>,

    #[serde(default = "default_true")]
    pub entrypoints: bool,
    #[serde(default = "default_true")]
    pub routers: bool,
    #[serde(default = "default_true")]
    pub services: bool,

    /// Exposition only.
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,

    /// Exposition only: label name -> request header name.
    #[serde(default)]
    pub header_labels: BTreeMap<String, String>,

    /// Push only: timings kept per key between flushes.
    #[serde(default)]
    pub max_pending_timings: Option<usize>,
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty()
            || !self
                .prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(MeterError::BadConfig(format!(
                "backends.prefix must match [A-Za-z0-9_]+ (got {:?})",
                self.prefix
            )));
        }

        self.unit()?;

        match self.kind {
            BackendKind::Exposition => {
                if let Some(buckets) = &self.buckets {
                    validate_buckets(buckets)?;
                }
                for label in self.header_labels.keys() {
                    validate_label_name(label)?;
                }
                if self.max_pending_timings.is_some() {
                    return Err(MeterError::BadConfig(
                        "backends.max_pending_timings is not supported by the exposition backend"
                            .into(),
                    ));
                }
            }
            BackendKind::Push => {
                if self.buckets.is_some() {
                    return Err(MeterError::BadConfig(
                        "backends.buckets is not supported by the push backend".into(),
                    ));
                }
                if !self.header_labels.is_empty() {
                    return Err(MeterError::BadConfig(
                        "backends.header_labels is not supported by the push backend".into(),
                    ));
                }
                if self.max_pending_timings == Some(0) {
                    return Err(MeterError::BadConfig(
                        "backends.max_pending_timings must be at least 1".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Histogram unit, resolved against the per-kind default.
    pub fn unit(&self) -> Result<Duration> {
        match &self.duration_unit {
            Some(s) => parse_unit(s),
            None => Ok(match self.kind {
                BackendKind::Exposition => Duration::from_secs(1),
                BackendKind::Push => Duration::from_millis(1),
            }),
        }
    }

    pub fn scopes(&self) -> Scopes {
        Scopes {
            entrypoints: self.entrypoints,
            routers: self.routers,
            services: self.services,
        }
    }
}

/// Parse `<integer><suffix>` with an optional leading `-`, suffix one of
/// `ns`, `us`, `ms`, `s`, `m`, `h`. Non-positive results fail with `InvalidUnit`.
pub fn parse_unit(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .ok_or_else(|| MeterError::BadConfig(format!("duration_unit {s:?} has no suffix")))?;
    let (num, suffix) = s.split_at(split);

    let n: i64 = num
        .parse()
        .map_err(|_| MeterError::BadConfig(format!("duration_unit {s:?} has no valid number")))?;
    let scale: i64 = match suffix {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        other => {
            return Err(MeterError::BadConfig(format!(
                "duration_unit suffix {other:?} is not one of ns, us, ms, s, m, h"
            )))
        }
    };
    let nanos = n
        .checked_mul(scale)
        .ok_or_else(|| MeterError::BadConfig(format!("duration_unit {s:?} overflows")))?;

    unit_from_nanos(nanos)
}

fn validate_buckets(buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(MeterError::BadConfig("backends.buckets must not be empty".into()));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(MeterError::BadConfig("backends.buckets must be finite".into()));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(MeterError::BadConfig(
            "backends.buckets must be strictly increasing".into(),
        ));
    }
    Ok(())
}

fn validate_label_name(label: &str) -> Result<()> {
    let mut chars = label.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MeterError::BadConfig(format!(
            "backends.header_labels: invalid label name {label:?}"
        )));
    }
    if RESERVED_LABELS.contains(&label) {
        return Err(MeterError::BadConfig(format!(
            "backends.header_labels: label {label:?} is already used"
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}
