//! Benchmark configuration file reader.
//!
//! The file is a flat list of `key = value` lines (`key: value` is accepted
//! too). `#` starts a comment and blank lines are ignored:
//!
//! ```text
//! namespace = zkbench
//! clients = 16
//! requests = 10000
//! key_size_bytes = 8
//! value_size_bytes = 64
//! type = crum
//! same_key = false
//! cleanup = true
//! server.1 = zk1:2181
//! server.2 = zk2:2181
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use zkbench_loadtest::{BenchConfig, BenchTypes, GradualOverloadConfig, Workload};

/// Longest accepted `type` string.
pub const MAX_TYPE_CHARS: usize = 5;

const SERVER_PREFIX: &str = "server.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected `key = value`, got '{text}'")]
    Syntax { line: usize, text: String },

    #[error("missing required key '{0}'")]
    Missing(&'static str),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Everything a run needs from the configuration file.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub bench: BenchConfig,
    /// Overload settings with defaults derived from `requests`.
    pub overload: GradualOverloadConfig,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }
}

impl FromStr for FileConfig {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let entries = Entries::parse(text)?;

        let mut namespace = entries.required("namespace")?.to_string();
        if !namespace.starts_with('/') {
            namespace.insert(0, '/');
        }
        let clients = entries.positive("clients")? as usize;
        let requests = entries.positive("requests")?;
        let key_size = entries.positive("key_size_bytes")? as usize;
        let value_size = entries.positive("value_size_bytes")? as usize;
        let cleanup = entries.flag("cleanup")?;
        let same_key = entries.flag("same_key")?;
        let types = parse_types(entries.required("type")?)?;

        // BTreeMap iteration keeps server names sorted
        let (servers, endpoints): (Vec<String>, Vec<String>) = entries
            .values
            .iter()
            .filter(|(k, _)| k.starts_with(SERVER_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .unzip();
        if endpoints.is_empty() {
            return Err(ConfigError::Missing("server.<name>"));
        }

        let mut bench = BenchConfig::new(namespace, clients, endpoints)
            .with_types(types)
            .with_requests(requests)
            .with_sizes(key_size, value_size)
            .with_same_key(same_key)
            .with_cleanup(cleanup)
            .with_random_access(entries.optional_flag("random_access")?.unwrap_or(false))
            .with_parallelism(entries.optional_positive("parallelism")?.unwrap_or(1) as usize)
            .with_mix(
                entries.optional_fraction("read_percent")?,
                entries.optional_fraction("write_percent")?,
            );
        bench.servers = servers;

        let mut overload = GradualOverloadConfig::from_requests(requests);
        if let Some(v) = entries.optional_positive("initial_requests")? {
            overload.initial_requests = v;
        }
        if let Some(v) = entries.optional_positive("max_requests")? {
            overload.max_requests = v;
        }
        if let Some(v) = entries.optional_positive("step_size")? {
            overload.step_size = v;
        }
        if let Some(v) = entries.optional_positive("step_duration")? {
            overload.step_duration = v;
        }
        if let Some(v) = entries.optional_positive("warmup_steps")? {
            overload.warmup_steps = v;
        }
        if let Some(v) = entries.optional_positive_float("latency_threshold")? {
            overload.latency_threshold = v;
        }
        if let Some(v) = entries.optional_positive_float("throughput_drop")? {
            overload.throughput_drop = v;
        }
        if let Some(v) = entries.optional_positive("stabilization_time")? {
            overload.stabilization_time = v;
        }

        Ok(Self { bench, overload })
    }
}

/// Parse a `type` string such as `crum` into the selected workloads.
pub fn parse_types(value: &str) -> Result<BenchTypes, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "type".into(),
        value: value.into(),
        reason,
    };
    if value.chars().count() > MAX_TYPE_CHARS {
        return Err(invalid(format!("at most {MAX_TYPE_CHARS} characters")));
    }
    value
        .chars()
        .map(|c| match c {
            'c' => Ok(Workload::Create),
            'r' => Ok(Workload::Read),
            'u' => Ok(Workload::Write),
            'd' => Ok(Workload::Delete),
            'm' => Ok(Workload::Mixed),
            other => Err(invalid(format!("unknown workload '{other}'"))),
        })
        .collect()
}

struct Entries {
    values: BTreeMap<String, String>,
}

impl Entries {
    fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            // `=` wins so that endpoints may contain `:`
            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))
                .ok_or_else(|| ConfigError::Syntax {
                    line: idx + 1,
                    text: raw.to_string(),
                })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Syntax {
                    line: idx + 1,
                    text: raw.to_string(),
                });
            }
            values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn required(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn positive(&self, key: &'static str) -> Result<u64, ConfigError> {
        parse_positive(key, self.required(key)?)
    }

    fn optional_positive(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.get(key).map(|v| parse_positive(key, v)).transpose()
    }

    fn optional_positive_float(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.get(key)
            .map(|v| match v.parse::<f64>() {
                Ok(f) if f.is_finite() && f > 0.0 => Ok(f),
                _ => Err(invalid(key, v, "expected a positive number")),
            })
            .transpose()
    }

    fn optional_fraction(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.get(key)
            .map(|v| match v.parse::<f64>() {
                Ok(f) if (0.0..=1.0).contains(&f) => Ok(f),
                _ => Err(invalid(key, v, "expected a fraction between 0 and 1")),
            })
            .transpose()
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        parse_bool(key, self.required(key)?)
    }

    fn optional_flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key).map(|v| parse_bool(key, v)).transpose()
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.into(),
        value: value.into(),
        reason: reason.into(),
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(key, value, "must be a positive integer")),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}
