//! Rate limit policies and the per-endpoint policy table.
//!
//! Policies are fixed at startup: the built-in table covers every rendered
//! route, and a YAML file may override or extend it. All validation happens
//! here so the request path never sees a malformed policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{GuardError, Result};

/// Window length shared by the built-in policies.
pub const DEFAULT_WINDOW_MILLIS: u64 = 60_000;

/// Built-in per-minute limits by endpoint class.
pub const DEFAULT_POLICIES: &[(&str, u64)] = &[
    ("product", 600),
    ("shop", 600),
    ("category", 600),
    ("search", 300),
    ("cart", 300),
    ("checkout", 200),
    ("thank-you", 60),
    ("account", 300),
    ("health", 120),
];

/// Admission limit for one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Label of the protected route, e.g. `product` or `checkout`
    pub endpoint_class: String,
    /// Maximum admissions per window
    pub limit: u64,
    /// Window length in milliseconds
    #[serde(default = "default_window_millis")]
    pub window_millis: u64,
}

fn default_window_millis() -> u64 {
    DEFAULT_WINDOW_MILLIS
}

impl RateLimitPolicy {
    /// Create a policy. Call [`validate`](Self::validate) before use.
    pub fn new(endpoint_class: impl Into<String>, limit: u64, window_millis: u64) -> Self {
        Self {
            endpoint_class: endpoint_class.into(),
            limit,
            window_millis,
        }
    }

    /// A policy with the standard one-minute window.
    pub fn per_minute(endpoint_class: impl Into<String>, limit: u64) -> Self {
        Self::new(endpoint_class, limit, DEFAULT_WINDOW_MILLIS)
    }

    /// Reject zero limits, zero windows and blank endpoint classes.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| GuardError::InvalidPolicy {
            endpoint: self.endpoint_class.clone(),
            reason: reason.to_string(),
        };

        if self.endpoint_class.trim().is_empty() {
            return Err(invalid("endpoint class must not be empty"));
        }
        if self.endpoint_class.contains(':') {
            return Err(invalid("endpoint class must not contain ':'"));
        }
        if self.limit == 0 {
            return Err(invalid("limit must be positive"));
        }
        if self.window_millis == 0 {
            return Err(invalid("window must be positive"));
        }
        if self.window_millis > i64::MAX as u64 {
            return Err(invalid("window is too large"));
        }
        Ok(())
    }
}

/// On-disk policy file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: Vec<RateLimitPolicy>,
}

/// Validated policies indexed by endpoint class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    policies: BTreeMap<String, RateLimitPolicy>,
}

impl PolicyTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table.
    pub fn builtin() -> Self {
        let policies = DEFAULT_POLICIES
            .iter()
            .map(|(endpoint, limit)| {
                (
                    endpoint.to_string(),
                    RateLimitPolicy::per_minute(*endpoint, *limit),
                )
            })
            .collect();
        Self { policies }
    }

    /// Build a table from a list, validating each policy.
    pub fn from_policies(list: Vec<RateLimitPolicy>) -> Result<Self> {
        let mut table = Self::new();
        for policy in list {
            policy.validate()?;
            if table.policies.contains_key(&policy.endpoint_class) {
                return Err(GuardError::DuplicatePolicy(policy.endpoint_class));
            }
            table.policies.insert(policy.endpoint_class.clone(), policy);
        }
        Ok(table)
    }

    /// Parse a policy file from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse policy file: {}", e)))?;
        Self::from_policies(file.policies)
    }

    /// Load a policy file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Overlay `other` on top of this table; `other` wins on conflicts.
    pub fn merged(mut self, other: PolicyTable) -> Self {
        self.policies.extend(other.policies);
        self
    }

    /// Look up the policy for an endpoint class.
    pub fn get(&self, endpoint_class: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(endpoint_class)
    }

    /// Look up a policy, treating absence as a configuration error.
    pub fn require(&self, endpoint_class: &str) -> Result<&RateLimitPolicy> {
        self.get(endpoint_class)
            .ok_or_else(|| GuardError::UnknownEndpoint(endpoint_class.to_string()))
    }

    /// Policies ordered by endpoint class.
    pub fn iter(&self) -> impl Iterator<Item = &RateLimitPolicy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Longest window in the table, used to size periodic sweeps.
    pub fn max_window_millis(&self) -> u64 {
        self.iter()
            .map(|policy| policy.window_millis)
            .max()
            .unwrap_or(DEFAULT_WINDOW_MILLIS)
    }

    /// The table as a serializable file.
    pub fn to_file(&self) -> PolicyFile {
        PolicyFile {
            policies: self.iter().cloned().collect(),
        }
    }
}
