//! Runtime configuration for the bundle service.

use std::str::FromStr;

use thiserror::Error;

pub const ENV_SEQUENCE_CODE: &str = "STOCKBUNDLE_SEQUENCE_CODE";
pub const ENV_TRANSIT_POLICY: &str = "STOCKBUNDLE_TRANSIT_POLICY";

/// How the transit (production) location is picked when the registry
/// returns more than one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitPolicy {
    /// Take the first location in the registry's default order.
    #[default]
    First,
    /// Require exactly one production location; more is a configuration error.
    Unique,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown transit policy '{0}' (expected 'first' or 'unique')")]
pub struct UnknownTransitPolicy(pub String);

impl FromStr for TransitPolicy {
    type Err = UnknownTransitPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(TransitPolicy::First),
            "unique" => Ok(TransitPolicy::Unique),
            other => Err(UnknownTransitPolicy(other.to_string())),
        }
    }
}

/// Bundle service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleConfig {
    /// Named sequence used for new references.
    pub sequence_code: String,
    /// Caller-supplied reference that still means "allocate one for me".
    pub placeholder_reference: String,
    pub transit_policy: TransitPolicy,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            sequence_code: "stock.bundle".to_string(),
            placeholder_reference: "New".to_string(),
            transit_policy: TransitPolicy::First,
        }
    }
}

impl BundleConfig {
    /// Defaults overridden by `STOCKBUNDLE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BundleConfig::from_env`] with an injectable lookup.
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(code) = lookup(ENV_SEQUENCE_CODE).filter(|c| !c.trim().is_empty()) {
            config.sequence_code = code;
        }

        if let Some(raw) = lookup(ENV_TRANSIT_POLICY) {
            match raw.parse::<TransitPolicy>() {
                Ok(policy) => config.transit_policy = policy,
                Err(e) => tracing::warn!(error = %e, "ignoring {}", ENV_TRANSIT_POLICY),
            }
        }

        config
    }

    pub fn with_sequence_code(mut self, code: impl Into<String>) -> Self {
        self.sequence_code = code.into();
        self
    }

    pub fn with_placeholder_reference(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder_reference = placeholder.into();
        self
    }

    pub fn with_transit_policy(mut self, policy: TransitPolicy) -> Self {
        self.transit_policy = policy;
        self
    }

    /// Whether a caller-supplied reference should be replaced by a sequence value.
    pub fn needs_sequence(&self, reference: Option<&str>) -> bool {
        match reference.map(str::trim) {
            None => true,
            Some(r) => r.is_empty() || r == self.placeholder_reference,
        }
    }
}
