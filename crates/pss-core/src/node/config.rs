//! PSS configuration
//!
//! Durations are written as whole seconds in TOML:
//!
//! ```toml
//! forward_cache_ttl = 60
//! outbox_capacity = 100000
//! sym_key_decrypt_cache_capacity = 1024
//! padding_block = 256
//! max_payload_bytes = 2097152
//! default_message_ttl = 120
//! clean_keys_interval = 600
//! # outbox_max_retry_time = 600
//! ```

use crate::error::{PssError, Result};
use crate::{DEFAULT_MAX_PAYLOAD, DEFAULT_OUTBOX_CAPACITY};
use pss_crypto::{DEFAULT_PADDING_BLOCK, MIN_PADDING_BLOCK};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// PSS configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PssConfig {
    /// Dedup window of the forward cache
    #[serde(with = "duration_secs")]
    pub forward_cache_ttl: Duration,

    /// Maximum messages in flight in the outbox
    pub outbox_capacity: usize,

    /// Slots in the symmetric decrypt cache ring
    pub sym_key_decrypt_cache_capacity: usize,

    /// Envelope padding block (power of two, at least 16)
    pub padding_block: usize,

    /// Largest accepted message payload
    pub max_payload_bytes: usize,

    /// Expiry applied when `send` is not given one
    #[serde(with = "duration_secs")]
    pub default_message_ttl: Duration,

    /// Period of the unprotected symmetric key sweep
    #[serde(with = "duration_secs")]
    pub clean_keys_interval: Duration,

    /// Give up forwarding a message this long after enqueue (`None` retries forever)
    #[serde(with = "opt_duration_secs", skip_serializing_if = "Option::is_none")]
    pub outbox_max_retry_time: Option<Duration>,
}

impl Default for PssConfig {
    fn default() -> Self {
        Self {
            forward_cache_ttl: Duration::from_secs(60),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            sym_key_decrypt_cache_capacity: 1024,
            padding_block: DEFAULT_PADDING_BLOCK,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
            default_message_ttl: Duration::from_secs(120),
            clean_keys_interval: Duration::from_secs(600),
            outbox_max_retry_time: None,
        }
    }
}

impl PssConfig {
    /// Parse from a TOML string and validate.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::Config`] on a parse failure, or
    /// [`PssError::InvalidConfig`] if validation fails.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| PssError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::Config`] if the file cannot be read or parsed, or
    /// [`PssError::InvalidConfig`] if validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| PssError::Config(e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`PssError::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PssError::Config(e.to_string()))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`PssError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.padding_block < MIN_PADDING_BLOCK || !self.padding_block.is_power_of_two() {
            return Err(PssError::invalid_config(
                "padding_block must be a power of two and at least 16",
            ));
        }
        if self.outbox_capacity == 0 {
            return Err(PssError::invalid_config("outbox_capacity must be at least 1"));
        }
        if self.sym_key_decrypt_cache_capacity == 0 {
            return Err(PssError::invalid_config(
                "sym_key_decrypt_cache_capacity must be at least 1",
            ));
        }
        if self.forward_cache_ttl.is_zero() {
            return Err(PssError::invalid_config("forward_cache_ttl must be positive"));
        }
        if self.max_payload_bytes == 0 {
            return Err(PssError::invalid_config("max_payload_bytes must be at least 1"));
        }
        if self.clean_keys_interval.is_zero() {
            return Err(PssError::invalid_config("clean_keys_interval must be positive"));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_secs))
    }
}
