//! Defines [`RegistryConfig`].

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::locking::DEFAULT_SETTLE_DELAY;

/// Names of the tables the registry works with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    /// Holds one row per claimed identity.
    pub tokens: String,
    /// Holds the choosing and lock rows guarding the identity rows.
    pub locks: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            tokens: "tokens".to_string(),
            locks: "locks".to_string(),
        }
    }
}

/// Configuration of an [`IdentityRegistry`][crate::IdentityRegistry].
///
/// Every field has a default, so any subset may be deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub tables: Tables,
    /// How long a contender waits after writing the lock row before it
    /// verifies that it is the sole entry.
    ///
    /// Must exceed the store's replication lag.
    #[serde(with = "millis")]
    pub settle_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tables: Tables::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RegistryConfig;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();

        assert_eq!(config.tables.tokens, "tokens");
        assert_eq!(config.tables.locks, "locks");
        assert_eq!(config.settle_delay, Duration::from_millis(100));
    }
}
