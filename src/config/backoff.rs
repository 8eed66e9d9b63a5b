use duration_str::deserialize_duration;
use std::time::Duration;

use serde::Deserialize;

/// Exponential requeue delay for passes that failed on a transient error.
#[derive(Debug, Clone, Copy, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct BackoffConfig {
    #[serde(deserialize_with = "deserialize_duration", default = "default_initial")]
    pub initial: Duration,

    #[serde(deserialize_with = "deserialize_duration", default = "default_max")]
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: default_initial(),
            max: default_max(),
        }
    }
}

impl BackoffConfig {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

const fn default_initial() -> Duration {
    Duration::from_millis(500)
}
const fn default_max() -> Duration {
    Duration::from_secs(300)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, Debug, PartialEq)]
    struct A {
        #[serde(default)]
        backoff: BackoffConfig,
    }

    #[test]
    fn test_backoff_config_deserialize_defaults() {
        let yaml_data = r#"
          backoff:
            initial: 2s
        "#;

        let a: A = serde_yaml::from_str(yaml_data).unwrap();

        assert_eq!(
            a.backoff,
            BackoffConfig {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(300),
            }
        );
    }

    #[test]
    fn test_backoff_config_deserialize_omitted() {
        let a: A = serde_yaml::from_str("{}").unwrap();

        assert_eq!(a.backoff, BackoffConfig::default());
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let backoff = BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };

        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(10));
        assert_eq!(backoff.delay(200), Duration::from_secs(10));
    }
}
