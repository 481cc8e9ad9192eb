//! Runner configuration
//!
//! Defines all configurable parameters for the runner: the thing identity,
//! exchange and work bounds, and the claim loop policy.

use std::fmt;
use std::time::Duration;

/// How many times the claim cycle runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ClaimMode {
    /// Once per job found by the pending-jobs scan
    #[default]
    Catalog,
    /// Until the backend has nothing left to start
    UntilExhausted,
}

impl fmt::Display for ClaimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimMode::Catalog => f.write_str("catalog"),
            ClaimMode::UntilExhausted => f.write_str("until-exhausted"),
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the thing whose jobs are processed
    pub thing_name: String,

    /// Client id used for the transport session
    pub client_id: String,

    /// Step timeout sent to the backend with each claim, in minutes
    pub step_timeout_minutes: i64,

    /// Longest wait for the response to any single request
    pub exchange_timeout: Duration,

    /// How long the simulated unit of work takes
    pub work_duration: Duration,

    /// Local bound on one job's work before it is reported FAILED
    pub job_timeout: Duration,

    /// Claim loop policy
    pub claim_mode: ClaimMode,

    /// Jobs queued in the local backend at startup
    pub simulated_jobs: usize,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(thing_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            client_id: "jobline-runner".to_string(),
            step_timeout_minutes: 15,
            exchange_timeout: Duration::from_secs(30),
            work_duration: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300), // 5 minutes
            claim_mode: ClaimMode::Catalog,
            simulated_jobs: 3,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.thing_name.is_empty() {
            anyhow::bail!("thing_name cannot be empty");
        }

        if self.thing_name.contains(['/', '+', '#']) {
            anyhow::bail!("thing_name cannot contain '/', '+' or '#'");
        }

        if self.client_id.is_empty() {
            anyhow::bail!("client_id cannot be empty");
        }

        if self.step_timeout_minutes <= 0 {
            anyhow::bail!("step_timeout_minutes must be greater than 0");
        }

        if self.exchange_timeout.is_zero() {
            anyhow::bail!("exchange_timeout must be greater than 0");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self::new(format!("device-{}", &suffix[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.thing_name.starts_with("device-"));
        assert_eq!(config.step_timeout_minutes, 15);
        assert_eq!(config.exchange_timeout, Duration::from_secs(30));
        assert_eq!(config.claim_mode, ClaimMode::Catalog);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::new("dev-1");
        assert!(config.validate().is_ok());

        config.thing_name = String::new();
        assert!(config.validate().is_err());

        config.thing_name = "dev/1".to_string();
        assert!(config.validate().is_err());

        config.thing_name = "dev-1".to_string();
        config.step_timeout_minutes = 0;
        assert!(config.validate().is_err());

        config.step_timeout_minutes = 15;
        config.exchange_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.exchange_timeout = Duration::from_secs(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_claim_mode_parsing() {
        use clap::ValueEnum;

        assert_eq!(ClaimMode::from_str("catalog", false), Ok(ClaimMode::Catalog));
        assert_eq!(
            ClaimMode::from_str("until-exhausted", false),
            Ok(ClaimMode::UntilExhausted)
        );
        assert!(ClaimMode::from_str("forever", false).is_err());
        assert_eq!(ClaimMode::UntilExhausted.to_string(), "until-exhausted");
    }
}
