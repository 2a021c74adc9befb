use crate::error::{PoolError, Result};
use crate::types::Address;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Deployment settings fixed at `init` time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Sole principal allowed to run admin operations.
    pub admin: Address,
    /// Only identity whose randomness deliveries are accepted.
    pub randomness_operator: Address,
    /// Hex-encoded SHA-256 whitelist merkle root.
    pub merkle_root: String,
    pub deposit_window_secs: i64,
    pub break_window_secs: i64,
    /// How long a randomness request may stay unanswered before the admin can re-issue it.
    pub randomness_timeout_secs: i64,
}

const WEEK_SECS: i64 = 7 * 24 * 60 * 60;

impl PoolConfig {
    pub fn new(admin: Address, randomness_operator: Address, merkle_root: [u8; 32]) -> Self {
        Self {
            admin,
            randomness_operator,
            merkle_root: hex::encode(merkle_root),
            deposit_window_secs: WEEK_SECS,
            break_window_secs: WEEK_SECS,
            randomness_timeout_secs: 24 * 60 * 60,
        }
    }

    pub fn deposit_window(&self) -> Duration {
        Duration::seconds(self.deposit_window_secs)
    }

    pub fn break_window(&self) -> Duration {
        Duration::seconds(self.break_window_secs)
    }

    pub fn randomness_timeout(&self) -> Duration {
        Duration::seconds(self.randomness_timeout_secs)
    }

    pub fn merkle_root_bytes(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(self.merkle_root.trim_start_matches("0x"))
            .map_err(|e| PoolError::InvalidHash(format!("{}: {}", self.merkle_root, e)))?;
        bytes
            .try_into()
            .map_err(|_| PoolError::InvalidHash(format!("{}: expected 32 bytes", self.merkle_root)))
    }

    pub fn validate(&self) -> Result<()> {
        self.merkle_root_bytes()?;

        if self.deposit_window_secs < 0 {
            return Err(PoolError::config("Deposit window cannot be negative"));
        }

        if self.break_window_secs < 0 {
            return Err(PoolError::config("Break window cannot be negative"));
        }

        if self.randomness_timeout_secs <= 0 {
            return Err(PoolError::config(
                "Randomness timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    #[test]
    fn test_default_windows() {
        let config = PoolConfig::new(addr("admin"), addr("oracle"), [7u8; 32]);
        assert_eq!(config.deposit_window(), Duration::days(7));
        assert_eq!(config.break_window(), Duration::days(7));
        assert!(config.validate().is_ok());
        assert_eq!(config.merkle_root_bytes().unwrap(), [7u8; 32]);
    }

    #[test]
    fn test_rejects_short_root() {
        let mut config = PoolConfig::new(addr("admin"), addr("oracle"), [0u8; 32]);
        config.merkle_root = "abcd".to_string();
        assert!(matches!(config.validate(), Err(PoolError::InvalidHash(_))));
    }
}
