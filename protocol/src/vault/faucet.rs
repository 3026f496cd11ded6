//! Faucet drop policy.
//!
//! The vault asks the policy whether a drop is allowed before touching any
//! balance, and tells it about the drop only after the drop committed. A
//! failed drop therefore never starts a cooldown.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use parking_lot::Mutex;

use super::error::VaultError;
use crate::config::FaucetConfig;
use crate::crypto::keys::Address;

/// Decides whether a faucet drop may proceed.
pub trait FaucetPolicy: Send + Sync {
    /// Rejects the drop with [`VaultError::FaucetLimit`] if it breaks policy.
    fn check(&self, to: &Address, amount: &BigUint) -> Result<(), VaultError>;

    /// Called once the drop has been applied.
    fn record(&self, to: &Address);
}

/// Per-drop bounds plus a per-address cooldown.
#[derive(Debug)]
pub struct CooldownFaucetPolicy {
    min: BigUint,
    max: BigUint,
    cooldown: Duration,
    last_drop: Mutex<HashMap<Address, Instant>>,
}

impl CooldownFaucetPolicy {
    pub fn new(min: impl Into<BigUint>, max: impl Into<BigUint>, cooldown: Duration) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
            cooldown,
            last_drop: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &FaucetConfig) -> Self {
        Self::new(
            config.min_drop,
            config.max_drop,
            Duration::from_secs(config.cooldown_secs),
        )
    }
}

impl Default for CooldownFaucetPolicy {
    fn default() -> Self {
        Self::from_config(&FaucetConfig::default())
    }
}

impl FaucetPolicy for CooldownFaucetPolicy {
    fn check(&self, to: &Address, amount: &BigUint) -> Result<(), VaultError> {
        if amount < &self.min {
            return Err(VaultError::FaucetLimit(format!(
                "amount {amount} is below minimum {}",
                self.min
            )));
        }
        if amount > &self.max {
            return Err(VaultError::FaucetLimit(format!(
                "amount {amount} exceeds maximum {}",
                self.max
            )));
        }

        if let Some(last) = self.last_drop.lock().get(to) {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                return Err(VaultError::FaucetLimit(format!(
                    "cooldown for {to} not expired, wait {}s",
                    remaining.as_secs().max(1)
                )));
            }
        }
        Ok(())
    }

    fn record(&self, to: &Address) {
        self.last_drop.lock().insert(*to, Instant::now());
    }
}
