//! Per-deployment configuration. Protocol-level constants (`MAX_LEVEL`,
//! `LOTTERY_PROCESS_CONFIRMS`, ...) live in `lottery_book_core::constants`
//! and are not configurable here — only what genuinely varies between
//! deployments is.

use lottery_book_core::cheque::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub contract_addr: Address,
    pub drawer: Address,
    /// How often the Lottery Manager's GC sweep runs over expired entries.
    #[serde(with = "duration_secs")]
    pub gc_interval: Duration,
    /// How long to wait for a submitted deposit transaction before
    /// surfacing `TransactionNotConfirmed`.
    #[serde(with = "duration_secs")]
    pub tx_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            contract_addr: [0u8; 20],
            drawer: [0u8; 20],
            gc_interval: Duration::from_secs(5 * 60),
            tx_timeout: lottery_book_core::constants::TX_TIMEOUT,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
