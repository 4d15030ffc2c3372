//! Payer-side components: the Lottery Lifecycle Manager (spec §4.D) and the
//! Issuance/Settlement Engine (spec §4.F).

pub mod config;
pub mod cost_watcher;
pub mod issuance;
pub mod lifecycle;

pub use config::EngineConfig;
pub use cost_watcher::CostWatcher;
pub use issuance::IssuanceEngine;
pub use lifecycle::{LotteryEvent, LotteryManager, Mailbox as LotteryMailbox};
