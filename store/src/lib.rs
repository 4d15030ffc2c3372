//! The Cheque Store (spec §4.C): a durable, cached mapping from
//! `(drawer, lottery_id, drawee)` to cheques and lotteries.

pub mod cheque_store;
pub mod error;
pub mod kv;

pub use cheque_store::{ChequeStore, Role};
pub use error::{Result, StoreError};
pub use kv::mem::MemKv;
pub use kv::sled_store::SledKv;
pub use kv::Kv;
