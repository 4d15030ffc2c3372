//! Collaborator traits for the on-chain settlement contract, the chain
//! reader, and the signer (spec §6). Each is implemented once against a
//! real `alloy` provider (`onchain.rs`) and once in-memory for tests
//! (`mock.rs`); the payer/payee managers depend only on these traits.

use lottery_book_core::cheque::Address;
use lottery_book_core::{Hash32, Witness};
use tokio::sync::mpsc;

use crate::error::Result;

/// The on-chain `lotteries(id)` projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainLottery {
    pub amount: u64,
    pub reveal_number: u64,
    pub salt: u64,
    pub owner: Address,
}

/// A claim submission's wire arguments, already derived from a winning cheque.
pub struct ClaimArgs {
    pub id: Hash32,
    pub reveal_range: [u8; 4],
    pub sig: [u8; 65],
    pub receiver_salt: u64,
    pub proof: Witness,
}

/// The settlement contract (spec §6 "Contract (collaborator)").
#[async_trait::async_trait]
pub trait Contract: Send + Sync {
    async fn new_lottery(&self, id: Hash32, reveal_number: u64, salt: u64, value: u64) -> Result<TxHandle>;
    async fn reset_lottery(
        &self,
        old_id: Hash32,
        new_id: Hash32,
        reveal_number: u64,
        salt: u64,
        value: u64,
    ) -> Result<TxHandle>;
    async fn destroy_lottery(&self, id: Hash32) -> Result<TxHandle>;
    async fn claim(&self, args: ClaimArgs) -> Result<TxHandle>;
    async fn lotteries(&self, id: Hash32) -> Result<ChainLottery>;
}

/// A submitted transaction awaiting confirmation.
pub struct TxHandle {
    pub hash: Hash32,
    pub nonce: u64,
    pub gas_price: u128,
}

/// Outcome of awaiting a transaction's receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receipt {
    Success { block_number: u64 },
    Failed,
}

#[async_trait::async_trait]
pub trait TxWaiter: Send + Sync {
    async fn await_receipt(&self, tx: &TxHandle, timeout: std::time::Duration) -> Result<Receipt>;
}

/// A block header, as far as the engine cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub number: u64,
    pub hash: Hash32,
}

/// A new chain head notification (spec §6 "Chain reader (collaborator)").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainHead {
    pub block_number: u64,
    pub block_hash: Hash32,
}

#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
    async fn current_header(&self) -> Result<Header>;
    async fn header_by_number(&self, number: u64) -> Result<Header>;
    /// A channel that yields every new chain head. Implementations own the
    /// subscription task; the returned receiver simply drains it.
    fn subscribe_chain_head(&self) -> mpsc::Receiver<ChainHead>;
}

/// The signer collaborator (spec §6): two production flavors over the same
/// 32-byte digest, producing a 65-byte `r||s||v` signature with `v` in
/// `{27, 28}`.
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    async fn raw_sign(&self, digest: Hash32) -> Result<[u8; 65]>;
    async fn json_sign(&self, contract_addr: Address, message: Vec<u8>) -> Result<[u8; 65]>;
    fn address(&self) -> Address;
}

/// Most callers need both the write calls and the ability to await a
/// receipt; this just saves spelling out `Contract + TxWaiter` everywhere.
pub trait ContractClient: Contract + TxWaiter {}
impl<T: Contract + TxWaiter> ContractClient for T {}

pub mod mock;
pub mod onchain;
