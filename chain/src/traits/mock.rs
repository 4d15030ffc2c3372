//! In-memory `Contract`/`ChainReader`/`Signer` for tests: no network, no
//! real block production — the test drives the chain head and contract
//! state directly.

use super::{ChainHead, ChainLottery, ClaimArgs, Header, Receipt, TxHandle, TxWaiter};
use crate::error::{ChainError, Result};
use async_trait::async_trait;
use k256::ecdsa::{signature::hazmat::PrehashSigner, RecoveryId, Signature, SigningKey, VerifyingKey};
use lottery_book_core::cheque::{address_from_verifying_key, Address};
use lottery_book_core::{keccak256, Hash32};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct MockChainState {
    lotteries: HashMap<Hash32, ChainLottery>,
    claimed: std::collections::HashSet<Hash32>,
    next_nonce: u64,
    current_block: u64,
    headers: HashMap<u64, Header>,
}

/// A single shared chain-and-contract double. Tests advance it with
/// [`MockChain::mine`]; `Arc<MockChain>` implements both `Contract` and
/// `ChainReader`.
pub struct MockChain {
    state: Mutex<MockChainState>,
    subscribers: Mutex<Vec<mpsc::Sender<ChainHead>>>,
}

impl MockChain {
    pub fn new() -> Self {
        let mut state = MockChainState::default();
        state.headers.insert(0, Header { number: 0, hash: keccak256(b"genesis") });
        MockChain { state: Mutex::new(state), subscribers: Mutex::new(Vec::new()) }
    }

    /// Advance the chain by one block, notifying every subscriber.
    pub async fn mine(&self) -> Header {
        let header = {
            let mut state = self.state.lock().unwrap();
            state.current_block += 1;
            let number = state.current_block;
            let hash = keccak256(&[&number.to_be_bytes()[..], b"block"].concat());
            let header = Header { number, hash };
            state.headers.insert(number, header);
            header
        };
        let subs = self.subscribers.lock().unwrap().clone();
        for sub in subs {
            let _ = sub.send(ChainHead { block_number: header.number, block_hash: header.hash }).await;
        }
        header
    }

    pub fn fund(&self, id: Hash32, amount: u64, reveal_number: u64, salt: u64, owner: Address) {
        self.state.lock().unwrap().lotteries.insert(
            id,
            ChainLottery { amount, reveal_number, salt, owner },
        );
    }

    pub fn current_block(&self) -> u64 {
        self.state.lock().unwrap().current_block
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::Contract for MockChain {
    async fn new_lottery(&self, id: Hash32, reveal_number: u64, salt: u64, value: u64) -> Result<TxHandle> {
        let mut state = self.state.lock().unwrap();
        let nonce = state.next_nonce;
        state.next_nonce += 1;
        state.lotteries.insert(id, ChainLottery { amount: value, reveal_number, salt, owner: [0u8; 20] });
        Ok(TxHandle { hash: id, nonce, gas_price: 1 })
    }

    async fn reset_lottery(
        &self,
        old_id: Hash32,
        new_id: Hash32,
        reveal_number: u64,
        salt: u64,
        value: u64,
    ) -> Result<TxHandle> {
        let mut state = self.state.lock().unwrap();
        state.lotteries.remove(&old_id);
        let nonce = state.next_nonce;
        state.next_nonce += 1;
        state.lotteries.insert(new_id, ChainLottery { amount: value, reveal_number, salt, owner: [0u8; 20] });
        Ok(TxHandle { hash: new_id, nonce, gas_price: 1 })
    }

    async fn destroy_lottery(&self, id: Hash32) -> Result<TxHandle> {
        let mut state = self.state.lock().unwrap();
        state.lotteries.remove(&id);
        let nonce = state.next_nonce;
        state.next_nonce += 1;
        Ok(TxHandle { hash: id, nonce, gas_price: 1 })
    }

    async fn claim(&self, args: ClaimArgs) -> Result<TxHandle> {
        let mut state = self.state.lock().unwrap();
        if !state.lotteries.contains_key(&args.id) || state.claimed.contains(&args.id) {
            return Err(ChainError::Reverted("no such lottery or already claimed".into()));
        }
        state.lotteries.remove(&args.id);
        state.claimed.insert(args.id);
        let nonce = state.next_nonce;
        state.next_nonce += 1;
        Ok(TxHandle { hash: args.id, nonce, gas_price: 1 })
    }

    async fn lotteries(&self, id: Hash32) -> Result<ChainLottery> {
        self.state
            .lock()
            .unwrap()
            .lotteries
            .get(&id)
            .copied()
            .ok_or(ChainError::Reverted("unknown lottery".into()))
    }
}

#[async_trait]
impl TxWaiter for MockChain {
    async fn await_receipt(&self, _tx: &TxHandle, _timeout: std::time::Duration) -> Result<Receipt> {
        let block_number = self.state.lock().unwrap().current_block;
        Ok(Receipt::Success { block_number })
    }
}

#[async_trait]
impl super::ChainReader for MockChain {
    async fn current_header(&self) -> Result<Header> {
        let state = self.state.lock().unwrap();
        state.headers.get(&state.current_block).copied().ok_or(ChainError::UnknownBlock)
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        self.state.lock().unwrap().headers.get(&number).copied().ok_or(ChainError::UnknownBlock)
    }

    fn subscribe_chain_head(&self) -> mpsc::Receiver<ChainHead> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

/// A deterministic test signer wrapping a raw secp256k1 key.
pub struct MockSigner {
    key: SigningKey,
    address: Address,
}

impl MockSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let key = SigningKey::from_slice(&seed).expect("32 nonzero bytes is a valid scalar");
        let address = address_from_verifying_key(&VerifyingKey::from(&key));
        MockSigner { key, address }
    }

    fn sign_digest(&self, digest: Hash32) -> [u8; 65] {
        let (sig, recid): (Signature, RecoveryId) =
            self.key.sign_prehash(&digest).expect("prehash signing cannot fail for a valid key");
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte() + 27;
        out
    }
}

#[async_trait]
impl super::Signer for MockSigner {
    async fn raw_sign(&self, digest: Hash32) -> Result<[u8; 65]> {
        Ok(self.sign_digest(digest))
    }

    async fn json_sign(&self, contract_addr: Address, message: Vec<u8>) -> Result<[u8; 65]> {
        // `message` is `lottery_id || reveal_range_bytes`; reconstruct the
        // identical EIP-191 v0 digest `raw_sign` is handed directly, so both
        // signer flavors produce the same 65-byte signature over the same
        // logical payload.
        let mut preimage = Vec::with_capacity(2 + 20 + message.len());
        preimage.push(0x19);
        preimage.push(0x00);
        preimage.extend_from_slice(&contract_addr);
        preimage.extend_from_slice(&message);
        Ok(self.sign_digest(keccak256(&preimage)))
    }

    fn address(&self) -> Address {
        self.address
    }
}
