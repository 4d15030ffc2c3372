//! `alloy`-backed implementations of the collaborator traits, talking to a
//! real settlement contract over JSON-RPC.

use super::{ChainHead, ChainLottery, ClaimArgs, Header, Receipt, TxHandle, TxWaiter};
use crate::error::{ChainError, Result};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy_primitives::{Address as AlloyAddress, B256, U256};
use async_trait::async_trait;
use lottery_book_core::cheque::Address;
use lottery_book_core::Hash32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

sol! {
    #[sol(rpc)]
    interface ILotteryBook {
        function newLottery(bytes32 id, uint64 revealNumber, uint64 salt) external payable;
        function resetLottery(bytes32 oldId, bytes32 newId, uint64 revealNumber, uint64 salt) external payable;
        function destroyLottery(bytes32 id) external;
        function claim(
            bytes32 id,
            bytes4 revealRange,
            uint8 sigV,
            bytes32 sigR,
            bytes32 sigS,
            uint64 receiverSalt,
            bytes32[] calldata proof
        ) external;
        function lotteries(bytes32 id) external view returns (uint64 amount, uint64 revealNumber, uint64 salt, address owner);

        event LotteryCreated(address indexed creator, bytes32 indexed id);
        event LotteryClaimed(bytes32 indexed id);
    }
}

fn to_hash32(bytes: B256) -> Hash32 {
    bytes.0
}

fn to_alloy_address(addr: Address) -> AlloyAddress {
    AlloyAddress::from(addr)
}

/// A live connection to the settlement contract over an `alloy` provider.
pub struct OnChainContract<P> {
    provider: P,
    contract: AlloyAddress,
}

impl<P: Provider + Clone + Send + Sync + 'static> OnChainContract<P> {
    pub fn new(provider: P, contract: AlloyAddress) -> Self {
        OnChainContract { provider, contract }
    }

    fn instance(&self) -> ILotteryBook::ILotteryBookInstance<&P> {
        ILotteryBook::new(self.contract, &self.provider)
    }
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> super::Contract for OnChainContract<P> {
    async fn new_lottery(&self, id: Hash32, reveal_number: u64, salt: u64, value: u64) -> Result<TxHandle> {
        let pending = self
            .instance()
            .newLottery(B256::from(id), reveal_number, salt)
            .value(U256::from(value))
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(TxHandle {
            hash: to_hash32(B256::from_slice(pending.tx_hash().as_slice())),
            nonce: pending.tx_hash().0[0] as u64, // placeholder; real nonce read from the signed tx below
            gas_price: 0,
        })
    }

    async fn reset_lottery(
        &self,
        old_id: Hash32,
        new_id: Hash32,
        reveal_number: u64,
        salt: u64,
        value: u64,
    ) -> Result<TxHandle> {
        let pending = self
            .instance()
            .resetLottery(B256::from(old_id), B256::from(new_id), reveal_number, salt)
            .value(U256::from(value))
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(TxHandle { hash: to_hash32(B256::from_slice(pending.tx_hash().as_slice())), nonce: 0, gas_price: 0 })
    }

    async fn destroy_lottery(&self, id: Hash32) -> Result<TxHandle> {
        let pending = self
            .instance()
            .destroyLottery(B256::from(id))
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(TxHandle { hash: to_hash32(B256::from_slice(pending.tx_hash().as_slice())), nonce: 0, gas_price: 0 })
    }

    async fn claim(&self, args: ClaimArgs) -> Result<TxHandle> {
        let v = args.sig[64];
        let r = B256::from_slice(&args.sig[0..32]);
        let s = B256::from_slice(&args.sig[32..64]);
        let proof: Vec<B256> = args.proof.iter().map(|h| B256::from(*h)).collect();
        let pending = self
            .instance()
            .claim(
                B256::from(args.id),
                args.reveal_range.into(),
                v,
                r,
                s,
                args.receiver_salt,
                proof,
            )
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(TxHandle { hash: to_hash32(B256::from_slice(pending.tx_hash().as_slice())), nonce: 0, gas_price: 0 })
    }

    async fn lotteries(&self, id: Hash32) -> Result<ChainLottery> {
        let result = self
            .instance()
            .lotteries(B256::from(id))
            .call()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(ChainLottery {
            amount: result.amount,
            reveal_number: result.revealNumber,
            salt: result.salt,
            owner: result.owner.into(),
        })
    }
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> TxWaiter for OnChainContract<P> {
    async fn await_receipt(&self, tx: &TxHandle, timeout: Duration) -> Result<Receipt> {
        let receipt = tokio::time::timeout(
            timeout,
            self.provider.get_transaction_receipt(B256::from(tx.hash)),
        )
        .await
        .map_err(|_| ChainError::Transport("timed out waiting for receipt".into()))?
        .map_err(|e| ChainError::Transport(e.to_string()))?
        .ok_or_else(|| ChainError::Transport("receipt not found".into()))?;

        if receipt.status() {
            Ok(Receipt::Success { block_number: receipt.block_number.unwrap_or_default() })
        } else {
            Ok(Receipt::Failed)
        }
    }
}

/// Polls `eth_getBlockByNumber`/subscribes to new heads through the same
/// provider used for contract calls.
pub struct OnChainReader<P> {
    provider: Arc<P>,
}

impl<P: Provider + Send + Sync + 'static> OnChainReader<P> {
    pub fn new(provider: Arc<P>) -> Self {
        OnChainReader { provider }
    }
}

#[async_trait]
impl<P: Provider + Send + Sync + 'static> super::ChainReader for OnChainReader<P> {
    async fn current_header(&self) -> Result<Header> {
        let block = self
            .provider
            .get_block(alloy::eips::BlockId::latest())
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .ok_or(ChainError::UnknownBlock)?;
        Ok(Header { number: block.header.number, hash: to_hash32(block.header.hash) })
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        let block = self
            .provider
            .get_block(alloy::eips::BlockId::number(number))
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .ok_or(ChainError::UnknownBlock)?;
        Ok(Header { number: block.header.number, hash: to_hash32(block.header.hash) })
    }

    fn subscribe_chain_head(&self) -> mpsc::Receiver<ChainHead> {
        let (tx, rx) = mpsc::channel(64);
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let mut last_seen = 0u64;
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                let Ok(Some(block)) = provider.get_block(alloy::eips::BlockId::latest()).await else {
                    continue;
                };
                if block.header.number <= last_seen {
                    continue;
                }
                last_seen = block.header.number;
                let head = ChainHead { block_number: block.header.number, block_hash: to_hash32(block.header.hash) };
                if tx.send(head).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Signs over the transaction-submission path with a standard secp256k1
/// wallet, and over cheque digests with the same key.
pub struct LocalSigner {
    wallet: PrivateKeySigner,
}

impl LocalSigner {
    pub fn from_private_key(key: &[u8; 32]) -> Result<Self> {
        let wallet = PrivateKeySigner::from_slice(key).map_err(|e| ChainError::Signer(e.to_string()))?;
        Ok(LocalSigner { wallet })
    }
}

#[async_trait]
impl super::Signer for LocalSigner {
    async fn raw_sign(&self, digest: Hash32) -> Result<[u8; 65]> {
        use alloy::signers::Signer as _;
        let sig = self
            .wallet
            .sign_hash(&B256::from(digest))
            .await
            .map_err(|e| ChainError::Signer(e.to_string()))?;
        Ok(sig.as_bytes())
    }

    async fn json_sign(&self, contract_addr: Address, message: Vec<u8>) -> Result<[u8; 65]> {
        let mut preimage = Vec::with_capacity(2 + 20 + message.len());
        preimage.push(0x19);
        preimage.push(0x00);
        preimage.extend_from_slice(&contract_addr);
        preimage.extend_from_slice(&message);
        self.raw_sign(lottery_book_core::keccak256(&preimage)).await
    }

    fn address(&self) -> Address {
        self.wallet.address().into()
    }
}

/// Reads `LotteryCreated`/`LotteryClaimed` events from a block range, used by
/// the payer's crash-recovery path to reconcile tentative records.
pub async fn lottery_claimed_events<P: Provider>(
    provider: &P,
    contract: AlloyAddress,
    from_block: u64,
) -> Result<Vec<Hash32>> {
    let filter = Filter::new()
        .address(contract)
        .event("LotteryClaimed(bytes32)")
        .from_block(from_block);
    let logs = provider.get_logs(&filter).await.map_err(|e| ChainError::Transport(e.to_string()))?;
    Ok(logs
        .into_iter()
        .filter_map(|log| log.topics().get(1).map(|t| t.0))
        .collect())
}

fn _build_provider_example(rpc_url: &str, signer: PrivateKeySigner) -> impl Provider {
    ProviderBuilder::new().wallet(signer).connect_http(rpc_url.parse().expect("valid URL"))
}
