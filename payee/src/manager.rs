//! The Cheque Manager (spec §4.E): a priority queue of received cheques
//! keyed by `reveal_number`, drained against chain head, triggering
//! independent claim tasks for winners.

use lottery_book_chain::{ChainHead, ChainReader, ClaimArgs, ContractClient};
use lottery_book_core::cheque::Address;
use lottery_book_core::constants::{CLAIM_TIMEOUT, LOTTERY_CLAIM_PERIOD, LOTTERY_PROCESS_CONFIRMS};
use lottery_book_core::{Hash32, Result};
use lottery_book_store::{ChequeStore, Role};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

pub enum Message {
    Track { lottery_id: Hash32, drawer: Address, reveal_number: u64 },
    ListTracked(oneshot::Sender<Vec<Hash32>>),
}

#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub async fn track_cheque(&self, lottery_id: Hash32, drawer: Address, reveal_number: u64) {
        let _ = self.sender.send(Message::Track { lottery_id, drawer, reveal_number }).await;
    }

    pub async fn list_tracked(&self) -> Vec<Hash32> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Message::ListTracked(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// Owns the claim-eligible cheques for a single payee address.
pub struct ChequeManager<C: ContractClient, R: ChainReader> {
    receiver: Address,
    store: Arc<ChequeStore>,
    contract: Arc<C>,
    chain: Arc<R>,
    /// `(reveal_number, lottery_id) -> drawer`, ordered by reveal height.
    queue: BTreeMap<(u64, Hash32), Address>,
    /// `lottery_id -> reveal_number` so re-tracking can find and drop the
    /// old queue entry (spec: "the new one has strictly higher signed_range").
    index: HashMap<Hash32, u64>,
}

impl<C: ContractClient + 'static, R: ChainReader + 'static> ChequeManager<C, R> {
    /// Startup recovery (spec §4.E): reload every stored cheque for this
    /// payee and place it in the right bucket for the current chain head.
    pub async fn recover(receiver: Address, store: Arc<ChequeStore>, contract: Arc<C>, chain: Arc<R>) -> Self {
        let mut manager = ChequeManager {
            receiver,
            store: store.clone(),
            contract,
            chain,
            queue: BTreeMap::new(),
            index: HashMap::new(),
        };

        let current_head = manager.chain.current_header().await.map(|h| h.number).unwrap_or(0);
        let cheques = store.list_cheques(Role::Payee, receiver, |_| true).unwrap_or_default();
        for cheque in cheques {
            let Ok(lottery_id) = cheque.derive().map(|d| d.lottery_id) else { continue };
            let Ok(drawer) = cheque.signer(lottery_id) else { continue };

            if current_head < cheque.reveal_number + LOTTERY_PROCESS_CONFIRMS {
                manager.insert(cheque.reveal_number, drawer, lottery_id);
            } else if current_head < cheque.reveal_number + LOTTERY_CLAIM_PERIOD {
                manager.try_claim_now(drawer, lottery_id, &cheque).await;
            } else {
                let _ = store.delete_cheque(Role::Payee, drawer, lottery_id, receiver);
            }
        }
        manager
    }

    fn insert(&mut self, reveal_number: u64, drawer: Address, lottery_id: Hash32) {
        if let Some(old_reveal) = self.index.remove(&lottery_id) {
            self.queue.remove(&(old_reveal, lottery_id));
        }
        self.queue.insert((reveal_number, lottery_id), drawer);
        self.index.insert(lottery_id, reveal_number);
    }

    pub fn spawn(mut self) -> (Mailbox, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let head_rx = self.chain.subscribe_chain_head();
        let handle = tokio::spawn(async move { self.run(rx, head_rx).await });
        (Mailbox { sender: tx }, handle)
    }

    async fn run(&mut self, mut rx: mpsc::Receiver<Message>, mut head_rx: mpsc::Receiver<ChainHead>) {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(Message::Track { lottery_id, drawer, reveal_number }) => {
                            self.insert(reveal_number, drawer, lottery_id);
                        }
                        Some(Message::ListTracked(reply)) => {
                            let ids = self.queue.keys().map(|(_, id)| *id).collect();
                            let _ = reply.send(ids);
                        }
                        None => break,
                    }
                }
                Some(head) = head_rx.recv() => {
                    self.drain(head.block_number).await;
                }
                else => break,
            }
        }
    }

    /// Drain every queue entry whose reveal height has aged past the
    /// processing-confirms margin (spec §4.E).
    async fn drain(&mut self, current_head: u64) {
        let due: Vec<(u64, Hash32, Address)> = self
            .queue
            .range(..)
            .take_while(|((reveal_number, _), _)| reveal_number + LOTTERY_PROCESS_CONFIRMS <= current_head)
            .map(|((r, id), drawer)| (*r, *id, *drawer))
            .collect();

        for (reveal_number, lottery_id, drawer) in due {
            self.queue.remove(&(reveal_number, lottery_id));
            self.index.remove(&lottery_id);

            if current_head >= reveal_number + LOTTERY_CLAIM_PERIOD {
                let _ = self.store.delete_cheque(Role::Payee, drawer, lottery_id, self.receiver);
                continue;
            }

            let Ok(Some(cheque)) = self.store.get_cheque(Role::Payee, drawer, lottery_id, self.receiver) else {
                continue;
            };
            let store = self.store.clone();
            let contract = self.contract.clone();
            let chain = self.chain.clone();
            let receiver = self.receiver;
            tokio::spawn(async move {
                claim_if_winner(store, contract, chain, drawer, lottery_id, receiver, cheque, reveal_number).await;
            });
        }
    }

    async fn try_claim_now(&self, drawer: Address, lottery_id: Hash32, cheque: &lottery_book_core::Cheque) {
        claim_if_winner(
            self.store.clone(),
            self.contract.clone(),
            self.chain.clone(),
            drawer,
            lottery_id,
            self.receiver,
            cheque.clone(),
            cheque.reveal_number,
        )
        .await;
    }
}

/// Check whether `cheque` won against the revealed block hash, and if so
/// submit a claim with a bounded timeout (spec §4.E "Claim invocation").
async fn claim_if_winner<C: ContractClient, R: ChainReader>(
    store: Arc<ChequeStore>,
    contract: Arc<C>,
    chain: Arc<R>,
    drawer: Address,
    lottery_id: Hash32,
    receiver: Address,
    cheque: lottery_book_core::Cheque,
    reveal_number: u64,
) {
    let Ok(derived) = cheque.derive() else {
        let _ = store.delete_cheque(Role::Payee, drawer, lottery_id, receiver);
        return;
    };
    let Ok(header) = chain.header_by_number(reveal_number).await else {
        warn!(lottery_id = %hex::encode(lottery_id), "reveal block hash unavailable, retrying next tick");
        return;
    };
    if !cheque.reveal(header.hash, &derived) {
        let _ = store.delete_cheque(Role::Payee, drawer, lottery_id, receiver);
        return;
    }

    let mut reveal_range = [0u8; 4];
    reveal_range.copy_from_slice(&cheque.reveal_range);
    let args = ClaimArgs {
        id: lottery_id,
        reveal_range,
        sig: cheque.sig,
        receiver_salt: cheque.receiver_salt,
        proof: cheque.witness.clone(),
    };

    match submit_claim(&contract, args).await {
        Ok(()) => {
            info!(lottery_id = %hex::encode(lottery_id), "claim succeeded");
            let _ = store.delete_cheque(Role::Payee, drawer, lottery_id, receiver);
        }
        Err(e) => {
            warn!(lottery_id = %hex::encode(lottery_id), error = %e, "claim failed, retrying next tick");
        }
    }
}

async fn submit_claim<C: ContractClient>(contract: &Arc<C>, args: ClaimArgs) -> Result<()> {
    let tx = contract.claim(args).await?;
    let receipt = contract.await_receipt(&tx, CLAIM_TIMEOUT).await?;
    match receipt {
        lottery_book_chain::Receipt::Success { .. } => Ok(()),
        lottery_book_chain::Receipt::Failed => Err(lottery_book_core::LotteryError::TransactionFailed),
    }
}
