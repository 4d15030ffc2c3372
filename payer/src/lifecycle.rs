//! The Lottery Lifecycle Manager (spec §4.D): a single event-loop task
//! owning every lottery the payer has created, driven by chain-head events,
//! tracking requests, and the completion of a single in-flight verifier
//! child task.

use lottery_book_chain::{ChainHead, ContractClient};
use lottery_book_core::cheque::Address;
use lottery_book_core::constants::LOTTERY_PROCESS_CONFIRMS;
use lottery_book_core::{Hash32, Lottery, LotteryState};
use lottery_book_store::ChequeStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

/// A transition notification flushed to subscribers once per loop iteration.
#[derive(Clone, Debug)]
pub struct LotteryEvent {
    pub id: Hash32,
    pub state: LotteryState,
    pub lottery: Option<Lottery>,
}

pub enum Message {
    Track(Lottery),
    DeleteExpired(Hash32),
    QueryActive(oneshot::Sender<Vec<Lottery>>),
    QueryExpired(oneshot::Sender<Vec<Lottery>>),
    Claimed(Hash32),
}

/// A handle used by other components to talk to the running manager.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub async fn track(&self, lottery: Lottery) {
        let _ = self.sender.send(Message::Track(lottery)).await;
    }

    pub async fn delete_expired(&self, id: Hash32) {
        let _ = self.sender.send(Message::DeleteExpired(id)).await;
    }

    pub async fn claimed(&self, id: Hash32) {
        let _ = self.sender.send(Message::Claimed(id)).await;
    }

    pub async fn query_active(&self) -> Vec<Lottery> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Message::QueryActive(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn query_expired(&self) -> Vec<Lottery> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Message::QueryExpired(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

enum VerifyOutcome {
    Confirmed { id: Hash32, amount: u64 },
    NotYet { id: Hash32 },
}

/// Owns every lottery for a single drawer address. Run as a detached task
/// via [`LotteryManager::spawn`]; dropping the last [`Mailbox`] closes the
/// loop (the `closeCh` of spec §5).
pub struct LotteryManager<C: ContractClient> {
    drawer: Address,
    store: Arc<ChequeStore>,
    contract: Arc<C>,
    lotteries: HashMap<Hash32, Lottery>,
    subscribers: Vec<mpsc::Sender<LotteryEvent>>,
    verifying: bool,
    /// Transitions observed since the last flush; drained by `flush_events`.
    pending_events: Vec<LotteryEvent>,
}

impl<C: ContractClient + 'static> LotteryManager<C> {
    /// Crash recovery (spec §4.D): reconcile tentative vs. committed records
    /// before the loop starts accepting new work.
    pub async fn recover(
        drawer: Address,
        store: Arc<ChequeStore>,
        contract: Arc<C>,
        current_head: u64,
    ) -> Self {
        let mut lotteries = HashMap::new();

        let tentative = store.list_lotteries(true, drawer).unwrap_or_default();
        for mut lottery in tentative {
            let committed_exists = store.get_lottery(false, drawer, lottery.id).ok().flatten().is_some();
            if committed_exists {
                let _ = store.delete_lottery(true, drawer, lottery.id);
                continue;
            }
            match contract.lotteries(lottery.id).await {
                Ok(chain_lottery) if chain_lottery.amount != 0 => {
                    lottery.created_at = current_head;
                    lottery.state = LotteryState::Active;
                    let _ = store.put_lottery(false, &lottery);
                    let _ = store.delete_lottery(true, drawer, lottery.id);
                    lotteries.insert(lottery.id, lottery);
                }
                _ => {
                    lottery.state = LotteryState::Verifying;
                    lottery.next_check = current_head + LOTTERY_PROCESS_CONFIRMS;
                    lotteries.insert(lottery.id, lottery);
                }
            }
        }

        for mut lottery in store.list_lotteries(false, drawer).unwrap_or_default() {
            lottery.advance(current_head);
            lotteries.insert(lottery.id, lottery);
        }

        LotteryManager {
            drawer,
            store,
            contract,
            lotteries,
            subscribers: Vec::new(),
            verifying: false,
            pending_events: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<LotteryEvent> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.push(tx);
        rx
    }

    /// Start the event loop as a detached task, fed chain-head notifications
    /// from `head_rx` (typically `ChainReader::subscribe_chain_head()`).
    pub fn spawn(self, head_rx: mpsc::Receiver<ChainHead>) -> (Mailbox, tokio::task::JoinHandle<()>)
    where
        C: Send + Sync,
    {
        let (tx, rx) = mpsc::channel(256);
        let handle = tokio::spawn(self.run(rx, head_rx));
        (Mailbox { sender: tx }, handle)
    }

    #[instrument(skip_all, fields(drawer = %hex::encode(self.drawer)))]
    async fn run(mut self, mut rx: mpsc::Receiver<Message>, mut head_rx: mpsc::Receiver<ChainHead>) {
        let (verify_tx, mut verify_rx) = mpsc::channel::<VerifyOutcome>(8);
        let mut current_head = 0u64;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(Message::Track(lottery)) => self.track(lottery),
                        Some(Message::DeleteExpired(id)) => self.delete_if_expired(id),
                        Some(Message::Claimed(id)) => self.on_claimed(id),
                        Some(Message::QueryActive(reply)) => {
                            let _ = reply.send(self.by_state(LotteryState::Active));
                        }
                        Some(Message::QueryExpired(reply)) => {
                            let _ = reply.send(self.by_state(LotteryState::Expired));
                        }
                        None => break,
                    }
                }
                Some(head) = head_rx.recv() => {
                    current_head = head.block_number;
                    self.on_chain_head(current_head);
                    self.maybe_spawn_verifier(current_head, verify_tx.clone());
                }
                Some(outcome) = verify_rx.recv() => {
                    self.verifying = false;
                    self.apply_verify_outcome(outcome, current_head);
                }
                else => break,
            }
            self.flush_events();
        }
    }

    fn track(&mut self, lottery: Lottery) {
        debug!(id = %hex::encode(lottery.id), "tracking new lottery");
        let _ = self.store.put_lottery(lottery.state == LotteryState::Pending, &lottery);
        self.mark_dirty(&lottery);
        self.lotteries.insert(lottery.id, lottery);
    }

    /// Record that `lottery` just transitioned (or was newly tracked), so
    /// the next `flush_events` call includes it.
    fn mark_dirty(&mut self, lottery: &Lottery) {
        self.pending_events.push(LotteryEvent {
            id: lottery.id,
            state: lottery.state,
            lottery: Some(lottery.clone()),
        });
    }

    fn by_state(&self, state: LotteryState) -> Vec<Lottery> {
        self.lotteries.values().filter(|l| l.state == state).cloned().collect()
    }

    fn on_chain_head(&mut self, head: u64) {
        let mut transitioned = Vec::new();
        for lottery in self.lotteries.values_mut() {
            let before = lottery.state;
            match lottery.state {
                LotteryState::Pending if head >= lottery.created_at + LOTTERY_PROCESS_CONFIRMS => {
                    lottery.state = LotteryState::Verifying;
                    lottery.next_check = lottery.created_at + LOTTERY_PROCESS_CONFIRMS;
                }
                _ => lottery.advance(head),
            }
            if lottery.state != before {
                transitioned.push(lottery.clone());
            }
        }
        for lottery in &transitioned {
            self.mark_dirty(lottery);
        }
    }

    fn maybe_spawn_verifier(&mut self, head: u64, verify_tx: mpsc::Sender<VerifyOutcome>) {
        if self.verifying {
            return;
        }
        let Some(id) = self
            .lotteries
            .values()
            .find(|l| l.state == LotteryState::Verifying && l.next_check <= head)
            .map(|l| l.id)
        else {
            return;
        };
        self.verifying = true;
        let contract = self.contract.clone();
        tokio::spawn(async move {
            let outcome = match contract.lotteries(id).await {
                Ok(chain_lottery) if chain_lottery.amount != 0 => {
                    VerifyOutcome::Confirmed { id, amount: chain_lottery.amount }
                }
                _ => VerifyOutcome::NotYet { id },
            };
            let _ = verify_tx.send(outcome).await;
        });
    }

    fn apply_verify_outcome(&mut self, outcome: VerifyOutcome, head: u64) {
        match outcome {
            VerifyOutcome::Confirmed { id, amount } => {
                if let Some(lottery) = self.lotteries.get_mut(&id) {
                    lottery.amount = amount;
                    lottery.created_at = head;
                    lottery.mark_active();
                    let _ = self.store.put_lottery(false, lottery);
                    info!(id = %hex::encode(id), "lottery confirmed on-chain");
                    let snapshot = lottery.clone();
                    self.mark_dirty(&snapshot);
                }
            }
            VerifyOutcome::NotYet { id } => {
                if let Some(lottery) = self.lotteries.get_mut(&id) {
                    let before = lottery.state;
                    lottery.schedule_retry(head);
                    if lottery.state == LotteryState::Lost {
                        warn!(id = %hex::encode(id), "lottery deposit never confirmed, marking lost");
                        let _ = self.store.delete_lottery(true, self.drawer, id);
                    }
                    if lottery.state != before {
                        let snapshot = lottery.clone();
                        self.mark_dirty(&snapshot);
                    }
                }
            }
        }
    }

    fn delete_if_expired(&mut self, id: Hash32) {
        if let Some(lottery) = self.lotteries.get(&id) {
            if lottery.is_terminal() {
                let _ = self.store.delete_lottery(false, self.drawer, id);
                let _ = self.store.delete_lottery(true, self.drawer, id);
                self.lotteries.remove(&id);
            }
        }
    }

    fn on_claimed(&mut self, id: Hash32) {
        let _ = self.store.delete_lottery(false, self.drawer, id);
        let _ = self.store.delete_lottery(true, self.drawer, id);
        self.lotteries.remove(&id);
    }

    /// Periodic GC (spec §4.D, ~every 5 minutes): drop expired entries the
    /// contract confirms are already gone on-chain (claimed, reset, or
    /// destroyed by a concurrent actor).
    pub async fn gc_sweep(&mut self) {
        let expired: Vec<Hash32> = self
            .lotteries
            .values()
            .filter(|l| l.state == LotteryState::Expired)
            .map(|l| l.id)
            .collect();
        for id in expired {
            if let Ok(chain_lottery) = self.contract.lotteries(id).await {
                if chain_lottery.amount == 0 {
                    let _ = self.store.delete_lottery(false, self.drawer, id);
                    self.lotteries.remove(&id);
                }
            }
        }
    }

    /// Flush the transitions accumulated since the last call. A no-op when
    /// nothing transitioned this iteration (e.g. a `QueryActive` read or a
    /// `Track` call that didn't change anything) or when nobody subscribed.
    fn flush_events(&mut self) {
        if self.pending_events.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.pending_events);
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers.retain(|sub| {
            for event in &events {
                // Bounded channel: a slow subscriber drops events rather than
                // stalling the loop.
                let _ = sub.try_send(event.clone());
            }
            !sub.is_closed()
        });
    }
}
