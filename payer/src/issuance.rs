//! The Issuance/Settlement Engine (spec §4.F): `Deposit`, `IssueCheque`,
//! `AddCheque`, `Destroy`, and the pure projections over the store.

use crate::cost_watcher::CostWatcher;
use crate::lifecycle::Mailbox as LotteryMailbox;
use lottery_book_chain::{ContractClient, Signer};
use lottery_book_core::cheque::{assigned_deposit, bump_signed_range, paid_fraction, Address};
use lottery_book_core::constants::LOTTERY_SAFETY_THRESHOLD;
use lottery_book_core::merkle::Entry;
use lottery_book_core::{keccak256, Cheque, Hash32, Lottery, LotteryError, MerkleTree, Result};
use lottery_book_payee::ChequeMailbox;
use lottery_book_store::{ChequeStore, Role};
use rand::RngCore;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct IssuanceEngine<C: ContractClient, S: Signer> {
    pub drawer: Address,
    pub contract_addr: Address,
    pub store: Arc<ChequeStore>,
    pub contract: Arc<C>,
    pub signer: Arc<S>,
    pub lottery_mailbox: LotteryMailbox,
    pub cheque_mailbox: ChequeMailbox,
    pub tx_timeout: Duration,
    pub cost_watcher: Arc<Mutex<CostWatcher>>,
}

impl<C: ContractClient, S: Signer> IssuanceEngine<C, S> {
    /// `Deposit`: reuse the closest-matching expired lottery via `Reset` if
    /// one exists, otherwise `Create` a fresh one.
    pub async fn deposit(
        &self,
        payees: Vec<Address>,
        amounts: Vec<u64>,
        reveal_number: u64,
    ) -> Result<Hash32> {
        let total: u64 = amounts.iter().sum();
        let expired = self.lottery_mailbox.query_expired().await;
        let reuse = expired.iter().min_by_key(|l| l.amount.abs_diff(total));

        match reuse {
            Some(old) => self.reset(old.id, payees, amounts, reveal_number).await,
            None => self.create(payees, amounts, reveal_number).await,
        }
    }

    pub async fn create(&self, payees: Vec<Address>, amounts: Vec<u64>, reveal_number: u64) -> Result<Hash32> {
        self.provision(None, payees, amounts, reveal_number).await
    }

    pub async fn reset(
        &self,
        old_id: Hash32,
        payees: Vec<Address>,
        amounts: Vec<u64>,
        reveal_number: u64,
    ) -> Result<Hash32> {
        self.provision(Some(old_id), payees, amounts, reveal_number).await
    }

    async fn provision(
        &self,
        old_id: Option<Hash32>,
        payees: Vec<Address>,
        amounts: Vec<u64>,
        reveal_number: u64,
    ) -> Result<Hash32> {
        let entries: Vec<Entry> = payees
            .iter()
            .zip(amounts.iter())
            .map(|(p, w)| Entry { value: p.to_vec(), weight: *w })
            .collect();
        let outcome = MerkleTree::build(entries);
        if !outcome.dropped.is_empty() {
            warn!(dropped = outcome.dropped.len(), "some payees could not be placed in the tree");
        }

        let total: u64 = amounts.iter().sum();
        let salt = rand::thread_rng().next_u64();
        let root = outcome.tree.root_hash().ok_or(LotteryError::EmptyLottery)?;
        let mut id_preimage = Vec::with_capacity(40);
        id_preimage.extend_from_slice(&root);
        id_preimage.extend_from_slice(&salt.to_be_bytes());
        let id = keccak256(&id_preimage);

        let old_amount = match old_id {
            Some(prev) => self.store.get_lottery(false, self.drawer, prev)?.map(|l| l.amount).unwrap_or(0),
            None => 0,
        };
        let value = total.saturating_sub(old_amount);

        let tx = match old_id {
            Some(prev) => self.contract.reset_lottery(prev, id, reveal_number, salt, value).await?,
            None => self.contract.new_lottery(id, reveal_number, salt, value).await?,
        };

        let mut lottery = Lottery::new(id, self.drawer, self.contract_addr, total, reveal_number, salt);
        lottery.gas_price = tx.gas_price;
        lottery.nonce = tx.nonce;
        lottery.receivers = outcome
            .tree
            .leaves()
            .iter()
            .map(|(v, _, _)| {
                let mut addr = [0u8; 20];
                addr.copy_from_slice(v);
                addr
            })
            .collect();
        lottery.tree = Some(outcome.tree.clone());
        self.store.put_lottery(true, &lottery)?;

        for (value, _level, entry_salt) in outcome.tree.leaves() {
            let mut payee = [0u8; 20];
            payee.copy_from_slice(value);
            let witness = outcome.tree.prove(value, *entry_salt)?;
            let mut cheque = Cheque::new(witness, self.contract_addr, salt, *entry_salt, reveal_number);
            let digest = cheque.sign_hash(id);
            let sig = self.signer.raw_sign(digest).await?;
            cheque.set_signature(sig);
            self.store.put_cheque(Role::Payer, self.drawer, id, payee, &cheque)?;
        }

        let receipt: std::result::Result<lottery_book_chain::Receipt, lottery_book_chain::ChainError> =
            self.contract.await_receipt(&tx, self.tx_timeout).await;

        match receipt {
            Ok(lottery_book_chain::Receipt::Success { block_number }) => {
                lottery.created_at = block_number;
                lottery.mark_active();
                self.store.put_lottery(false, &lottery)?;
                self.store.delete_lottery(true, self.drawer, id)?;
                self.record_fee(tx.gas_price as f64);
                self.lottery_mailbox.track(lottery).await;
                info!(id = %hex::encode(id), "lottery funded and active");
                Ok(id)
            }
            Ok(lottery_book_chain::Receipt::Failed) => Err(LotteryError::TransactionFailed),
            Err(_) => Err(LotteryError::TransactionNotConfirmed {
                id,
                nonce: tx.nonce,
                gas_price: tx.gas_price,
            }),
        }
    }

    /// `IssueCheque`: consume allowance across active lotteries, ascending
    /// by reveal time, skipping any too close to reveal.
    pub async fn issue_cheque(&self, payee: Address, amount: u64, current_head: u64) -> Result<Vec<Cheque>> {
        let mut remaining = amount;
        let mut issued = Vec::new();

        let mut active = self.lottery_mailbox.query_active().await;
        active.sort_by_key(|l| l.reveal_number);

        for lottery in active {
            if remaining == 0 {
                break;
            }
            if !lottery.receivers.contains(&payee) {
                continue;
            }
            if !lottery.accepts_cheques(current_head) {
                continue;
            }

            let Some(mut cheque) = self.store.get_cheque(Role::Payer, self.drawer, lottery.id, payee)? else {
                continue;
            };
            let derived = cheque.derive()?;
            let assigned = assigned_deposit(lottery.amount, cheque.witness.len());
            let paid = paid_fraction(derived.signed_range, derived.lower_limit, derived.upper_limit, assigned);
            let allowance = assigned.saturating_sub(paid);
            if allowance == 0 {
                continue;
            }

            let want = remaining.min(allowance);
            let (new_signed_range, paid_now) = bump_signed_range(
                Some(&derived),
                derived.lower_limit,
                derived.upper_limit,
                assigned,
                want,
            )?;

            cheque.reveal_range = (new_signed_range as u32).to_be_bytes().to_vec();
            let digest = cheque.sign_hash(derived.lottery_id);
            let sig = self.signer.raw_sign(digest).await?;
            cheque.set_signature(sig);
            self.store.put_cheque(Role::Payer, self.drawer, lottery.id, payee, &cheque)?;

            remaining = remaining.saturating_sub(paid_now);
            issued.push(cheque);
        }

        if remaining > 0 {
            return Err(LotteryError::NotEnoughDeposit);
        }
        Ok(issued)
    }

    /// `AddCheque`: the payee-side entry point for a cheque that just
    /// arrived off-band. Returns the newly paid-off amount, and hands the
    /// cheque to the Cheque Manager (spec §4.E) so it gets tracked toward
    /// its reveal. This engine instance models one drawer/payee
    /// relationship; a payee tracking several drawers runs one instance
    /// per drawer.
    pub async fn add_cheque(
        &self,
        receiver: Address,
        cheque: Cheque,
        lottery: &Lottery,
        current_head: u64,
    ) -> Result<u64> {
        let derived = cheque.validate(self.contract_addr, self.drawer, receiver)?;
        if lottery.amount == 0 {
            return Err(LotteryError::EmptyLottery);
        }
        if !lottery.accepts_cheques(current_head) {
            return Err(LotteryError::ExpiredLottery);
        }
        if current_head >= cheque.reveal_number + LOTTERY_SAFETY_THRESHOLD {
            return Err(LotteryError::ExpiredLottery);
        }

        let stored = self.store.get_cheque(Role::Payee, self.drawer, derived.lottery_id, receiver)?;
        let stored_derived = stored.as_ref().map(|c| c.derive()).transpose()?;
        lottery_book_core::cheque::accept_cumulative_bump(stored_derived.as_ref(), &derived)?;

        let assigned = assigned_deposit(lottery.amount, cheque.witness.len());
        let paid_before = stored_derived
            .map(|d| paid_fraction(d.signed_range, derived.lower_limit, derived.upper_limit, assigned))
            .unwrap_or(0);
        let paid_after = paid_fraction(derived.signed_range, derived.lower_limit, derived.upper_limit, assigned);

        self.store.put_cheque(Role::Payee, self.drawer, derived.lottery_id, receiver, &cheque)?;
        self.cheque_mailbox.track_cheque(derived.lottery_id, self.drawer, cheque.reveal_number).await;
        Ok(paid_after.saturating_sub(paid_before))
    }

    /// `Destroy`: reclaim every expired lottery this engine owns.
    pub async fn destroy_expired(&self) -> Result<()> {
        for lottery in self.lottery_mailbox.query_expired().await {
            let tx = self.contract.destroy_lottery(lottery.id).await?;
            let receipt = self.contract.await_receipt(&tx, self.tx_timeout).await?;
            if matches!(receipt, lottery_book_chain::Receipt::Success { .. }) {
                self.record_fee(tx.gas_price as f64);
                self.lottery_mailbox.delete_expired(lottery.id).await;
            }
        }
        Ok(())
    }

    /// Feed a confirmed transaction's gas price into the rolling fee
    /// average consumers can query via [`IssuanceEngine::average_fee`].
    fn record_fee(&self, gas_price: f64) {
        if let Ok(mut watcher) = self.cost_watcher.lock() {
            watcher.record(Instant::now(), gas_price);
        }
    }

    /// Rolling average gas price across recently confirmed transactions.
    pub fn average_fee(&self) -> Option<f64> {
        self.cost_watcher.lock().ok()?.average(Instant::now())
    }

    pub fn allowance(&self, lottery: &Lottery, payee: Address) -> Result<u64> {
        let Some(cheque) = self.store.get_cheque(Role::Payer, self.drawer, lottery.id, payee)? else {
            return Ok(assigned_deposit(lottery.amount, 1));
        };
        let derived = cheque.derive()?;
        let assigned = assigned_deposit(lottery.amount, cheque.witness.len());
        let paid = paid_fraction(derived.signed_range, derived.lower_limit, derived.upper_limit, assigned);
        Ok(assigned.saturating_sub(paid))
    }

    pub fn estimated_expiry(&self, lottery: &Lottery) -> u64 {
        lottery.reveal_number + lottery_book_core::constants::LOTTERY_CLAIM_PERIOD
    }

    pub async fn list_lotteries(&self) -> Vec<Lottery> {
        let mut all = self.lottery_mailbox.query_active().await;
        all.extend(self.lottery_mailbox.query_expired().await);
        all
    }
}
