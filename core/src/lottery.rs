//! Lottery lifecycle type and allowance accounting (spec §3, §4.D).
//!
//! [`Lottery`] is the payer-side record of a single deposit: its state
//! machine, its Merkle partitioning of payees, and the bookkeeping the
//! Lifecycle Manager needs to decide when a lottery is due for a chain
//! check, revealed, or expired. It carries no collaborator handles —
//! advancing state is entirely the manager's job.

use crate::cheque::{assigned_deposit, Address};
use crate::constants::{LOTTERY_CLAIM_PERIOD, LOTTERY_SAFETY_MARGIN, MAX_VERIFY_RETRY, VERIFY_DISTANCE};
use crate::hash::Hash32;
use crate::merkle::MerkleTree;
use serde::{Deserialize, Serialize};

/// Where a lottery sits in its life from the payer's point of view (spec §4.D).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotteryState {
    /// Persisted locally, deposit transaction submitted but not yet confirmed.
    Pending,
    /// Deposit transaction mined; waiting out `LOTTERY_PROCESS_CONFIRMS` and
    /// polling the contract to confirm the on-chain amount matches.
    Verifying,
    /// Confirmed on-chain; cheques may be issued against it.
    Active,
    /// `reveal_number` has passed; no further cheques may be issued, but
    /// claims against already-issued cheques may still land.
    Revealed,
    /// Past `reveal_number + LOTTERY_CLAIM_PERIOD`; eligible for garbage
    /// collection.
    Expired,
    /// Verification exhausted its retries without ever observing the
    /// deposit on-chain; treated as a permanent loss, never recovered.
    Lost,
}

/// A single payer-side lottery record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lottery {
    pub id: Hash32,
    pub drawer: Address,
    pub contract_addr: Address,
    pub amount: u64,
    pub reveal_number: u64,
    pub salt: u64,
    /// Payees admitted to this lottery's tree (post-drop survivors only).
    pub receivers: Vec<Address>,
    pub gas_price: u128,
    pub nonce: u64,
    /// Block the deposit transaction was mined at; `0` until confirmed.
    pub created_at: u64,
    pub state: LotteryState,

    /// Block number the manager should next re-examine this lottery at.
    pub next_check: u64,
    /// Verification attempts made so far, bounded by `MAX_VERIFY_RETRY`.
    pub checks: u32,

    /// The partition tree, rebuilt locally after load rather than persisted
    /// — only the wire-visible lottery fields are durable.
    #[serde(skip)]
    pub tree: Option<MerkleTree>,
}

impl Lottery {
    pub fn new(
        id: Hash32,
        drawer: Address,
        contract_addr: Address,
        amount: u64,
        reveal_number: u64,
        salt: u64,
    ) -> Self {
        Lottery {
            id,
            drawer,
            contract_addr,
            amount,
            reveal_number,
            salt,
            receivers: Vec::new(),
            gas_price: 0,
            nonce: 0,
            created_at: 0,
            state: LotteryState::Pending,
            next_check: 0,
            checks: 0,
            tree: None,
        }
    }

    /// Whether the on-chain deposit transaction has been observed mined.
    pub fn confirmed(&self) -> bool {
        !matches!(self.state, LotteryState::Pending | LotteryState::Verifying)
    }

    /// Deposit assigned to a payee whose witness has `witness_len` elements.
    pub fn assigned_to(&self, witness_len: usize) -> u64 {
        assigned_deposit(self.amount, witness_len)
    }

    /// Schedule the next verification retry, or mark the lottery lost once
    /// `MAX_VERIFY_RETRY` has been exhausted. `current_block` anchors the
    /// retry backoff, which grows linearly with each attempt.
    pub fn schedule_retry(&mut self, current_block: u64) {
        self.checks += 1;
        if self.checks >= MAX_VERIFY_RETRY {
            self.state = LotteryState::Lost;
            return;
        }
        self.next_check = current_block + self.checks as u64 * VERIFY_DISTANCE;
    }

    pub fn mark_active(&mut self) {
        self.state = LotteryState::Active;
    }

    /// A lottery stops accepting new cheques once fewer than
    /// `LOTTERY_SAFETY_MARGIN` blocks remain before `reveal_number`.
    pub fn accepts_cheques(&self, current_block: u64) -> bool {
        matches!(self.state, LotteryState::Active)
            && current_block + LOTTERY_SAFETY_MARGIN < self.reveal_number
    }

    pub fn advance(&mut self, current_block: u64) {
        match self.state {
            LotteryState::Active if current_block >= self.reveal_number => {
                self.state = LotteryState::Revealed;
            }
            LotteryState::Revealed
                if current_block >= self.reveal_number.saturating_add(LOTTERY_CLAIM_PERIOD) =>
            {
                self.state = LotteryState::Expired;
            }
            _ => {}
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, LotteryState::Expired | LotteryState::Lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Lottery {
        Lottery::new([1u8; 32], [2u8; 20], [3u8; 20], 1_000_000, 1_000, 7)
    }

    #[test]
    fn retries_exhaust_into_lost() {
        let mut lottery = sample();
        for _ in 0..MAX_VERIFY_RETRY {
            lottery.schedule_retry(0);
        }
        assert_eq!(lottery.state, LotteryState::Lost);
    }

    #[test]
    fn state_advances_through_reveal_and_expiry() {
        let mut lottery = sample();
        lottery.mark_active();
        assert!(lottery.accepts_cheques(0));
        assert!(!lottery.accepts_cheques(999)); // inside the safety margin

        lottery.advance(1_000);
        assert_eq!(lottery.state, LotteryState::Revealed);

        lottery.advance(1_000 + LOTTERY_CLAIM_PERIOD);
        assert_eq!(lottery.state, LotteryState::Expired);
        assert!(lottery.is_terminal());
    }
}
