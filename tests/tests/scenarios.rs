//! Cross-crate integration scenarios (spec §8): the full payer lifecycle
//! against a mock chain, and the payee cheque manager claiming a winner.

use lottery_book_chain::traits::mock::{MockChain, MockSigner};
use lottery_book_chain::{Contract, Signer};
use lottery_book_core::constants::LOTTERY_PROCESS_CONFIRMS;
use lottery_book_core::{keccak256, Cheque, LotteryState};
use lottery_book_payee::ChequeManager;
use lottery_book_payer::{CostWatcher, IssuanceEngine, LotteryManager};
use lottery_book_store::{ChequeStore, MemKv, Role};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// S5: a lottery goes Pending -> Active -> Revealed -> Expired as the chain
/// head advances, driven entirely by the Lottery Lifecycle Manager.
#[tokio::test]
async fn lottery_lifecycle_reaches_active_then_expires() {
    let chain = Arc::new(MockChain::new());
    let store = Arc::new(ChequeStore::new(Arc::new(MemKv::new())));
    let drawer_signer = MockSigner::from_seed([0x41u8; 32]);
    let drawer = drawer_signer.address();
    let contract_addr = [0x55u8; 20];

    let manager = LotteryManager::recover(drawer, store.clone(), chain.clone(), 0).await;
    let (lottery_mailbox, _handle) = manager.spawn(chain.subscribe_chain_head());

    let cheque_manager = ChequeManager::recover([0xFFu8; 20], store.clone(), chain.clone(), chain.clone()).await;
    let (cheque_mailbox, _cheque_handle) = cheque_manager.spawn();

    let engine = IssuanceEngine {
        drawer,
        contract_addr,
        store: store.clone(),
        contract: chain.clone(),
        signer: Arc::new(drawer_signer),
        lottery_mailbox: lottery_mailbox.clone(),
        cheque_mailbox,
        tx_timeout: Duration::from_secs(5),
        cost_watcher: Arc::new(Mutex::new(CostWatcher::new())),
    };

    let payee_a = [0xA1u8; 20];
    let payee_b = [0xA2u8; 20];
    let reveal_number = 8u64;
    let id = engine
        .create(vec![payee_a, payee_b], vec![64, 64], reveal_number)
        .await
        .expect("the mock chain confirms deposits synchronously");

    // `MockChain::await_receipt` always succeeds immediately, so `create`
    // only returns once the lottery has already been tracked as Active.
    let active = lottery_mailbox.query_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, id);
    assert_eq!(active[0].state, LotteryState::Active);

    for _ in 0..reveal_number {
        chain.mine().await;
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if lottery_mailbox.query_active().await.is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "lottery never left Active");
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let expiry_head = reveal_number + lottery_book_core::constants::LOTTERY_CLAIM_PERIOD;
    for _ in reveal_number..expiry_head {
        chain.mine().await;
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if !lottery_mailbox.query_expired().await.is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "lottery never reached Expired");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// A single-leaf (whole-probability-space) cheque always wins its reveal,
/// so the Cheque Manager must claim it exactly once and then forget it,
/// regardless of which block hash the mock chain produces.
#[tokio::test]
async fn winning_cheque_gets_claimed_by_the_cheque_manager() {
    let chain = Arc::new(MockChain::new());
    let store = Arc::new(ChequeStore::new(Arc::new(MemKv::new())));

    let drawer_signer = MockSigner::from_seed([0x11u8; 32]);
    let drawer = drawer_signer.address();
    let contract_addr = [0x22u8; 20];
    let receiver = [0x33u8; 20];
    let receiver_salt = 9u64;

    let leaf_preimage = [receiver.as_slice(), &receiver_salt.to_be_bytes()].concat();
    let witness = vec![keccak256(&leaf_preimage)];

    let lottery_salt = 77u64;
    let reveal_number = 5u64;
    let mut cheque = Cheque::new(witness, contract_addr, lottery_salt, receiver_salt, reveal_number);
    let derived = cheque.derive().unwrap();
    cheque.reveal_range = (derived.upper_limit as u32).to_be_bytes().to_vec();
    let digest = cheque.sign_hash(derived.lottery_id);
    let sig = drawer_signer.raw_sign(digest).await.unwrap();
    cheque.set_signature(sig);

    chain.fund(derived.lottery_id, 128, reveal_number, lottery_salt, drawer);
    store
        .put_cheque(Role::Payee, drawer, derived.lottery_id, receiver, &cheque)
        .unwrap();

    let manager = ChequeManager::recover(receiver, store.clone(), chain.clone(), chain.clone()).await;
    let (_mailbox, _handle) = manager.spawn();

    for _ in 0..(reveal_number + LOTTERY_PROCESS_CONFIRMS) {
        chain.mine().await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if store
            .get_cheque(Role::Payee, drawer, derived.lottery_id, receiver)
            .unwrap()
            .is_none()
        {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "winning cheque was never claimed");
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    assert!(
        chain.lotteries(derived.lottery_id).await.is_err(),
        "claim() removes the lottery once paid out"
    );
}

/// `add_cheque` is the payee's entry point for a cheque arriving off-band
/// (spec §4.F): it must both persist the cheque under the payee's own role
/// and hand it to the Cheque Manager, rather than leaving callers to poke
/// the store and manager separately.
#[tokio::test]
async fn add_cheque_hands_the_cheque_to_the_cheque_manager() {
    let chain = Arc::new(MockChain::new());
    let store = Arc::new(ChequeStore::new(Arc::new(MemKv::new())));
    let drawer_signer = MockSigner::from_seed([0x71u8; 32]);
    let drawer = drawer_signer.address();
    let contract_addr = [0x66u8; 20];
    let payee = [0x77u8; 20];

    let lottery_manager = LotteryManager::recover(drawer, store.clone(), chain.clone(), 0).await;
    let (lottery_mailbox, _lottery_handle) = lottery_manager.spawn(chain.subscribe_chain_head());

    let cheque_manager = ChequeManager::recover(payee, store.clone(), chain.clone(), chain.clone()).await;
    let (cheque_mailbox, _cheque_handle) = cheque_manager.spawn();

    let engine = IssuanceEngine {
        drawer,
        contract_addr,
        store: store.clone(),
        contract: chain.clone(),
        signer: Arc::new(drawer_signer),
        lottery_mailbox: lottery_mailbox.clone(),
        cheque_mailbox: cheque_mailbox.clone(),
        tx_timeout: Duration::from_secs(5),
        cost_watcher: Arc::new(Mutex::new(CostWatcher::new())),
    };

    let reveal_number = 10u64;
    let id = engine
        .create(vec![payee], vec![100], reveal_number)
        .await
        .expect("the mock chain confirms deposits synchronously");
    let lottery = engine
        .list_lotteries()
        .await
        .into_iter()
        .find(|l| l.id == id)
        .expect("create() tracks the new lottery as Active");

    // The drawer's own local copy is what would be handed to the payee
    // off-band in a real deployment (RPC, direct message, ...).
    let cheque = store
        .get_cheque(Role::Payer, drawer, id, payee)
        .unwrap()
        .expect("provision() persisted a per-payee cheque");

    let paid = engine.add_cheque(payee, cheque, &lottery, 0).await.unwrap();
    assert!(paid > 0, "the first cheque for a payee always pays off something");

    // add_cheque must have both persisted the payee-role copy...
    assert!(store.get_cheque(Role::Payee, drawer, id, payee).unwrap().is_some());

    // ...and forwarded it to the Cheque Manager, without the test reaching
    // into the manager's internals to do so itself.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if cheque_mailbox.list_tracked().await.contains(&id) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "add_cheque never reached the cheque manager");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
