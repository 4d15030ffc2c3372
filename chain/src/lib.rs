//! Collaborator interfaces external to the core protocol (spec §6): the
//! settlement contract, the chain reader, and the signer. `mock` gives
//! in-memory doubles for tests; `onchain` backs them with a real `alloy`
//! provider.

pub mod error;
pub mod traits;

pub use error::{ChainError, Result};
pub use traits::{
    mock::{MockChain, MockSigner},
    ChainHead, ChainLottery, ChainReader, ClaimArgs, Contract, ContractClient, Header, Receipt, Signer, TxHandle,
    TxWaiter,
};
