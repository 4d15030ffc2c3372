//! Core types shared by every crate in the workspace: the probabilistic
//! Merkle tree, the cheque codec/validator, the lottery lifecycle type, and
//! the fixed protocol constants. Holds no I/O and no collaborator traits —
//! those live in `lottery-book-chain` and `lottery-book-store`.

pub mod cheque;
pub mod constants;
pub mod error;
pub mod hash;
pub mod lottery;
pub mod merkle;

pub use cheque::{Address, Cheque, DerivedFields};
pub use error::{LotteryError, Result};
pub use hash::{hash_pair, keccak256, Digest, Hash32};
pub use lottery::{Lottery, LotteryState};
pub use merkle::{Entry, MerkleTree, Witness};
