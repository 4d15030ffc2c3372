use crate::hash::Hash32;

/// Error kinds shared by the Merkle tree, cheque codec, and the managers
/// built on top of them (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum LotteryError {
    #[error("merkle proof witness has invalid length")]
    InvalidWitness,

    #[error("merkle proof does not fold to the expected root")]
    InvalidProof,

    #[error("no surviving entry matches the requested value")]
    UnknownEntry,

    #[error("entry salt or value does not match the tree leaf")]
    InvalidEntry,

    #[error("cheque signature does not recover to the expected drawer")]
    InvalidSignature,

    #[error("cheque was not requested by this payee and binds to a different receiver")]
    UnsolicitedCheque,

    #[error("receiver commitment does not match the witness leaf")]
    InvalidReceiver,

    #[error("cheque signed_range does not strictly exceed the stored signed_range")]
    StaleCheque,

    #[error("cheque payment diff is zero or otherwise invalid")]
    InvalidPayment,

    #[error("lottery is past its claim window (reveal_number + threshold)")]
    ExpiredLottery,

    #[error("lottery is not funded on-chain (amount == 0)")]
    EmptyLottery,

    #[error("active lotteries cannot cover the requested amount for this payee")]
    NotEnoughDeposit,

    #[error("on-chain transaction was mined with a non-success receipt status")]
    TransactionFailed,

    #[error("transaction for lottery {id} was not confirmed within the timeout (nonce={nonce}, gas_price={gas_price})")]
    TransactionNotConfirmed {
        id: Hash32,
        nonce: u64,
        gas_price: u128,
    },

    #[error("wire codec error: {0}")]
    Codec(#[from] alloy_rlp::Error),

    #[error("collaborator error: {0}")]
    Collaborator(String),
}

pub type Result<T> = std::result::Result<T, LotteryError>;
