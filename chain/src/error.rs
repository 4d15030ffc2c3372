#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("contract call reverted: {0}")]
    Reverted(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("requested block is unknown to this chain reader")]
    UnknownBlock,
}

pub type Result<T> = std::result::Result<T, ChainError>;

impl From<ChainError> for lottery_book_core::LotteryError {
    fn from(e: ChainError) -> Self {
        lottery_book_core::LotteryError::Collaborator(e.to_string())
    }
}
