#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("underlying database error: {0}")]
    Db(#[from] sled::Error),

    #[error("wire codec error: {0}")]
    Codec(#[from] alloy_rlp::Error),

    #[error("malformed key encountered during a prefix scan")]
    MalformedKey,
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for lottery_book_core::LotteryError {
    fn from(e: StoreError) -> Self {
        lottery_book_core::LotteryError::Collaborator(e.to_string())
    }
}
