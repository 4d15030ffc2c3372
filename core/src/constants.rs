//! Fixed protocol constants (spec §6).

/// Minimum representable payee share is 1/2^MAX_LEVEL.
pub const MAX_LEVEL: u32 = 10;

/// Domain of the winner space: the reveal hash is reduced into `[0, MAX_WEIGHT)`.
pub const MAX_WEIGHT: u64 = 1u64 << 32;

/// Blocks a freshly created lottery must age before the payer starts polling
/// the contract to see whether the deposit transaction landed.
pub const LOTTERY_PROCESS_CONFIRMS: u64 = 6;

/// Blocks after `reveal_number` during which a winning cheque may still be
/// claimed on-chain (bounded by `blockhash` availability).
pub const LOTTERY_CLAIM_PERIOD: u64 = 256;

/// Cheques issued or accepted this close to `reveal_number` are rejected —
/// too little time remains to get the cheque to the payee and claimed.
pub const LOTTERY_SAFETY_MARGIN: u64 = 2;

/// A cheque arriving this far past `reveal_number` is treated as deliberate
/// waste rather than a legitimate late submission.
pub const LOTTERY_SAFETY_THRESHOLD: u64 = 30;

/// Maximum number of times the payer retries confirming a pending deposit
/// before giving up and marking the lottery lost.
pub const MAX_VERIFY_RETRY: u32 = 5;

/// Base spacing (in blocks) between verification retries; retry `n` waits
/// `n * VERIFY_DISTANCE` blocks after the previous attempt.
pub const VERIFY_DISTANCE: u64 = 2;

/// How long to wait for a submitted transaction to be mined before giving up.
pub const TX_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// How long a payee's claim submission may run before being abandoned.
pub const CLAIM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Size of the lottery LRU cache in the cheque store.
pub const LOTTERY_CACHE_SIZE: usize = 128;

/// Size of the cheque LRU cache in the cheque store.
pub const CHEQUE_CACHE_SIZE: usize = 4096;

/// Per-lottery deposit cap enforced by the settlement contract, in wei.
pub const MAX_LOTTERY_DEPOSIT_WEI: u128 = 1_000_000_000_000_000_000;

/// Rolling window used by the cost watcher to average recent transaction fees.
pub const COST_WATCHER_WINDOW: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);
