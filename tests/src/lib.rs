//! This crate carries no library code of its own; see `tests/` for the
//! cross-crate integration scenarios (spec §8).
