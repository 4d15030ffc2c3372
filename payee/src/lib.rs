//! Payee-side component: the Cheque Manager (spec §4.E).

pub mod manager;

pub use manager::{ChequeManager, Mailbox as ChequeMailbox, Message as ChequeMessage};
