//! Opt-out ledger, suppression sweep and confirmation queue.

pub mod confirmations;
pub mod ledger;
pub mod model;

pub use confirmations::{send_due_confirmations, spawn_confirmation_task};
pub use ledger::OptOutLedger;
pub use model::{ConfirmationTask, OptOutAnalytics, OptOutEntry, OptOutSource};
