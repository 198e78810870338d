//! Bulk WhatsApp sender: campaign dispatch, opt-out ledger and reply
//! classification.

pub mod campaigns;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod optout;
pub mod phone;
pub mod replies;
pub mod retry;
pub mod server;
pub mod store;
