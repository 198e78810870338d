//! Campaigns: records, personalization and the dispatch engine.

pub mod dispatch;
pub mod model;
pub mod personalize;

pub use dispatch::{DispatchEngine, DispatchSummary};
pub use model::{
    Campaign, CampaignMessage, CampaignStats, CampaignStatus, Contact, MessageCounts,
    MessageStatus,
};
pub use personalize::personalize;
