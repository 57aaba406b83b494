//! Change-feed domain types.
//!
//! Events carried by the push channel and the tagged state machine of a
//! single product subscription.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::stats::ProductId;

/// Kind of row change observed on the order table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// Event delivered by a change-feed subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A raw order row changed. Carries no count; only hints that one moved.
    RowMutation {
        product_id: ProductId,
        op: MutationKind,
    },
    /// The aggregate view recomputed the authoritative count.
    AggregateUpdate {
        product_id: ProductId,
        total_orders: u64,
    },
}

impl FeedEvent {
    pub fn product_id(&self) -> &str {
        match self {
            Self::RowMutation { product_id, .. } | Self::AggregateUpdate { product_id, .. } => {
                product_id
            }
        }
    }
}

/// Subscription filter sent to the change-feed transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    /// Underlying order table (e.g. `orders`).
    pub table: String,
    pub product_id: ProductId,
}

impl FeedFilter {
    pub fn new(table: impl Into<String>, product_id: impl Into<ProductId>) -> Self {
        Self {
            table: table.into(),
            product_id: product_id.into(),
        }
    }

    pub fn matches(&self, event: &FeedEvent) -> bool {
        event.product_id() == self.product_id
    }
}

/// Connection state of one change-feed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Idle,
    Connecting,
    Subscribed,
    /// Waiting out (or retrying after) backoff for this attempt.
    Reconnecting { attempt: u32 },
    /// Reconnect budget exhausted for the current episode.
    Failed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Subscribed => f.write_str("subscribed"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting({attempt})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Status notifications surfaced to the channel's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The subscription is live; events will flow.
    Subscribed,
    /// The connection dropped; the next attempt starts after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reported once per failure episode.
    MaxRetriesExceeded,
}
