//! # Beacon Events
//!
//! Notifications emitted by the beacon chain controller. None of them is
//! consensus-critical: dropping one never changes the best state.

use serde::{Deserialize, Serialize};
use shared_types::{BeaconHeight, Hash, ShardId};

/// All events that can be published to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeaconEvent {
    /// A beacon block was committed and promoted to best state.
    BeaconBlockInserted {
        /// Height of the committed block.
        height: BeaconHeight,
        /// Hash of the committed block.
        block_hash: Hash,
        /// Epoch of the committed block.
        epoch: u64,
    },

    /// Committee or pending-validator membership changed.
    ///
    /// Consumed by networking to rebroadcast topology to peers.
    CommitteeChanged {
        /// Height of the block that caused the change.
        height: BeaconHeight,
        /// Beacon committee or beacon pending list changed.
        beacon_changed: bool,
        /// Shards whose committee or pending list changed, ascending.
        changed_shards: Vec<ShardId>,
    },

    /// The core is missing an ancestor and asks peers for it.
    SyncRequested {
        /// Hashes of the missing blocks.
        missing_hashes: Vec<Hash>,
        /// Height of the block that referenced them.
        requested_by_height: BeaconHeight,
    },

    /// The best state was restored from the backup snapshot.
    BeaconStateReverted {
        /// Height before the revert.
        from_height: BeaconHeight,
        /// Height after the revert.
        to_height: BeaconHeight,
    },
}

impl BeaconEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::BeaconBlockInserted { .. } => EventTopic::BlockInsertion,
            Self::CommitteeChanged { .. } => EventTopic::Committee,
            Self::SyncRequested { .. } => EventTopic::Sync,
            Self::BeaconStateReverted { .. } => EventTopic::Revert,
        }
    }

    /// Beacon height the event refers to.
    #[must_use]
    pub fn height(&self) -> BeaconHeight {
        match self {
            Self::BeaconBlockInserted { height, .. } | Self::CommitteeChanged { height, .. } => {
                *height
            }
            Self::SyncRequested {
                requested_by_height,
                ..
            } => *requested_by_height,
            Self::BeaconStateReverted { to_height, .. } => *to_height,
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Block commits.
    BlockInsertion,
    /// Committee topology changes.
    Committee,
    /// Sync requests for missing ancestors.
    Sync,
    /// Best-state reverts.
    Revert,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &BeaconEvent) -> bool {
        self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inserted(height: u64) -> BeaconEvent {
        BeaconEvent::BeaconBlockInserted {
            height,
            block_hash: [height as u8; 32],
            epoch: 1,
        }
    }

    #[test]
    fn test_event_topic_mapping() {
        assert_eq!(inserted(2).topic(), EventTopic::BlockInsertion);
        let change = BeaconEvent::CommitteeChanged {
            height: 3,
            beacon_changed: true,
            changed_shards: vec![],
        };
        assert_eq!(change.topic(), EventTopic::Committee);
        assert_eq!(change.height(), 3);
    }

    #[test]
    fn test_filter_all() {
        assert!(EventFilter::all().matches(&inserted(2)));
    }

    #[test]
    fn test_filter_by_topic() {
        let filter = EventFilter::topics(vec![EventTopic::Sync]);
        assert!(!filter.matches(&inserted(2)));

        let sync = BeaconEvent::SyncRequested {
            missing_hashes: vec![[9u8; 32]],
            requested_by_height: 5,
        };
        assert!(filter.matches(&sync));
    }

    #[test]
    fn test_revert_height_is_target() {
        let event = BeaconEvent::BeaconStateReverted {
            from_height: 10,
            to_height: 9,
        };
        assert_eq!(event.height(), 9);
        assert_eq!(event.topic(), EventTopic::Revert);
    }
}
