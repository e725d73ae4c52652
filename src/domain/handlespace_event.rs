//! Handlespace notifications and the domain events derived from them.
//!
//! Every change of a pool element's checksum contribution is recorded as a
//! [`PoolElementUpdate`] in the handlespace outbox. The registrar core
//! drains the outbox, feeds the updates into the peer list's ownership
//! checksums and republishes them as [`HandlespaceEvent`]s on the
//! [`super::EventBus`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::checksum::ChecksumAccumulator;
use super::handlespace::ElementKey;
use super::identifier::{PoolElementId, RegistrarId};
use super::policy::PolicyType;
use super::pool_handle::PoolHandle;

/// Kind of change recorded in a [`PoolElementUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    /// A pool element was added.
    Create,
    /// An existing pool element was re-registered.
    Update,
    /// A pool element was removed.
    Delete,
}

/// Checksum-relevant change of one pool element.
///
/// For [`UpdateAction::Update`], `pre_checksum` and `pre_home` carry the
/// contribution that was replaced; for the other actions they are the
/// initial checksum and the undefined registrar (create) or equal to the
/// current values (delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolElementUpdate {
    /// What happened.
    pub action: UpdateAction,
    /// Affected element.
    pub key: ElementKey,
    /// Home registrar after the change.
    pub home: RegistrarId,
    /// Checksum contribution after the change.
    pub checksum: ChecksumAccumulator,
    /// Checksum contribution before the change.
    pub pre_checksum: ChecksumAccumulator,
    /// Home registrar before the change.
    pub pre_home: RegistrarId,
}

/// Domain event emitted after every handlespace mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum HandlespaceEvent {
    /// A pool element was registered for the first time.
    PoolElementCreated {
        /// Pool handle.
        handle: PoolHandle,
        /// Pool element identifier.
        id: PoolElementId,
        /// Owning registrar.
        home: RegistrarId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An existing pool element was re-registered.
    PoolElementUpdated {
        /// Pool handle.
        handle: PoolHandle,
        /// Pool element identifier.
        id: PoolElementId,
        /// Owning registrar after the update.
        home: RegistrarId,
        /// Owning registrar before the update.
        pre_home: RegistrarId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A pool element was deregistered or expired.
    PoolElementRemoved {
        /// Pool handle.
        handle: PoolHandle,
        /// Pool element identifier.
        id: PoolElementId,
        /// Owning registrar.
        home: RegistrarId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A pool was created by its first registration.
    PoolCreated {
        /// Pool handle.
        handle: PoolHandle,
        /// Pool policy.
        policy: PolicyType,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The last element of a pool left.
    PoolRemoved {
        /// Pool handle.
        handle: PoolHandle,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A peer registrar joined or refreshed its peer list entry.
    PeerRegistered {
        /// Peer identifier.
        registrar: RegistrarId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A peer registrar was removed from the peer list.
    PeerRemoved {
        /// Peer identifier.
        registrar: RegistrarId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A takeover of a failed registrar started.
    TakeoverCreated {
        /// Registrar being taken over.
        target: RegistrarId,
        /// Peers whose acknowledgement is still required.
        outstanding: usize,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A takeover process was acknowledged by all peers or expired.
    TakeoverCompleted {
        /// Registrar that was taken over.
        target: RegistrarId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl HandlespaceEvent {
    /// Builds the pool element event for a handlespace notification.
    #[must_use]
    pub fn from_update(update: &PoolElementUpdate, timestamp: DateTime<Utc>) -> Self {
        let handle = update.key.handle.clone();
        let id = update.key.id;
        match update.action {
            UpdateAction::Create => Self::PoolElementCreated {
                handle,
                id,
                home: update.home,
                timestamp,
            },
            UpdateAction::Update => Self::PoolElementUpdated {
                handle,
                id,
                home: update.home,
                pre_home: update.pre_home,
                timestamp,
            },
            UpdateAction::Delete => Self::PoolElementRemoved {
                handle,
                id,
                home: update.home,
                timestamp,
            },
        }
    }

    /// Returns the pool handle for pool and pool element events.
    #[must_use]
    pub const fn handle(&self) -> Option<&PoolHandle> {
        match self {
            Self::PoolElementCreated { handle, .. }
            | Self::PoolElementUpdated { handle, .. }
            | Self::PoolElementRemoved { handle, .. }
            | Self::PoolCreated { handle, .. }
            | Self::PoolRemoved { handle, .. } => Some(handle),
            Self::PeerRegistered { .. }
            | Self::PeerRemoved { .. }
            | Self::TakeoverCreated { .. }
            | Self::TakeoverCompleted { .. } => None,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::PoolElementCreated { .. } => "pool_element_created",
            Self::PoolElementUpdated { .. } => "pool_element_updated",
            Self::PoolElementRemoved { .. } => "pool_element_removed",
            Self::PoolCreated { .. } => "pool_created",
            Self::PoolRemoved { .. } => "pool_removed",
            Self::PeerRegistered { .. } => "peer_registered",
            Self::PeerRemoved { .. } => "peer_removed",
            Self::TakeoverCreated { .. } => "takeover_created",
            Self::TakeoverCompleted { .. } => "takeover_completed",
        }
    }
}
