//! Peer registrars as seen by the local registrar.

use std::fmt;

use serde::Serialize;

use super::checksum::ChecksumAccumulator;
use super::identifier::{RegistrarId, TimeStamp};
use super::transport::TransportAddressBlock;

bitflags::bitflags! {
    /// How a peer entry came into the list.
    ///
    /// A configured entry carries no bits ([`PeerFlags::STATIC`]).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct PeerFlags: u32 {
        /// Configured entry.
        const STATIC = 0;
        /// Learned at run time.
        const DYNAMIC = 1 << 0;
        /// Announced by another peer.
        const FROM_PEER = 1 << 1;
        /// Heard via multicast announce.
        const MULTICAST = 1 << 2;
        /// The last registration created the entry.
        const NEW = 1 << 15;
    }
}

bitflags::bitflags! {
    /// Synchronization state of a peer.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct PeerStatus: u32 {
        /// Peer list synchronization in progress.
        const LIST_SYNC = 1 << 0;
        /// Handle table synchronization in progress.
        const HT_SYNC = 1 << 1;
        /// The peer acts as this registrar's mentor.
        const MENTOR = 1 << 2;
    }
}

impl PeerFlags {
    /// Returns `true` for dynamically learned entries.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        self.contains(Self::DYNAMIC)
    }
}

/// Reason for a peer's pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerTimerCode {
    /// No announce was heard for too long.
    MaxTimeLastHeard = 3000,
    /// A request to the peer went unanswered.
    MaxTimeNoResponse = 3001,
    /// A takeover of the peer expires.
    TakeoverExpiry = 3002,
}

/// Pending timer of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerTimer {
    /// Why the timer was started.
    pub code: PeerTimerCode,
    /// When the timer fires.
    pub time_stamp: TimeStamp,
}

/// Index key of a peer entry.
///
/// Entries with a defined identifier are unique by identifier; entries
/// without one are told apart by their address block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerKey {
    identifier: RegistrarId,
    address: Option<TransportAddressBlock>,
}

impl PeerKey {
    /// Builds the key of a peer with `identifier` reachable at `address`.
    #[must_use]
    pub fn new(identifier: RegistrarId, address: Option<&TransportAddressBlock>) -> Self {
        let address = if identifier.is_undefined() {
            address.cloned()
        } else {
            None
        };
        Self {
            identifier,
            address,
        }
    }

    /// Peer identifier.
    #[must_use]
    pub const fn identifier(&self) -> RegistrarId {
        self.identifier
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{} [{address}]", self.identifier),
            None => write!(f, "{}", self.identifier),
        }
    }
}

/// One peer registrar.
#[derive(Debug, Clone, Serialize)]
pub struct PeerListNode {
    pub(crate) identifier: RegistrarId,
    pub(crate) flags: PeerFlags,
    pub(crate) last_update_time_stamp: TimeStamp,
    pub(crate) timer: Option<PeerTimer>,
    pub(crate) ownership_checksum: ChecksumAccumulator,
    pub(crate) status: PeerStatus,
    pub(crate) takeover_registrar: RegistrarId,
    pub(crate) address_block: TransportAddressBlock,
    pub(crate) user_data: Option<u64>,
}

impl PeerListNode {
    /// Creates an unlinked peer entry.
    #[must_use]
    pub const fn new(
        identifier: RegistrarId,
        flags: PeerFlags,
        address_block: TransportAddressBlock,
    ) -> Self {
        Self {
            identifier,
            flags,
            last_update_time_stamp: 0,
            timer: None,
            ownership_checksum: ChecksumAccumulator::INITIAL,
            status: PeerStatus::empty(),
            takeover_registrar: RegistrarId::UNDEFINED,
            address_block,
            user_data: None,
        }
    }

    /// Peer identifier; undefined for configured entries not yet heard from.
    #[must_use]
    pub const fn identifier(&self) -> RegistrarId {
        self.identifier
    }

    /// Entry flags.
    #[must_use]
    pub const fn flags(&self) -> PeerFlags {
        self.flags
    }

    /// Time of the last registration.
    #[must_use]
    pub const fn last_update_time_stamp(&self) -> TimeStamp {
        self.last_update_time_stamp
    }

    /// Pending timer.
    #[must_use]
    pub const fn timer(&self) -> Option<PeerTimer> {
        self.timer
    }

    /// Unfolded checksum over the elements the peer owns.
    #[must_use]
    pub const fn ownership_checksum_accumulator(&self) -> ChecksumAccumulator {
        self.ownership_checksum
    }

    /// Finished checksum over the elements the peer owns.
    #[must_use]
    pub const fn ownership_checksum(&self) -> u16 {
        self.ownership_checksum.finish()
    }

    /// Synchronization state.
    #[must_use]
    pub const fn status(&self) -> PeerStatus {
        self.status
    }

    /// Replaces the synchronization state.
    pub fn set_status(&mut self, status: PeerStatus) {
        self.status = status;
    }

    /// Registrar currently taking this peer over, if any.
    #[must_use]
    pub const fn takeover_registrar(&self) -> RegistrarId {
        self.takeover_registrar
    }

    /// Records which registrar takes this peer over.
    pub fn set_takeover_registrar(&mut self, registrar: RegistrarId) {
        self.takeover_registrar = registrar;
    }

    /// Transport addresses of the peer.
    #[must_use]
    pub const fn address_block(&self) -> &TransportAddressBlock {
        &self.address_block
    }

    /// Opaque caller cookie.
    #[must_use]
    pub const fn user_data(&self) -> Option<u64> {
        self.user_data
    }

    /// Replaces the caller cookie.
    pub fn set_user_data(&mut self, user_data: Option<u64>) {
        self.user_data = user_data;
    }

    /// Index key of this entry.
    #[must_use]
    pub fn key(&self) -> PeerKey {
        PeerKey::new(self.identifier, Some(&self.address_block))
    }

    /// Takes over the flags of a re-registration.
    pub fn update(&mut self, source: &Self) {
        self.flags = source.flags;
    }
}

impl fmt::Display for PeerListNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} upd={} chsum=${:04x} flags=",
            self.identifier,
            self.last_update_time_stamp,
            self.ownership_checksum()
        )?;
        if self.flags.contains(PeerFlags::NEW) {
            f.write_str("[new]")?;
        }
        f.write_str(if self.flags.is_dynamic() { "[dynamic]" } else { "(static)" })?;
        if self.flags.contains(PeerFlags::FROM_PEER) {
            f.write_str("[fromPeer]")?;
        }
        let states = [
            (PeerStatus::LIST_SYNC, " LISTSYNC"),
            (PeerStatus::HT_SYNC, " HTSYNC"),
            (PeerStatus::MENTOR, " MENTOR"),
        ];
        for (bit, label) in states {
            if self.status.contains(bit) {
                f.write_str(label)?;
            }
        }
        if !self.takeover_registrar.is_undefined() {
            write!(f, " TAKEOVER({})", self.takeover_registrar)?;
        }
        write!(f, " [{}]", self.address_block)
    }
}
