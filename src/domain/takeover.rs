//! Takeover processes for failed peer registrars.
//!
//! When a registrar decides to take over a silent peer, every other known
//! peer has to acknowledge before the takeover may complete. A
//! [`TakeoverProcess`] tracks the outstanding acknowledgements; the
//! [`TakeoverProcessList`] indexes the processes by target and by expiry.

use std::fmt;

use serde::Serialize;

use super::identifier::{RegistrarId, TIMER_INFINITE, TimeStamp};
use super::peer_list::PeerList;
use crate::error::HandlespaceError;
use crate::index::OrderedIndex;

/// Pending takeover of one target registrar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TakeoverProcess {
    target: RegistrarId,
    expiry_time_stamp: TimeStamp,
    outstanding: Vec<RegistrarId>,
}

impl TakeoverProcess {
    /// Registrar being taken over.
    #[must_use]
    pub const fn target(&self) -> RegistrarId {
        self.target
    }

    /// Time at which the process gives up.
    #[must_use]
    pub const fn expiry_time_stamp(&self) -> TimeStamp {
        self.expiry_time_stamp
    }

    /// Peers that have not acknowledged yet.
    #[must_use]
    pub fn outstanding(&self) -> &[RegistrarId] {
        &self.outstanding
    }

    /// Number of missing acknowledgements.
    #[must_use]
    pub fn outstanding_acknowledgements(&self) -> usize {
        self.outstanding.len()
    }

    /// Returns `true` once every peer acknowledged.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    fn acknowledge(&mut self, acknowledger: RegistrarId) -> bool {
        let before = self.outstanding.len();
        self.outstanding.retain(|peer| *peer != acknowledger);
        self.outstanding.len() != before
    }
}

impl fmt::Display for TakeoverProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Takeover of {} (expiry {}): {} outstanding",
            self.target,
            self.expiry_time_stamp,
            self.outstanding.len()
        )
    }
}

/// All takeover processes of the local registrar.
#[derive(Debug, Default)]
pub struct TakeoverProcessList {
    index: OrderedIndex<RegistrarId, TakeoverProcess>,
    timers: OrderedIndex<(TimeStamp, RegistrarId), ()>,
}

impl TakeoverProcessList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            index: OrderedIndex::new(),
            timers: OrderedIndex::new(),
        }
    }

    /// Number of processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if no takeover is running.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Starts a takeover of `target`, expecting an acknowledgement from
    /// every peer in `peers` except the target and the own registrar.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::DuplicateId`] if a takeover of `target`
    /// is already running.
    ///
    /// # Panics
    ///
    /// Panics if `target` is undefined or the own identifier.
    pub fn create(
        &mut self,
        target: RegistrarId,
        peers: &PeerList,
        expiry_time_stamp: TimeStamp,
    ) -> Result<&TakeoverProcess, HandlespaceError> {
        assert!(!target.is_undefined(), "takeover target must be defined");
        assert!(target != peers.own_identifier(), "a registrar cannot take itself over");
        if self.index.contains(&target) {
            return Err(HandlespaceError::DuplicateId);
        }

        let own = peers.own_identifier();
        let outstanding = peers
            .peers()
            .map(super::peer::PeerListNode::identifier)
            .filter(|id| *id != target && *id != own && !id.is_undefined())
            .collect();
        let process = TakeoverProcess {
            target,
            expiry_time_stamp,
            outstanding,
        };
        if self.index.insert(target, process, 0).is_err() {
            return Err(HandlespaceError::DuplicateId);
        }
        let timed = self.timers.insert((expiry_time_stamp, target), (), 0).is_ok();
        debug_assert!(timed, "expiry of takeover {target} already indexed");
        self.index.find(&target).ok_or(HandlespaceError::NotFound)
    }

    /// Records the acknowledgement of `acknowledger` for the takeover of
    /// `target`.
    ///
    /// Returns the process if the acknowledger was still outstanding.
    pub fn acknowledge(
        &mut self,
        target: RegistrarId,
        acknowledger: RegistrarId,
    ) -> Option<&TakeoverProcess> {
        let process = self.index.find_mut(&target)?;
        if process.acknowledge(acknowledger) {
            return Some(process);
        }
        None
    }

    /// Looks up the takeover of `target`.
    #[must_use]
    pub fn find(&self, target: RegistrarId) -> Option<&TakeoverProcess> {
        self.index.find(&target)
    }

    /// Process with the lowest target.
    #[must_use]
    pub fn first(&self) -> Option<&TakeoverProcess> {
        self.index.first().map(|(_, process)| process)
    }

    /// Process with the highest target.
    #[must_use]
    pub fn last(&self) -> Option<&TakeoverProcess> {
        self.index.last().map(|(_, process)| process)
    }

    /// Process following `target` in target order.
    #[must_use]
    pub fn next(&self, target: RegistrarId) -> Option<&TakeoverProcess> {
        self.index.next(&target).map(|(_, process)| process)
    }

    /// Process preceding `target` in target order.
    #[must_use]
    pub fn prev(&self, target: RegistrarId) -> Option<&TakeoverProcess> {
        self.index.prev(&target).map(|(_, process)| process)
    }

    /// Process that expires first.
    #[must_use]
    pub fn earliest(&self) -> Option<&TakeoverProcess> {
        self.timers
            .first()
            .and_then(|((_, target), ())| self.index.find(target))
    }

    /// Expiry of the earliest process, or [`TIMER_INFINITE`].
    #[must_use]
    pub fn next_timer_time_stamp(&self) -> TimeStamp {
        self.timers
            .first()
            .map_or(TIMER_INFINITE, |((time_stamp, _), ())| *time_stamp)
    }

    /// Removes the takeover of `target`.
    pub fn remove(&mut self, target: RegistrarId) -> Option<TakeoverProcess> {
        let (process, _) = self.index.remove(&target)?;
        self.timers.remove(&(process.expiry_time_stamp, target));
        Some(process)
    }

    /// Checks both indices against each other.
    ///
    /// # Errors
    ///
    /// Describes the first inconsistency found.
    pub fn verify(&self) -> Result<(), String> {
        if self.index.len() != self.timers.len() {
            return Err(format!(
                "takeovers: {} indexed, {} timed",
                self.index.len(),
                self.timers.len()
            ));
        }
        for (target, process) in self.index.iter() {
            if !self.timers.contains(&(process.expiry_time_stamp, *target)) {
                return Err(format!("expiry of takeover {target} is not indexed"));
            }
        }
        if !self.index.verify() || !self.timers.verify() {
            return Err("takeover list structure corrupt".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::peer::tests::peer_address;
    use crate::domain::peer::{PeerFlags, PeerListNode};

    const OWN: RegistrarId = RegistrarId::new(1);

    fn peers(ids: &[u32]) -> PeerList {
        let mut list = PeerList::new(OWN);
        for (octet, id) in (1_u8..).zip(ids) {
            let node = PeerListNode::new(RegistrarId::new(*id), PeerFlags::DYNAMIC, peer_address(octet));
            let Ok(_) = list.add(node) else {
                panic!("peer {id} must be added");
            };
        }
        let configured = PeerListNode::new(RegistrarId::UNDEFINED, PeerFlags::STATIC, peer_address(200));
        let Ok(_) = list.add(configured) else {
            panic!("static peer must be added");
        };
        list
    }

    #[test]
    fn create_waits_for_every_other_peer() {
        let list = peers(&[2, 3, 4]);
        let mut takeovers = TakeoverProcessList::new();
        let Ok(process) = takeovers.create(RegistrarId::new(3), &list, 1_000) else {
            panic!("takeover must start");
        };
        assert_eq!(process.outstanding(), &[RegistrarId::new(2), RegistrarId::new(4)]);
        assert_eq!(
            takeovers.create(RegistrarId::new(3), &list, 2_000).err(),
            Some(HandlespaceError::DuplicateId)
        );
        assert_eq!(takeovers.len(), 1);
    }

    #[test]
    fn acknowledgements_count_down() {
        let list = peers(&[2, 3, 4]);
        let mut takeovers = TakeoverProcessList::new();
        let target = RegistrarId::new(4);
        assert!(takeovers.create(target, &list, 1_000).is_ok());

        let Some(process) = takeovers.acknowledge(target, RegistrarId::new(2)) else {
            panic!("peer 2 was outstanding");
        };
        assert_eq!(process.outstanding_acknowledgements(), 1);
        assert!(takeovers.acknowledge(target, RegistrarId::new(2)).is_none());
        assert!(takeovers.acknowledge(target, RegistrarId::new(9)).is_none());
        let Some(process) = takeovers.acknowledge(target, RegistrarId::new(3)) else {
            panic!("peer 3 was outstanding");
        };
        assert!(process.is_complete());
        assert!(takeovers.remove(target).is_some());
        assert!(takeovers.is_empty());
        assert!(takeovers.verify().is_ok());
    }

    #[test]
    fn earliest_follows_expiry_not_target() {
        let list = peers(&[2, 3, 4]);
        let mut takeovers = TakeoverProcessList::new();
        assert!(takeovers.create(RegistrarId::new(2), &list, 900).is_ok());
        assert!(takeovers.create(RegistrarId::new(4), &list, 300).is_ok());
        assert_eq!(takeovers.next_timer_time_stamp(), 300);
        assert_eq!(takeovers.earliest().map(TakeoverProcess::target), Some(RegistrarId::new(4)));
        assert_eq!(takeovers.first().map(TakeoverProcess::target), Some(RegistrarId::new(2)));
        assert_eq!(takeovers.last().map(TakeoverProcess::target), Some(RegistrarId::new(4)));
        assert_eq!(
            takeovers.next(RegistrarId::new(2)).map(TakeoverProcess::target),
            Some(RegistrarId::new(4))
        );
        assert!(takeovers.prev(RegistrarId::new(2)).is_none());
        assert!(takeovers.verify().is_ok());
        assert!(takeovers.remove(RegistrarId::new(4)).is_some());
        assert_eq!(takeovers.next_timer_time_stamp(), 900);
    }
}
