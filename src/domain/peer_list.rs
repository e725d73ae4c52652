//! The peer list: every known peer registrar, indexed by identity and by
//! pending timer.

use std::fmt;

use rand::RngCore;

use super::identifier::{RegistrarId, TIMER_INFINITE, TimeStamp};
use super::peer::{PeerFlags, PeerKey, PeerListNode, PeerTimer, PeerTimerCode};
use super::transport::TransportAddressBlock;
use crate::error::HandlespaceError;
use crate::index::OrderedIndex;

/// Rejected insertion; the candidate is handed back.
#[derive(Debug)]
pub struct PeerRejected {
    /// Why the candidate was rejected.
    pub error: HandlespaceError,
    /// The untouched candidate.
    pub node: Box<PeerListNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PeerTimerKey {
    time_stamp: TimeStamp,
    peer: PeerKey,
}

/// Peer registrars known to the registrar `own_identifier`.
#[derive(Debug)]
pub struct PeerList {
    own_identifier: RegistrarId,
    index: OrderedIndex<PeerKey, PeerListNode>,
    timers: OrderedIndex<PeerTimerKey, ()>,
}

impl PeerList {
    /// Creates an empty peer list.
    #[must_use]
    pub const fn new(own_identifier: RegistrarId) -> Self {
        Self {
            own_identifier,
            index: OrderedIndex::new(),
            timers: OrderedIndex::new(),
        }
    }

    /// Identifier of the owning registrar.
    #[must_use]
    pub const fn own_identifier(&self) -> RegistrarId {
        self.own_identifier
    }

    /// Number of peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if no peer is known.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of running peer timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Peers in key order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerListNode> {
        self.index.iter().map(|(_, node)| node)
    }

    /// Checks whether `node` may be stored.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::OwnId`] for the registrar's own identifier.
    pub fn check_compatibility(&self, node: &PeerListNode) -> Result<(), HandlespaceError> {
        if !self.own_identifier.is_undefined() && node.identifier == self.own_identifier {
            return Err(HandlespaceError::OwnId);
        }
        Ok(())
    }

    /// Inserts a new peer with selection weight 1.
    ///
    /// # Errors
    ///
    /// Rejects the own identifier with `OwnId` and an existing key with
    /// `DuplicateId`; the candidate is returned in both cases.
    pub fn add(&mut self, node: PeerListNode) -> Result<PeerKey, PeerRejected> {
        if let Err(error) = self.check_compatibility(&node) {
            return Err(PeerRejected {
                error,
                node: Box::new(node),
            });
        }
        let key = node.key();
        self.index
            .insert(key.clone(), node, 1)
            .map(|()| key)
            .map_err(|(_, node)| PeerRejected {
                error: HandlespaceError::DuplicateId,
                node: Box::new(node),
            })
    }

    /// Applies `source` to the stored peer `key` and clears its `NEW` flag.
    ///
    /// The entry is re-keyed when the identifier changes. Returns the key
    /// the entry is stored under afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::OwnId`] if `source` carries the own
    /// identifier, [`HandlespaceError::NotFound`] for an unknown key and
    /// [`HandlespaceError::DuplicateId`] if the new identifier is taken.
    pub fn update(
        &mut self,
        key: &PeerKey,
        source: &PeerListNode,
    ) -> Result<PeerKey, HandlespaceError> {
        self.check_compatibility(source)?;
        let current = self.index.find(key).ok_or(HandlespaceError::NotFound)?;

        let mut new_key = key.clone();
        if current.identifier != source.identifier {
            new_key = PeerKey::new(source.identifier, Some(&current.address_block));
            if self.index.contains(&new_key) {
                return Err(HandlespaceError::DuplicateId);
            }
            let timer = current.timer;
            if let Some(timer) = timer {
                self.timers.remove(&timer_key(key, timer.time_stamp));
            }
            let Some((mut node, _)) = self.index.remove(key) else {
                return Err(HandlespaceError::NotFound);
            };
            node.identifier = source.identifier;
            let relinked = self.index.insert(new_key.clone(), node, 1).is_ok();
            debug_assert!(relinked, "peer {new_key} appeared during re-keying");
            if let Some(timer) = timer {
                let relinked = self.timers.insert(timer_key(&new_key, timer.time_stamp), (), 0);
                debug_assert!(relinked.is_ok(), "timer of {new_key} already present");
            }
        }
        if let Some(node) = self.index.find_mut(&new_key) {
            node.update(source);
            node.flags.remove(PeerFlags::NEW);
        }
        Ok(new_key)
    }

    /// Inserts `node` or, if its key exists, updates the stored entry.
    ///
    /// Returns the key and `true` when the entry was created; a created
    /// entry carries [`PeerFlags::NEW`].
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::OwnId`] for the own identifier.
    pub fn add_or_update(
        &mut self,
        node: PeerListNode,
    ) -> Result<(PeerKey, bool), HandlespaceError> {
        match self.add(node) {
            Ok(key) => {
                if let Some(node) = self.index.find_mut(&key) {
                    node.flags.insert(PeerFlags::NEW);
                }
                Ok((key, true))
            }
            Err(PeerRejected {
                error: HandlespaceError::DuplicateId,
                node,
            }) => {
                let key = node.key();
                self.update(&key, &node).map(|key| (key, false))
            }
            Err(rejected) => Err(rejected.error),
        }
    }

    /// Looks up a peer by identifier or, for an undefined identifier, by
    /// the first entry whose addresses overlap `address`.
    #[must_use]
    pub fn find(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<&PeerListNode> {
        self.find_key(identifier, address)
            .and_then(|key| self.index.find(&key))
    }

    /// Key of the entry [`find`](Self::find) would return.
    #[must_use]
    pub fn find_key(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<PeerKey> {
        if !identifier.is_undefined() {
            let key = PeerKey::new(identifier, None);
            return self.index.contains(&key).then_some(key);
        }
        let address = address?;
        self.index
            .iter()
            .find(|(_, node)| node.address_block.overlaps(address))
            .map(|(key, _)| key.clone())
    }

    /// Looks up a peer by key.
    #[must_use]
    pub fn get(&self, key: &PeerKey) -> Option<&PeerListNode> {
        self.index.find(key)
    }

    /// Looks up a peer by key for changes of its caller-owned fields.
    pub fn get_mut(&mut self, key: &PeerKey) -> Option<&mut PeerListNode> {
        self.index.find_mut(key)
    }

    /// Entry strictly before `(identifier, address)` in key order.
    #[must_use]
    pub fn find_nearest_prev(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<&PeerListNode> {
        self.index
            .nearest_prev(&PeerKey::new(identifier, address))
            .map(|(_, node)| node)
    }

    /// Entry strictly after `(identifier, address)` in key order.
    #[must_use]
    pub fn find_nearest_next(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<&PeerListNode> {
        self.index
            .nearest_next(&PeerKey::new(identifier, address))
            .map(|(_, node)| node)
    }

    /// Unlinks a peer and its timer.
    pub fn remove(&mut self, key: &PeerKey) -> Option<PeerListNode> {
        let (mut node, _) = self.index.remove(key)?;
        if let Some(timer) = node.timer.take() {
            self.timers.remove(&timer_key(key, timer.time_stamp));
        }
        Some(node)
    }

    /// Draws a peer uniformly at random.
    pub fn get_random<R: RngCore + ?Sized>(&self, rng: &mut R) -> Option<&PeerListNode> {
        let sum = self.index.value_sum();
        if sum < 1 {
            return None;
        }
        self.index
            .node_by_value(rng.next_u64() % sum)
            .map(|(_, node)| node)
    }

    /// Starts a timer for a peer.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown peer.
    ///
    /// # Panics
    ///
    /// Panics if the peer's timer is already running.
    pub fn activate_timer(
        &mut self,
        key: &PeerKey,
        code: PeerTimerCode,
        time_stamp: TimeStamp,
    ) -> Result<(), HandlespaceError> {
        let node = self.index.find_mut(key).ok_or(HandlespaceError::NotFound)?;
        assert!(node.timer.is_none(), "timer of peer {key} is already running");
        node.timer = Some(PeerTimer { code, time_stamp });
        let linked = self.timers.insert(timer_key(key, time_stamp), (), 0).is_ok();
        debug_assert!(linked, "timer entry of peer {key} already present");
        Ok(())
    }

    /// Stops a peer's timer; a stopped timer is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown peer.
    pub fn deactivate_timer(&mut self, key: &PeerKey) -> Result<(), HandlespaceError> {
        let node = self.index.find_mut(key).ok_or(HandlespaceError::NotFound)?;
        if let Some(timer) = node.timer.take() {
            self.timers.remove(&timer_key(key, timer.time_stamp));
        }
        Ok(())
    }

    /// Earliest peer timer and the peer it belongs to.
    #[must_use]
    pub fn first_timer(&self) -> Option<(TimeStamp, PeerKey)> {
        self.timers
            .first()
            .map(|(key, ())| (key.time_stamp, key.peer.clone()))
    }

    /// Keys of the peers whose timer fired at or before `now`, earliest first.
    #[must_use]
    pub fn expired(&self, now: TimeStamp) -> Vec<PeerKey> {
        self.timers
            .iter()
            .take_while(|(key, ())| key.time_stamp <= now)
            .map(|(key, ())| key.peer.clone())
            .collect()
    }

    /// Time stamp of the earliest peer timer, or [`TIMER_INFINITE`].
    #[must_use]
    pub fn next_timer_time_stamp(&self) -> TimeStamp {
        self.timers
            .first()
            .map_or(TIMER_INFINITE, |(key, ())| key.time_stamp)
    }

    /// Checks both indices against the entries.
    ///
    /// # Errors
    ///
    /// Describes the first inconsistency found.
    pub fn verify(&self) -> Result<(), String> {
        let mut timers = 0_usize;
        for (key, node) in self.index.iter() {
            if *key != node.key() {
                return Err(format!("peer {} stored under {key}", node.key()));
            }
            if !self.own_identifier.is_undefined() && node.identifier == self.own_identifier {
                return Err(format!("own identifier {} in peer list", self.own_identifier));
            }
            if let Some(timer) = node.timer {
                timers += 1;
                if !self.timers.contains(&timer_key(key, timer.time_stamp)) {
                    return Err(format!("timer of peer {key} is not indexed"));
                }
            }
        }
        if timers != self.timers.len() {
            return Err(format!(
                "peer timers: found {timers}, stored {}",
                self.timers.len()
            ));
        }
        if !self.index.verify() || !self.timers.verify() {
            return Err("peer list structure corrupt".to_owned());
        }
        Ok(())
    }

    /// Removes every peer, calling `disposer` once per entry.
    pub fn clear(&mut self, mut disposer: impl FnMut(&PeerListNode)) {
        self.timers.clear();
        while let Some((_, mut node)) = self.index.pop_first() {
            node.timer = None;
            disposer(&node);
        }
    }
}

impl fmt::Display for PeerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PeerList of {} ({} peers)", self.own_identifier, self.len())?;
        for (position, node) in self.peers().enumerate() {
            writeln!(f, "   - idx:#{:04}: {node}", position + 1)?;
        }
        Ok(())
    }
}

fn timer_key(peer: &PeerKey, time_stamp: TimeStamp) -> PeerTimerKey {
    PeerTimerKey {
        time_stamp,
        peer: peer.clone(),
    }
}
