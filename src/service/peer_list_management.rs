//! Peer list management: registration of peer registrars, expiry and the
//! per-peer ownership checksums.

use std::fmt;

use rand::RngCore;

use crate::domain::{
    ChecksumAccumulator, HandlespaceNode, PeerFlags, PeerKey, PeerList, PeerListNode,
    PeerRejected, PeerTimerCode, PoolElementId, PoolElementUpdate, RegistrarId, TimeStamp,
    TransportAddressBlock, UpdateAction,
};
use crate::error::HandlespaceError;

/// Called once for every peer entry removed from the list.
pub type PeerDisposer = Box<dyn FnMut(&PeerListNode) + Send>;

/// Peer list plus limit and disposer.
pub struct PeerListManagement {
    list: PeerList,
    max_peers: usize,
    disposer: PeerDisposer,
}

impl fmt::Debug for PeerListManagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerListManagement")
            .field("list", &self.list)
            .field("max_peers", &self.max_peers)
            .finish_non_exhaustive()
    }
}

impl PeerListManagement {
    /// Creates an empty peer list for `own_identifier`; `max_peers` of 0
    /// means unlimited.
    #[must_use]
    pub fn new(own_identifier: RegistrarId, max_peers: usize) -> Self {
        Self {
            list: PeerList::new(own_identifier),
            max_peers,
            disposer: Box::new(|_: &PeerListNode| {}),
        }
    }

    /// Installs the disposer for removed entries.
    #[must_use]
    pub fn with_disposer(mut self, disposer: PeerDisposer) -> Self {
        self.disposer = disposer;
        self
    }

    /// The managed list.
    #[must_use]
    pub const fn list(&self) -> &PeerList {
        &self.list
    }

    /// Number of peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.list.len()
    }

    /// Registers a peer or refreshes its entry.
    ///
    /// A dynamic registration that matches a configured (static) entry by
    /// identifier or by overlapping addresses fills in the identifier of
    /// that entry instead of creating a new one. When `handlespace` is
    /// given, the entry's ownership checksum is recomputed from it.
    ///
    /// # Errors
    ///
    /// * [`HandlespaceError::InvalidId`] for a dynamic registration without
    ///   identifier or a static one with identifier.
    /// * [`HandlespaceError::OutOfResources`] when a new entry would exceed
    ///   the configured maximum.
    /// * [`HandlespaceError::OwnId`] for the own identifier.
    pub fn register_peer(
        &mut self,
        identifier: RegistrarId,
        flags: PeerFlags,
        address: &TransportAddressBlock,
        now: TimeStamp,
        handlespace: Option<&HandlespaceNode>,
    ) -> Result<PeerKey, HandlespaceError> {
        if flags.is_dynamic() {
            if identifier.is_undefined() {
                return Err(HandlespaceError::InvalidId);
            }
            let configured = self
                .list
                .find_key(identifier, None)
                .or_else(|| self.list.find_key(RegistrarId::UNDEFINED, Some(address)))
                .filter(|key| {
                    self.list
                        .get(key)
                        .is_some_and(|node| !node.flags().is_dynamic())
                });
            if let Some(key) = configured {
                return self.complete_configured_peer(&key, identifier, handlespace);
            }
        } else if !identifier.is_undefined() {
            return Err(HandlespaceError::InvalidId);
        }

        let key = PeerKey::new(identifier, Some(address));
        if self.list.get(&key).is_none()
            && self.max_peers != 0
            && self.list.len() >= self.max_peers
        {
            tracing::warn!(peer = %key, max = self.max_peers, "peer limit reached");
            return Err(HandlespaceError::OutOfResources);
        }

        let (key, created) = self
            .list
            .add_or_update(PeerListNode::new(identifier, flags, address.clone()))
            .inspect_err(|error| tracing::warn!(peer = %key, %error, "peer registration rejected"))?;
        if let Some(node) = self.list.get_mut(&key) {
            node.last_update_time_stamp = now;
            node.address_block = address.clone();
            if let Some(handlespace) = handlespace {
                node.ownership_checksum = handlespace.compute_ownership_checksum(node.identifier);
            }
        }
        if created {
            tracing::info!(peer = %key, "peer registered");
        } else {
            tracing::debug!(peer = %key, "peer refreshed");
        }
        Ok(key)
    }

    fn complete_configured_peer(
        &mut self,
        key: &PeerKey,
        identifier: RegistrarId,
        handlespace: Option<&HandlespaceNode>,
    ) -> Result<PeerKey, HandlespaceError> {
        let (was_anonymous, flags, address) = match self.list.get(key) {
            Some(node) => (
                node.identifier().is_undefined(),
                node.flags(),
                node.address_block().clone(),
            ),
            None => return Err(HandlespaceError::NotFound),
        };
        let source = PeerListNode::new(identifier, flags, address);
        let key = self.list.update(key, &source)?;
        if let Some(node) = self.list.get_mut(&key) {
            if was_anonymous {
                node.flags.insert(PeerFlags::NEW);
            }
            if let Some(handlespace) = handlespace {
                node.ownership_checksum = handlespace.compute_ownership_checksum(identifier);
            }
        }
        tracing::info!(peer = %key, "configured peer identified");
        Ok(key)
    }

    /// Deregisters the peer found by identifier or address.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown peer.
    pub fn deregister_peer(
        &mut self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Result<(), HandlespaceError> {
        let key = self
            .list
            .find_key(identifier, address)
            .ok_or(HandlespaceError::NotFound)?;
        self.deregister_peer_by_key(&key)
    }

    /// Deregisters the peer at `key`.
    ///
    /// A configured entry that learned an identifier loses only the
    /// identifier; its flags, addresses and user data are kept.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown peer.
    pub fn deregister_peer_by_key(&mut self, key: &PeerKey) -> Result<(), HandlespaceError> {
        self.list.deactivate_timer(key)?;
        let node = self.list.remove(key).ok_or(HandlespaceError::NotFound)?;

        if !node.flags().is_dynamic() && !node.identifier().is_undefined() {
            let mut anonymous = PeerListNode::new(
                RegistrarId::UNDEFINED,
                node.flags(),
                node.address_block().clone(),
            );
            anonymous.user_data = node.user_data();
            match self.list.add(anonymous) {
                Ok(restored) => tracing::debug!(peer = %key, %restored, "configured peer reset"),
                Err(PeerRejected { error, node }) => {
                    tracing::warn!(peer = %key, %error, "configured peer dropped");
                    (self.disposer)(&node);
                }
            }
        } else {
            (self.disposer)(&node);
            tracing::debug!(peer = %key, "peer deregistered");
        }
        Ok(())
    }

    /// Looks up a peer by identifier or address.
    #[must_use]
    pub fn find_peer(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<&PeerListNode> {
        self.list.find(identifier, address)
    }

    /// Looks up a peer for changes of its caller-owned fields.
    pub fn find_peer_mut(
        &mut self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<&mut PeerListNode> {
        let key = self.list.find_key(identifier, address)?;
        self.list.get_mut(&key)
    }

    /// Peer strictly before the given position.
    #[must_use]
    pub fn find_nearest_prev_peer(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<&PeerListNode> {
        self.list.find_nearest_prev(identifier, address)
    }

    /// Peer strictly after the given position.
    #[must_use]
    pub fn find_nearest_next_peer(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Option<&PeerListNode> {
        self.list.find_nearest_next(identifier, address)
    }

    /// Uniformly drawn peer.
    pub fn get_random_peer<R: RngCore + ?Sized>(&self, rng: &mut R) -> Option<&PeerListNode> {
        self.list.get_random(rng)
    }

    /// Restarts the no-response timer of `key` at its last update plus
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown peer.
    pub fn restart_peer_expiry_timer(
        &mut self,
        key: &PeerKey,
        timeout: u64,
    ) -> Result<(), HandlespaceError> {
        self.list.deactivate_timer(key)?;
        let last_update = self
            .list
            .get(key)
            .map(PeerListNode::last_update_time_stamp)
            .ok_or(HandlespaceError::NotFound)?;
        self.list.activate_timer(
            key,
            PeerTimerCode::MaxTimeNoResponse,
            last_update.saturating_add(timeout),
        )
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
        self.list.activate_timer(key, code, time_stamp)
    }

    /// Stops a peer's timer.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown peer.
    pub fn deactivate_timer(&mut self, key: &PeerKey) -> Result<(), HandlespaceError> {
        self.list.deactivate_timer(key)
    }

    /// Deregisters every peer whose timer fired at or before `now`.
    pub fn purge_expired_peers(&mut self, now: TimeStamp) -> usize {
        let mut purged = 0;
        while let Some((time_stamp, key)) = self.list.first_timer() {
            if time_stamp > now || self.deregister_peer_by_key(&key).is_err() {
                break;
            }
            tracing::debug!(peer = %key, time_stamp, "peer expired");
            purged += 1;
        }
        purged
    }

    /// Earliest peer timer, or [`TIMER_INFINITE`](crate::domain::TIMER_INFINITE).
    #[must_use]
    pub fn next_timer_time_stamp(&self) -> TimeStamp {
        self.list.next_timer_time_stamp()
    }

    /// Moves a pool element's checksum contribution between the peers'
    /// ownership checksums.
    pub fn apply_handlespace_update(&mut self, update: &PoolElementUpdate) {
        match update.action {
            UpdateAction::Create => self.adjust_checksum(update.home, |sum| sum.add(update.checksum)),
            UpdateAction::Delete => self.adjust_checksum(update.home, |sum| sum.sub(update.checksum)),
            UpdateAction::Update => {
                self.adjust_checksum(update.pre_home, |sum| sum.sub(update.pre_checksum));
                self.adjust_checksum(update.home, |sum| sum.add(update.checksum));
            }
        }
    }

    fn adjust_checksum(
        &mut self,
        peer: RegistrarId,
        change: impl FnOnce(ChecksumAccumulator) -> ChecksumAccumulator,
    ) {
        if let Some(key) = self.list.find_key(peer, None)
            && let Some(node) = self.list.get_mut(&key)
        {
            node.ownership_checksum = change(node.ownership_checksum);
        }
    }

    /// Compares every identified peer's ownership checksum with the one
    /// recomputed from `handlespace`.
    ///
    /// # Errors
    ///
    /// Names the first peer whose checksum differs.
    pub fn verify_ownership_checksums(&self, handlespace: &HandlespaceNode) -> Result<(), String> {
        for node in self.list.peers() {
            if node.identifier().is_undefined() {
                continue;
            }
            let expected = handlespace.compute_ownership_checksum(node.identifier());
            if node.ownership_checksum_accumulator() != expected {
                return Err(format!(
                    "ownership checksum of peer {}: stored ${:04x}, computed ${:04x}",
                    node.identifier(),
                    node.ownership_checksum(),
                    expected.finish()
                ));
            }
        }
        Ok(())
    }

    /// Peer whose identifier is farthest from `pool_element` by XOR, if it
    /// is farther than the own registrar.
    #[must_use]
    pub fn useful_peer_for_pool_element(&self, pool_element: PoolElementId) -> Option<&PeerListNode> {
        let target = pool_element.value();
        let own_metric = self.list.own_identifier().value() ^ target;
        self.list
            .peers()
            .filter(|node| !node.identifier().is_undefined())
            .map(|node| (node.identifier().value() ^ target, node))
            .filter(|(metric, _)| *metric > own_metric)
            .fold(None, |best: Option<(u32, &PeerListNode)>, candidate| match best {
                Some((metric, _)) if metric >= candidate.0 => best,
                _ => Some(candidate),
            })
            .map(|(_, node)| node)
    }

    /// Full consistency check of the list.
    ///
    /// # Errors
    ///
    /// Describes the first inconsistency found.
    pub fn verify(&self) -> Result<(), String> {
        self.list.verify()
    }

    /// Removes every peer, calling the disposer.
    pub fn clear(&mut self) {
        let disposer = &mut self.disposer;
        self.list.clear(|node| disposer(node));
    }

    /// One-line summary of the list.
    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "PeerList of {}: {} peers, {} timers",
            self.list.own_identifier(),
            self.list.len(),
            self.list.timer_count()
        )
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::domain::peer::tests::peer_address;
    use crate::domain::pool_element::tests::sctp_transport;
    use crate::domain::{
        ElementKey, PolicySettings, PolicyType, PoolElementNode, PoolHandle,
        PoolNode,
    };

    const OWN: RegistrarId = RegistrarId::new(0x10);

    fn register(
        management: &mut PeerListManagement,
        id: u32,
        flags: PeerFlags,
        octet: u8,
    ) -> PeerKey {
        let Ok(key) =
            management.register_peer(RegistrarId::new(id), flags, &peer_address(octet), 100, None)
        else {
            panic!("peer {id} must register");
        };
        key
    }

    #[test]
    fn registration_validates_identifier_and_limit() {
        let mut management = PeerListManagement::new(OWN, 2);
        let address = peer_address(1);
        assert_eq!(
            management
                .register_peer(RegistrarId::UNDEFINED, PeerFlags::DYNAMIC, &address, 0, None)
                .err(),
            Some(HandlespaceError::InvalidId)
        );
        assert_eq!(
            management
                .register_peer(RegistrarId::new(5), PeerFlags::STATIC, &address, 0, None)
                .err(),
            Some(HandlespaceError::InvalidId)
        );
        assert_eq!(
            management
                .register_peer(OWN, PeerFlags::DYNAMIC, &address, 0, None)
                .err(),
            Some(HandlespaceError::OwnId)
        );
        register(&mut management, 1, PeerFlags::DYNAMIC, 1);
        register(&mut management, 2, PeerFlags::DYNAMIC, 2);
        register(&mut management, 2, PeerFlags::DYNAMIC, 2);
        assert_eq!(
            management
                .register_peer(RegistrarId::new(3), PeerFlags::DYNAMIC, &peer_address(3), 0, None)
                .err(),
            Some(HandlespaceError::OutOfResources)
        );
        assert_eq!(management.peer_count(), 2);
    }

    #[test]
    fn dynamic_registration_completes_configured_peer() {
        let mut management = PeerListManagement::new(OWN, 0);
        register(&mut management, 0, PeerFlags::STATIC, 7);
        let Some(configured) = management.find_peer_mut(RegistrarId::UNDEFINED, Some(&peer_address(7)))
        else {
            panic!("configured peer must be present");
        };
        configured.set_user_data(Some(42));

        let key = register(&mut management, 0x22, PeerFlags::DYNAMIC, 7);
        assert_eq!(key.identifier(), RegistrarId::new(0x22));
        assert_eq!(management.peer_count(), 1);
        let Some(peer) = management.find_peer(RegistrarId::new(0x22), None) else {
            panic!("peer must be identified");
        };
        assert!(peer.flags().contains(PeerFlags::NEW));
        assert!(!peer.flags().is_dynamic());
        assert_eq!(peer.user_data(), Some(42));

        let Ok(()) = management.deregister_peer(RegistrarId::new(0x22), None) else {
            panic!("peer must deregister");
        };
        assert_eq!(management.peer_count(), 1);
        let Some(reset) = management.find_peer(RegistrarId::UNDEFINED, Some(&peer_address(7))) else {
            panic!("configured peer must survive");
        };
        assert!(reset.identifier().is_undefined());
        assert_eq!(reset.user_data(), Some(42));
        assert!(management.verify().is_ok());
    }

    #[test]
    fn expiry_purges_and_disposes_dynamic_peers() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disposed);
        let mut management = PeerListManagement::new(OWN, 0).with_disposer(Box::new(
            move |_: &PeerListNode| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));
        for id in 1..=3 {
            let key = register(&mut management, id, PeerFlags::DYNAMIC, 1);
            let Ok(()) = management.restart_peer_expiry_timer(&key, u64::from(id) * 10) else {
                panic!("timer of peer {id} must start");
            };
        }
        assert_eq!(management.next_timer_time_stamp(), 110);
        assert_eq!(management.purge_expired_peers(120), 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(management.next_timer_time_stamp(), 130);
        assert_eq!(
            management.deregister_peer(RegistrarId::new(1), None),
            Err(HandlespaceError::NotFound)
        );
        management.clear();
        assert_eq!(disposed.load(Ordering::SeqCst), 3);
        assert_eq!(management.next_timer_time_stamp(), u64::MAX);
    }

    #[test]
    fn ownership_checksums_follow_handlespace_updates() {
        let peer = RegistrarId::new(0x20);
        let mut management = PeerListManagement::new(OWN, 0);
        register(&mut management, 0x20, PeerFlags::DYNAMIC, 2);

        let mut handlespace = HandlespaceNode::new(OWN);
        handlespace.set_update_notifications(true);
        let Ok(handle) = PoolHandle::try_from("EchoPool") else {
            panic!("valid handle");
        };
        for id in 1..=4 {
            let template = PoolNode::new(
                handle.clone(),
                PolicyType::RoundRobin,
                sctp_transport(1).protocol,
                false,
            );
            let element = PoolElementNode::new(
                PoolElementId::new(id),
                peer,
                5_000,
                PolicySettings::with_type(PolicyType::RoundRobin.code()),
                sctp_transport(1),
                None,
                None,
            );
            let Ok(_) = handlespace.add_or_update_pool_element(template, element) else {
                panic!("element {id} must register");
            };
        }
        let key = ElementKey::new(handle, PoolElementId::new(2));
        let Ok(()) = handlespace.update_ownership(&key, OWN) else {
            panic!("element 2 exists");
        };
        let removed = ElementKey::new(key.handle.clone(), PoolElementId::new(3));
        assert!(handlespace.remove_pool_element(&removed).is_some());

        for update in handlespace.take_update_notifications() {
            management.apply_handlespace_update(&update);
        }
        assert!(management.verify_ownership_checksums(&handlespace).is_ok());
        assert_ne!(
            management
                .find_peer(peer, None)
                .map(PeerListNode::ownership_checksum_accumulator),
            Some(ChecksumAccumulator::INITIAL)
        );
    }

    #[test]
    fn useful_peer_must_beat_own_metric() {
        let mut management = PeerListManagement::new(RegistrarId::new(0x0f), 0);
        register(&mut management, 0x01, PeerFlags::DYNAMIC, 1);
        register(&mut management, 0xf0, PeerFlags::DYNAMIC, 2);
        register(&mut management, 0, PeerFlags::STATIC, 3);

        let useful = management.useful_peer_for_pool_element(PoolElementId::new(0x0f));
        assert_eq!(useful.map(PeerListNode::identifier), Some(RegistrarId::new(0xf0)));
        assert!(
            management
                .useful_peer_for_pool_element(PoolElementId::new(0xf0))
                .is_none()
        );

        let mut rng = StdRng::seed_from_u64(3);
        assert!(management.get_random_peer(&mut rng).is_some());
        assert_eq!(
            management
                .find_nearest_next_peer(RegistrarId::new(0x01), None)
                .map(PeerListNode::identifier),
            Some(RegistrarId::new(0xf0))
        );
    }
}
