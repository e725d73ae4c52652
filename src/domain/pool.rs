//! Pools: the element set registered under one pool handle.
//!
//! A [`PoolNode`] owns its [`PoolElementNode`]s in an identifier index and
//! keeps a second, policy-ordered selection index over the same elements.
//! Both indices always hold the same identifiers.

use std::fmt;

use rand::RngCore;

use super::identifier::PoolElementId;
use super::policy::{PolicyType, SelectionKey, SelectionStrategy};
use super::pool_element::{ElementFlags, PoolElementNode};
use super::pool_handle::PoolHandle;
use super::transport::TransportProtocol;
use crate::error::HandlespaceError;
use crate::index::OrderedIndex;

/// Result of [`PoolNode::add_element`].
#[derive(Debug)]
pub enum AddOutcome {
    /// The element was new and is now linked.
    Inserted(PoolElementId),
    /// An element with this identifier exists; the candidate is handed
    /// back unchanged.
    Duplicate(Box<PoolElementNode>),
}

/// All elements registered under one pool handle.
#[derive(Debug)]
pub struct PoolNode {
    handle: PoolHandle,
    policy: PolicyType,
    protocol: TransportProtocol,
    control_channel: bool,
    global_seq_number: u64,
    index: OrderedIndex<PoolElementId, PoolElementNode>,
    selection: OrderedIndex<SelectionKey, PoolElementId>,
    user_data: Option<u64>,
}

impl PoolNode {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(
        handle: PoolHandle,
        policy: PolicyType,
        protocol: TransportProtocol,
        control_channel: bool,
    ) -> Self {
        Self {
            handle,
            policy,
            protocol,
            control_channel,
            global_seq_number: 0,
            index: OrderedIndex::new(),
            selection: OrderedIndex::new(),
            user_data: None,
        }
    }

    /// Pool handle.
    #[must_use]
    pub const fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    /// Pool policy, fixed at creation.
    #[must_use]
    pub const fn policy(&self) -> PolicyType {
        self.policy
    }

    /// Transport protocol every element must use.
    #[must_use]
    pub const fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Whether elements must use a control channel.
    #[must_use]
    pub const fn control_channel(&self) -> bool {
        self.control_channel
    }

    /// Next sequence number to hand out.
    #[must_use]
    pub const fn global_seq_number(&self) -> u64 {
        self.global_seq_number
    }

    /// Number of pool elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the pool has no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.index.is_empty()
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

    /// Looks up an element by identifier.
    #[must_use]
    pub fn find(&self, id: PoolElementId) -> Option<&PoolElementNode> {
        self.index.find(&id)
    }

    pub(crate) fn find_mut(&mut self, id: PoolElementId) -> Option<&mut PoolElementNode> {
        self.index.find_mut(&id)
    }

    /// Elements in identifier order.
    pub fn elements(&self) -> impl Iterator<Item = &PoolElementNode> {
        self.index.iter().map(|(_, element)| element)
    }

    /// Elements whose identifier is greater than `id`, in identifier order.
    pub fn elements_after(&self, id: PoolElementId) -> impl Iterator<Item = &PoolElementNode> {
        self.index.iter_after(&id).map(|(_, element)| element)
    }

    /// Elements in the current selection order.
    pub fn selection_order(&self) -> impl Iterator<Item = &PoolElementNode> {
        self.selection
            .iter()
            .filter_map(|(_, id)| self.index.find(id))
    }

    /// Element at the head of the selection order.
    #[must_use]
    pub fn first_selected(&self) -> Option<&PoolElementNode> {
        self.selection.first().and_then(|(_, id)| self.index.find(id))
    }

    /// Checks whether `element` may join this pool.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule, checked in this order:
    /// [`InvalidId`](HandlespaceError::InvalidId),
    /// [`WrongProtocol`](HandlespaceError::WrongProtocol),
    /// [`InvalidRegistrator`](HandlespaceError::InvalidRegistrator),
    /// [`InvalidAddresses`](HandlespaceError::InvalidAddresses),
    /// [`WrongControlChannelHandling`](HandlespaceError::WrongControlChannelHandling),
    /// [`InvalidPoolPolicy`](HandlespaceError::InvalidPoolPolicy),
    /// [`IncompatiblePoolPolicy`](HandlespaceError::IncompatiblePoolPolicy).
    pub fn check_compatibility(&self, element: &PoolElementNode) -> Result<(), HandlespaceError> {
        if element.identifier.is_undefined() {
            return Err(HandlespaceError::InvalidId);
        }
        if element.user_transport.protocol != self.protocol {
            return Err(HandlespaceError::WrongProtocol);
        }
        if let Some(registrator) = &element.registrator_transport
            && (registrator.protocol != TransportProtocol::Sctp
                || registrator.control_channel
                || !registrator.has_valid_addresses())
        {
            return Err(HandlespaceError::InvalidRegistrator);
        }
        if !element.user_transport.has_valid_addresses() {
            return Err(HandlespaceError::InvalidAddresses);
        }
        if element.user_transport.control_channel != self.control_channel {
            return Err(HandlespaceError::WrongControlChannelHandling);
        }
        if !element.policy_settings.is_valid() {
            return Err(HandlespaceError::InvalidPoolPolicy);
        }
        if !element.policy_settings.adapt(self.policy.code()) {
            return Err(HandlespaceError::IncompatiblePoolPolicy);
        }
        Ok(())
    }

    /// Adds `element` to the pool.
    ///
    /// A new element gets a fresh sequence number, zeroed policy counters
    /// and the [`ElementFlags::UPDATED`] flag before it is linked.
    ///
    /// # Errors
    ///
    /// Returns the compatibility error of
    /// [`check_compatibility`](Self::check_compatibility); nothing is
    /// changed in that case.
    pub fn add_element(
        &mut self,
        mut element: PoolElementNode,
    ) -> Result<AddOutcome, HandlespaceError> {
        self.check_compatibility(&element)?;
        let id = element.identifier;
        if self.index.contains(&id) {
            return Ok(AddOutcome::Duplicate(Box::new(element)));
        }

        if self.global_seq_number.checked_add(1).is_none() {
            self.resequence();
        }
        element.flags.insert(ElementFlags::UPDATED);
        element.seq_number = self.next_seq_number();
        element.virtual_counter = 0;
        element.round_counter = 0;
        element.selection_counter = 0;
        element.degradation = 0;
        element.selection_key = None;
        let policy = self.policy.policy();
        policy.on_insert(&mut element, self.first_selected());

        if let Err((_, element)) = self.index.insert(id, element, 0) {
            return Ok(AddOutcome::Duplicate(Box::new(element)));
        }
        self.link_selection(id);
        Ok(AddOutcome::Inserted(id))
    }

    /// Applies a re-registration to the existing element `id`.
    ///
    /// Returns `true` if the policy settings changed and the element was
    /// moved to its new selection position.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown identifier, or
    /// the compatibility error of the stored element.
    pub fn update_element(
        &mut self,
        id: PoolElementId,
        source: &PoolElementNode,
    ) -> Result<bool, HandlespaceError> {
        let existing = self.index.find(&id).ok_or(HandlespaceError::NotFound)?;
        self.check_compatibility(existing)?;

        let changed = self
            .index
            .find_mut(&id)
            .is_some_and(|element| element.update(source));
        if changed {
            self.unlink_selection(id);
            self.link_selection(id);
        }
        Ok(changed)
    }

    /// Removes element `id` from the index and the selection.
    pub fn remove_element(&mut self, id: PoolElementId) -> Option<PoolElementNode> {
        self.unlink_selection(id);
        self.index.remove(&id).map(|(element, _)| element)
    }

    /// Renumbers sequence numbers densely from 0 in selection order.
    ///
    /// The selection order is unchanged.
    pub fn resequence(&mut self) {
        let order: Vec<PoolElementId> = self.selection.iter().map(|(_, id)| *id).collect();
        self.selection.clear();
        self.global_seq_number = 0;
        for id in order {
            let seq = self.next_seq_number();
            if let Some(element) = self.index.find_mut(&id) {
                element.seq_number = seq;
                element.selection_key = None;
            }
            self.link_selection(id);
        }
    }

    /// Applies `change` to every element and rebuilds the selection index.
    pub(crate) fn relink_all(&mut self, mut change: impl FnMut(&mut PoolElementNode)) {
        let ids: Vec<PoolElementId> = self.index.iter().map(|(id, _)| *id).collect();
        self.selection.clear();
        for id in ids {
            if let Some(element) = self.index.find_mut(&id) {
                element.selection_key = None;
                change(element);
            }
            self.link_selection(id);
        }
    }

    /// Selects up to `max_elements` elements according to the pool policy.
    ///
    /// For sorting-order policies `max_increment` bounds how many of the
    /// selected elements advance their policy counters; `0` uses the policy
    /// default. Value-tree policies update every drawn element and are the
    /// only ones consulting `rng`.
    pub fn select<R: RngCore + ?Sized>(
        &mut self,
        max_elements: usize,
        max_increment: usize,
        rng: &mut R,
    ) -> Vec<PoolElementId> {
        if max_elements == 0 {
            return Vec::new();
        }
        let policy = self.policy.policy();
        let max_increment = if max_increment == 0 {
            policy.default_max_increment()
        } else {
            max_increment
        };

        let requested = u64::try_from(max_elements).unwrap_or(u64::MAX);
        if self.global_seq_number.checked_add(requested).is_none() {
            self.resequence();
        }
        policy.on_prepare_selection(self);

        match policy.strategy() {
            SelectionStrategy::SortingOrder => {
                self.select_by_sorting_order(max_elements, max_increment)
            }
            SelectionStrategy::ValueTree => self.select_by_value_tree(max_elements, rng),
        }
    }

    /// Checks the pairing of index and selection.
    ///
    /// # Errors
    ///
    /// Describes the first inconsistency found.
    pub fn verify(&self) -> Result<(), String> {
        if self.index.len() != self.selection.len() {
            return Err(format!(
                "pool {}: index has {} elements, selection has {}",
                self.handle,
                self.index.len(),
                self.selection.len()
            ));
        }
        for (id, element) in self.index.iter() {
            let linked = element
                .selection_key
                .and_then(|key| self.selection.find(&key))
                .is_some_and(|selected| selected == id);
            if !linked {
                return Err(format!("pool {}: element {id} not in selection", self.handle));
            }
        }
        if !self.index.verify() || !self.selection.verify() {
            return Err(format!("pool {}: index structure corrupt", self.handle));
        }
        Ok(())
    }

    fn select_by_sorting_order(
        &mut self,
        max_elements: usize,
        max_increment: usize,
    ) -> Vec<PoolElementId> {
        let policy = self.policy.policy();
        let selected: Vec<PoolElementId> = self
            .selection
            .iter()
            .take(max_elements)
            .map(|(_, id)| *id)
            .collect();
        for id in selected.iter().take(max_increment) {
            self.unlink_selection(*id);
            let seq = self.next_seq_number();
            if let Some(element) = self.index.find_mut(id) {
                element.seq_number = seq;
                element.selection_counter += 1;
                policy.on_select(element);
            }
            self.link_selection(*id);
        }
        selected
    }

    fn select_by_value_tree<R: RngCore + ?Sized>(
        &mut self,
        max_elements: usize,
        rng: &mut R,
    ) -> Vec<PoolElementId> {
        let policy = self.policy.policy();
        let rounds = self.len().min(max_elements);
        let mut drawn = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            let sum = self.selection.value_sum();
            if sum < 1 {
                break;
            }
            let value = rng.next_u64() % sum;
            let Some(id) = self.selection.node_by_value(value).map(|(_, id)| *id) else {
                break;
            };
            let seq = self.next_seq_number();
            if let Some(element) = self.index.find_mut(&id) {
                element.seq_number = seq;
                element.selection_counter += 1;
                policy.on_select(element);
            }
            // unlinked until the draw is over so no element is drawn twice
            self.unlink_selection(id);
            drawn.push(id);
        }
        for id in &drawn {
            self.link_selection(*id);
        }
        drawn
    }

    fn next_seq_number(&mut self) -> u64 {
        let seq = self.global_seq_number;
        self.global_seq_number = self.global_seq_number.wrapping_add(1);
        seq
    }

    fn link_selection(&mut self, id: PoolElementId) {
        let policy = self.policy.policy();
        let Some(element) = self.index.find_mut(&id) else {
            return;
        };
        let key = policy.selection_key(element);
        let value = policy.selection_value(element);
        element.selection_key = Some(key);
        let linked = self.selection.insert(key, id, value);
        debug_assert!(linked.is_ok(), "selection key of {id} already taken");
    }

    fn unlink_selection(&mut self, id: PoolElementId) {
        let key = self
            .index
            .find_mut(&id)
            .and_then(|element| element.selection_key.take());
        if let Some(key) = key {
            self.selection.remove(&key);
        }
    }
}

impl fmt::Display for PoolNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool \"{}\", policy={}, protocol={}{}, {} PoolElements",
            self.handle,
            self.policy,
            self.protocol.as_str(),
            if self.control_channel { "+CtrlCh" } else { "" },
            self.len()
        )
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::domain::pool_element::tests::{element, sctp_transport};
    use crate::domain::policy_settings::PolicySettings;

    fn pool(policy: PolicyType) -> PoolNode {
        let Ok(handle) = PoolHandle::try_from("EchoPool") else {
            panic!("valid handle");
        };
        PoolNode::new(handle, policy, TransportProtocol::Sctp, false)
    }

    fn weighted(policy: PolicyType, id: u32, weight: u32) -> PoolElementNode {
        element(id, PolicySettings { weight, ..PolicySettings::with_type(policy.code()) })
    }

    fn add(pool: &mut PoolNode, node: PoolElementNode) {
        let Ok(AddOutcome::Inserted(_)) = pool.add_element(node) else {
            panic!("element must be inserted");
        };
    }

    fn select_one(pool: &mut PoolNode, rng: &mut StdRng) -> u32 {
        let Some(id) = pool.select(1, 0, rng).first().copied() else {
            panic!("selection must not be empty");
        };
        id.value()
    }

    #[test]
    fn round_robin_cycles_in_registration_order() {
        let mut pool = pool(PolicyType::RoundRobin);
        for id in 1..=3 {
            add(&mut pool, weighted(PolicyType::RoundRobin, id, 0));
        }
        let mut rng = StdRng::seed_from_u64(1);
        let order: Vec<u32> = (0..6).map(|_| select_one(&mut pool, &mut rng)).collect();
        assert_eq!(order, vec![1, 2, 3, 1, 2, 3]);
        assert!(pool.verify().is_ok());
    }

    #[test]
    fn weighted_round_robin_hands_out_exact_shares() {
        let mut pool = pool(PolicyType::WeightedRoundRobin);
        add(&mut pool, weighted(PolicyType::WeightedRoundRobin, 1, 1));
        add(&mut pool, weighted(PolicyType::WeightedRoundRobin, 2, 2));
        let mut rng = StdRng::seed_from_u64(1);
        let (mut light, mut heavy) = (0u32, 0u32);
        for _ in 0..300 {
            match select_one(&mut pool, &mut rng) {
                1 => light += 1,
                2 => heavy += 1,
                other => panic!("unexpected element {other}"),
            }
        }
        assert_eq!((light, heavy), (100, 200));
    }

    #[test]
    fn weighted_random_follows_weights() {
        let mut pool = pool(PolicyType::WeightedRandom);
        add(&mut pool, weighted(PolicyType::WeightedRandom, 1, 1));
        add(&mut pool, weighted(PolicyType::WeightedRandom, 2, 1));
        add(&mut pool, weighted(PolicyType::WeightedRandom, 3, 8));
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let draws = 10_000;
        let heavy = (0..draws)
            .filter(|_| select_one(&mut pool, &mut rng) == 3)
            .count();
        assert!((7_600..=8_400).contains(&heavy), "heavy element drawn {heavy} times");
    }

    #[test]
    fn value_tree_never_returns_duplicates() {
        let mut pool = pool(PolicyType::Random);
        for id in 1..=5 {
            add(&mut pool, weighted(PolicyType::Random, id, 0));
        }
        let mut rng = StdRng::seed_from_u64(9);
        let mut drawn = pool.select(10, 0, &mut rng);
        assert_eq!(drawn.len(), 5);
        drawn.sort();
        drawn.dedup();
        assert_eq!(drawn.len(), 5);
        assert!(pool.verify().is_ok());
    }

    #[test]
    fn value_tree_updates_every_drawn_element() {
        let mut pool = pool(PolicyType::RandomizedLeastUsed);
        for id in 1..=4 {
            add(&mut pool, weighted(PolicyType::RandomizedLeastUsed, id, 0));
        }
        let mut rng = StdRng::seed_from_u64(21);
        let drawn = pool.select(4, 1, &mut rng);
        assert_eq!(drawn.len(), 4);
        let mut seqs = Vec::new();
        for id in &drawn {
            let Some(element) = pool.find(*id) else {
                panic!("drawn element {id} must exist");
            };
            assert_eq!(element.selection_counter(), 1);
            seqs.push(element.seq_number());
        }
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 4);
        assert!(pool.verify().is_ok());
    }

    #[test]
    fn zero_weights_are_never_drawn() {
        let mut pool = pool(PolicyType::WeightedRandom);
        add(&mut pool, weighted(PolicyType::WeightedRandom, 1, 0));
        let mut rng = StdRng::seed_from_u64(3);
        assert!(pool.select(1, 0, &mut rng).is_empty());
    }

    #[test]
    fn duplicate_hands_back_candidate() {
        let mut pool = pool(PolicyType::RoundRobin);
        add(&mut pool, weighted(PolicyType::RoundRobin, 7, 0));
        let Ok(AddOutcome::Duplicate(candidate)) =
            pool.add_element(weighted(PolicyType::RoundRobin, 7, 4))
        else {
            panic!("second add must be a duplicate");
        };
        assert_eq!(candidate.policy_settings().weight, 4);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn compatibility_checks_run_in_order() {
        let pool = pool(PolicyType::RoundRobin);
        assert_eq!(
            pool.check_compatibility(&weighted(PolicyType::RoundRobin, 0, 0)),
            Err(HandlespaceError::InvalidId)
        );

        let mut tcp = weighted(PolicyType::RoundRobin, 1, 0);
        tcp.user_transport.protocol = TransportProtocol::Tcp;
        assert_eq!(pool.check_compatibility(&tcp), Err(HandlespaceError::WrongProtocol));

        let mut registrator = weighted(PolicyType::RoundRobin, 1, 0);
        let mut bad = sctp_transport(0);
        bad.control_channel = true;
        registrator.registrator_transport = Some(bad);
        registrator.user_transport.port = 0;
        assert_eq!(
            pool.check_compatibility(&registrator),
            Err(HandlespaceError::InvalidRegistrator)
        );

        let mut no_port = weighted(PolicyType::RoundRobin, 1, 0);
        no_port.user_transport.port = 0;
        no_port.user_transport.control_channel = true;
        assert_eq!(pool.check_compatibility(&no_port), Err(HandlespaceError::InvalidAddresses));

        let mut control = weighted(PolicyType::RoundRobin, 1, 0);
        control.user_transport.control_channel = true;
        assert_eq!(
            pool.check_compatibility(&control),
            Err(HandlespaceError::WrongControlChannelHandling)
        );

        assert_eq!(
            pool.check_compatibility(&weighted(PolicyType::LeastUsed, 1, 0)),
            Err(HandlespaceError::IncompatiblePoolPolicy)
        );
    }

    #[test]
    fn update_relinks_with_new_weight() {
        let mut pool = pool(PolicyType::WeightedRoundRobin);
        add(&mut pool, weighted(PolicyType::WeightedRoundRobin, 1, 7));
        let id = PoolElementId::new(1);
        let Ok(changed) = pool.update_element(id, &weighted(PolicyType::WeightedRoundRobin, 1, 3))
        else {
            panic!("update must succeed");
        };
        assert!(changed);
        let Some(updated) = pool.find(id) else {
            panic!("element present");
        };
        assert_eq!(updated.policy_settings().weight, 3);
        assert_eq!(updated.virtual_counter(), 3);
        let source = updated.clone();
        assert!(pool.verify().is_ok());
        assert_eq!(
            pool.update_element(PoolElementId::new(2), &source),
            Err(HandlespaceError::NotFound)
        );
    }

    #[test]
    fn resequence_keeps_selection_order() {
        let mut pool = pool(PolicyType::RoundRobin);
        for id in [5, 3, 9] {
            add(&mut pool, weighted(PolicyType::RoundRobin, id, 0));
        }
        let mut rng = StdRng::seed_from_u64(1);
        let _ = pool.select(1, 0, &mut rng);
        let before: Vec<u32> = pool.selection_order().map(|e| e.identifier().value()).collect();
        pool.resequence();
        let after: Vec<u32> = pool.selection_order().map(|e| e.identifier().value()).collect();
        assert_eq!(before, after);
        assert_eq!(pool.global_seq_number(), 3);
        let seqs: Vec<u64> = pool.selection_order().map(PoolElementNode::seq_number).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn remove_unlinks_both_indices() {
        let mut pool = pool(PolicyType::LeastUsed);
        add(&mut pool, weighted(PolicyType::LeastUsed, 1, 0));
        add(&mut pool, weighted(PolicyType::LeastUsed, 2, 0));
        assert!(pool.remove_element(PoolElementId::new(1)).is_some());
        assert!(pool.remove_element(PoolElementId::new(1)).is_none());
        assert_eq!(pool.len(), 1);
        assert!(pool.verify().is_ok());
    }
}
