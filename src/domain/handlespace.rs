//! The handlespace: every pool known to a registrar plus the cross-cutting
//! indices over their elements.
//!
//! Pools own their elements. The timer, ownership and connection indices
//! only store keys ([`ElementKey`] plus the index attribute), so an element
//! is always reached through its pool. All mutations keep the four indices,
//! the element counts and both checksums in step; [`HandlespaceNode::verify`]
//! recomputes everything from scratch and reports the first mismatch.

use std::fmt;

use rand::RngCore;
use serde::Serialize;

use super::checksum::ChecksumAccumulator;
use super::handlespace_event::{PoolElementUpdate, UpdateAction};
use super::identifier::{PoolElementId, RegistrarId, TIMER_INFINITE, TimeStamp};
use super::pool::{AddOutcome, PoolNode};
use super::pool_element::{
    Connection, ElementFlags, ElementTimer, ElementTimerCode, PoolElementNode,
};
use super::pool_handle::PoolHandle;
use crate::error::HandlespaceError;
use crate::index::OrderedIndex;

/// Default upper bound for one name table page.
pub const DEFAULT_NAME_TABLE_MAX_ENTRIES: usize = 128;

/// Address of one pool element: its pool handle and identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ElementKey {
    /// Pool the element belongs to.
    pub handle: PoolHandle,
    /// Element identifier, unique within the pool.
    pub id: PoolElementId,
}

impl ElementKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(handle: PoolHandle, id: PoolElementId) -> Self {
        Self { handle, id }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.handle, self.id)
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new element was linked.
    Inserted(ElementKey),
    /// An existing element took over the registration.
    Updated(ElementKey),
}

impl RegistrationOutcome {
    /// Key of the registered element.
    #[must_use]
    pub const fn key(&self) -> &ElementKey {
        match self {
            Self::Inserted(key) | Self::Updated(key) => key,
        }
    }

    /// Returns `true` if the registration created the element.
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Resume position of a paged name table walk.
///
/// An untouched cursor starts at the beginning regardless of the
/// [`NameTableFlags::start`] flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTableCursor {
    /// Handle of the last returned entry.
    pub last_handle: Option<PoolHandle>,
    /// Identifier of the last returned entry.
    pub last_id: PoolElementId,
}

/// Mode of a name table request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameTableFlags {
    /// Ignore the cursor and start from the beginning.
    pub start: bool,
    /// Only return elements owned by the requested home registrar.
    pub own_children_only: bool,
}

/// One entry of a name table page.
#[derive(Debug, Clone, Serialize)]
pub struct NameTableEntry {
    /// Element address.
    pub key: ElementKey,
    /// Snapshot of the element.
    pub element: PoolElementNode,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    time_stamp: TimeStamp,
    handle: PoolHandle,
    id: PoolElementId,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OwnershipKey {
    home: RegistrarId,
    handle: PoolHandle,
    id: PoolElementId,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ConnectionKey {
    connection: Connection,
    handle: PoolHandle,
    id: PoolElementId,
}

/// Aggregate root of a registrar's handlespace.
#[derive(Debug)]
pub struct HandlespaceNode {
    home_registrar: RegistrarId,
    pools: OrderedIndex<PoolHandle, PoolNode>,
    timers: OrderedIndex<TimerKey, ()>,
    ownership: OrderedIndex<OwnershipKey, ()>,
    connections: OrderedIndex<ConnectionKey, ()>,
    element_count: usize,
    owned_element_count: usize,
    checksum: ChecksumAccumulator,
    ownership_checksum: ChecksumAccumulator,
    name_table_max_entries: usize,
    notifications_enabled: bool,
    notifications: Vec<PoolElementUpdate>,
}

impl HandlespaceNode {
    /// Creates an empty handlespace owned by `home_registrar`.
    #[must_use]
    pub const fn new(home_registrar: RegistrarId) -> Self {
        Self {
            home_registrar,
            pools: OrderedIndex::new(),
            timers: OrderedIndex::new(),
            ownership: OrderedIndex::new(),
            connections: OrderedIndex::new(),
            element_count: 0,
            owned_element_count: 0,
            checksum: ChecksumAccumulator::INITIAL,
            ownership_checksum: ChecksumAccumulator::INITIAL,
            name_table_max_entries: DEFAULT_NAME_TABLE_MAX_ENTRIES,
            notifications_enabled: false,
            notifications: Vec::new(),
        }
    }

    /// Identifier of the registrar owning this handlespace.
    #[must_use]
    pub const fn home_registrar(&self) -> RegistrarId {
        self.home_registrar
    }

    /// Changes the own identifier and recomputes the owned-element data.
    pub fn set_home_registrar(&mut self, home_registrar: RegistrarId) {
        self.home_registrar = home_registrar;
        self.owned_element_count = self.owned_keys(home_registrar).len();
        self.ownership_checksum = self.compute_ownership_checksum(home_registrar);
    }

    /// Caps the page size of [`get_name_table`](Self::get_name_table).
    pub fn set_name_table_max_entries(&mut self, max_entries: usize) {
        self.name_table_max_entries = max_entries;
    }

    /// Enables or disables recording of [`PoolElementUpdate`]s.
    pub fn set_update_notifications(&mut self, enabled: bool) {
        self.notifications_enabled = enabled;
        if !enabled {
            self.notifications.clear();
        }
    }

    /// Drains the recorded update notifications in mutation order.
    pub fn take_update_notifications(&mut self) -> Vec<PoolElementUpdate> {
        std::mem::take(&mut self.notifications)
    }

    /// Number of pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of pool elements in all pools.
    #[must_use]
    pub const fn element_count(&self) -> usize {
        self.element_count
    }

    /// Number of pool elements whose home is this registrar.
    #[must_use]
    pub const fn owned_element_count(&self) -> usize {
        self.owned_element_count
    }

    /// Number of running element timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Number of elements with a defined home registrar.
    #[must_use]
    pub fn ownership_count(&self) -> usize {
        self.ownership.len()
    }

    /// Number of elements registered over a control connection.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Finished checksum over all elements.
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.checksum.finish()
    }

    /// Unfolded checksum over all elements.
    #[must_use]
    pub const fn checksum_accumulator(&self) -> ChecksumAccumulator {
        self.checksum
    }

    /// Finished checksum over the elements owned by this registrar.
    #[must_use]
    pub const fn ownership_checksum(&self) -> u16 {
        self.ownership_checksum.finish()
    }

    /// Unfolded checksum over the elements owned by this registrar.
    #[must_use]
    pub const fn ownership_checksum_accumulator(&self) -> ChecksumAccumulator {
        self.ownership_checksum
    }

    /// Time stamp of the earliest element timer, or [`TIMER_INFINITE`].
    #[must_use]
    pub fn next_timer_time_stamp(&self) -> TimeStamp {
        self.timers
            .first()
            .map_or(TIMER_INFINITE, |(key, ())| key.time_stamp)
    }

    /// Earliest element timer and the element it belongs to.
    #[must_use]
    pub fn first_timer(&self) -> Option<(TimeStamp, ElementKey)> {
        self.timers
            .first()
            .map(|(key, ())| (key.time_stamp, ElementKey::new(key.handle.clone(), key.id)))
    }

    /// Pools in handle order.
    pub fn pools(&self) -> impl Iterator<Item = &PoolNode> {
        self.pools.iter().map(|(_, pool)| pool)
    }

    /// Looks up a pool.
    #[must_use]
    pub fn find_pool(&self, handle: &PoolHandle) -> Option<&PoolNode> {
        self.pools.find(handle)
    }

    /// Replaces the caller cookie of a pool.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown pool.
    pub fn set_pool_user_data(
        &mut self,
        handle: &PoolHandle,
        user_data: Option<u64>,
    ) -> Result<(), HandlespaceError> {
        let pool = self.pools.find_mut(handle).ok_or(HandlespaceError::NotFound)?;
        pool.set_user_data(user_data);
        Ok(())
    }

    /// Looks up a pool element.
    #[must_use]
    pub fn find_pool_element(
        &self,
        handle: &PoolHandle,
        id: PoolElementId,
    ) -> Option<&PoolElementNode> {
        self.pools.find(handle).and_then(|pool| pool.find(id))
    }

    /// Looks up a pool element for changes of its caller-owned fields.
    pub fn find_pool_element_mut(
        &mut self,
        handle: &PoolHandle,
        id: PoolElementId,
    ) -> Option<&mut PoolElementNode> {
        self.pools.find_mut(handle).and_then(|pool| pool.find_mut(id))
    }

    /// Registers `element`, creating the pool from `template` if needed.
    ///
    /// A duplicate identifier turns the call into a re-registration of the
    /// stored element: policy settings, connection and home registrar are
    /// taken from `element`, the checksums are adjusted and `Updated` is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the pool's compatibility error (see
    /// [`PoolNode::check_compatibility`]). The handlespace is unchanged in
    /// that case; a pool created for this call is dropped again.
    pub fn add_or_update_pool_element(
        &mut self,
        template: PoolNode,
        element: PoolElementNode,
    ) -> Result<RegistrationOutcome, HandlespaceError> {
        let handle = template.handle().clone();
        let outcome = if let Some(pool) = self.pools.find_mut(&handle) {
            pool.add_element(element)?
        } else {
            let mut pool = template;
            let outcome = pool.add_element(element)?;
            let created = self.pools.insert(handle.clone(), pool, 0).is_ok();
            debug_assert!(created, "pool {handle} appeared during registration");
            outcome
        };

        match outcome {
            AddOutcome::Inserted(id) => {
                Ok(RegistrationOutcome::Inserted(self.link_new_element(handle, id)))
            }
            AddOutcome::Duplicate(candidate) => self
                .update_existing_element(handle, &candidate)
                .map(RegistrationOutcome::Updated),
        }
    }

    /// Unlinks an element from every index and returns it.
    ///
    /// The pool stays in the handlespace even when it becomes empty; use
    /// [`remove_empty_pool`](Self::remove_empty_pool) afterwards.
    pub fn remove_pool_element(&mut self, key: &ElementKey) -> Option<PoolElementNode> {
        let element = self.find_pool_element(&key.handle, key.id)?;
        let timer = element.timer;
        let home = element.home_registrar;
        let connection = element.connection;
        let checksum = element.checksum;

        if let Some(timer) = timer {
            self.timers.remove(&timer_key(key, timer.time_stamp));
        }
        if !home.is_undefined() {
            self.ownership.remove(&ownership_key(key, home));
        }
        if let Some(connection) = connection {
            self.connections.remove(&connection_key(key, connection));
        }
        let mut node = self
            .pools
            .find_mut(&key.handle)
            .and_then(|pool| pool.remove_element(key.id))?;
        node.timer = None;

        self.element_count -= 1;
        self.remove_contribution(home, checksum);
        self.notify(PoolElementUpdate {
            action: UpdateAction::Delete,
            key: key.clone(),
            home,
            checksum,
            pre_checksum: checksum,
            pre_home: home,
        });
        Some(node)
    }

    /// Removes `handle` if the pool has no elements left.
    pub fn remove_empty_pool(&mut self, handle: &PoolHandle) -> Option<PoolNode> {
        if self.pools.find(handle)?.is_empty() {
            return self.pools.remove(handle).map(|(pool, _)| pool);
        }
        None
    }

    /// Runs the pool's selection policy.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown pool.
    pub fn select_pool_element_nodes_by_policy<R: RngCore + ?Sized>(
        &mut self,
        handle: &PoolHandle,
        max_elements: usize,
        max_increment: usize,
        rng: &mut R,
    ) -> Result<Vec<PoolElementId>, HandlespaceError> {
        let pool = self.pools.find_mut(handle).ok_or(HandlespaceError::NotFound)?;
        Ok(pool.select(max_elements, max_increment, rng))
    }

    /// Starts a timer for an element.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    ///
    /// # Panics
    ///
    /// Panics if the element's timer is already running.
    pub fn activate_timer(
        &mut self,
        key: &ElementKey,
        code: ElementTimerCode,
        time_stamp: TimeStamp,
    ) -> Result<(), HandlespaceError> {
        let element = self
            .find_pool_element_mut(&key.handle, key.id)
            .ok_or(HandlespaceError::NotFound)?;
        assert!(element.timer.is_none(), "timer of {key} is already running");
        element.timer = Some(ElementTimer { code, time_stamp });
        let linked = self.timers.insert(timer_key(key, time_stamp), (), 0).is_ok();
        debug_assert!(linked, "timer entry of {key} already present");
        Ok(())
    }

    /// Stops an element's timer; a stopped timer is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub fn deactivate_timer(&mut self, key: &ElementKey) -> Result<(), HandlespaceError> {
        let element = self
            .find_pool_element_mut(&key.handle, key.id)
            .ok_or(HandlespaceError::NotFound)?;
        if let Some(timer) = element.timer.take() {
            self.timers.remove(&timer_key(key, timer.time_stamp));
        }
        Ok(())
    }

    /// Moves an element to another home registrar.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub fn update_ownership(
        &mut self,
        key: &ElementKey,
        home: RegistrarId,
    ) -> Result<(), HandlespaceError> {
        let element = self
            .find_pool_element(&key.handle, key.id)
            .ok_or(HandlespaceError::NotFound)?;
        let pre_home = element.home_registrar;
        let checksum = element.checksum;
        if pre_home == home {
            return Ok(());
        }

        self.remove_contribution(pre_home, checksum);
        self.relink_ownership(key, pre_home, home);
        self.add_contribution(home, checksum);
        if let Some(element) = self.find_pool_element_mut(&key.handle, key.id) {
            element.flags.insert(ElementFlags::UPDATED);
        }
        self.notify(PoolElementUpdate {
            action: UpdateAction::Update,
            key: key.clone(),
            home,
            checksum,
            pre_checksum: checksum,
            pre_home,
        });
        Ok(())
    }

    /// Moves an element to another control connection.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub fn update_connection(
        &mut self,
        key: &ElementKey,
        connection: Option<Connection>,
    ) -> Result<(), HandlespaceError> {
        if self.find_pool_element(&key.handle, key.id).is_none() {
            return Err(HandlespaceError::NotFound);
        }
        self.relink_connection(key, connection);
        Ok(())
    }

    /// Keys of the elements registered over `connection`, in handle order.
    #[must_use]
    pub fn pool_elements_of_connection(&self, connection: Connection) -> Vec<ElementKey> {
        self.connections
            .iter_where(|key| key.connection >= connection)
            .take_while(|(key, ())| key.connection == connection)
            .map(|(key, ())| ElementKey::new(key.handle.clone(), key.id))
            .collect()
    }

    /// Keys of the elements owned by `home`, in handle order.
    #[must_use]
    pub fn owned_keys(&self, home: RegistrarId) -> Vec<ElementKey> {
        self.ownership
            .iter_where(|key| key.home >= home)
            .take_while(|(key, ())| key.home == home)
            .map(|(key, ())| ElementKey::new(key.handle.clone(), key.id))
            .collect()
    }

    /// Sets [`ElementFlags::MARKED`] on every element owned by `home`.
    ///
    /// Returns the number of marked elements.
    pub fn mark_pool_element_nodes(&mut self, home: RegistrarId) -> usize {
        let keys = self.owned_keys(home);
        for key in &keys {
            if let Some(element) = self.find_pool_element_mut(&key.handle, key.id) {
                element.flags.insert(ElementFlags::MARKED);
            }
        }
        keys.len()
    }

    /// Keys of the elements owned by `home` that are still marked.
    #[must_use]
    pub fn marked_keys(&self, home: RegistrarId) -> Vec<ElementKey> {
        self.owned_keys(home)
            .into_iter()
            .filter(|key| {
                self.find_pool_element(&key.handle, key.id)
                    .is_some_and(|element| element.flags.contains(ElementFlags::MARKED))
            })
            .collect()
    }

    /// Sums the checksum contributions of the elements owned by `home`.
    #[must_use]
    pub fn compute_ownership_checksum(&self, home: RegistrarId) -> ChecksumAccumulator {
        self.ownership
            .iter_where(|key| key.home >= home)
            .take_while(|(key, ())| key.home == home)
            .filter_map(|(key, ())| self.find_pool_element(&key.handle, key.id))
            .fold(ChecksumAccumulator::INITIAL, |sum, element| sum.add(element.checksum))
    }

    /// Returns the next page of the name table and advances `cursor`.
    ///
    /// The page holds at most `min(max_entries, name table maximum)`
    /// entries. In the global mode all elements are walked in handle and
    /// identifier order; with [`NameTableFlags::own_children_only`] only
    /// the elements owned by `home` are walked.
    pub fn get_name_table(
        &self,
        home: RegistrarId,
        cursor: &mut NameTableCursor,
        flags: NameTableFlags,
        max_entries: usize,
    ) -> Vec<NameTableEntry> {
        let limit = max_entries.min(self.name_table_max_entries);
        if limit == 0 {
            return Vec::new();
        }
        let resume = if flags.start {
            None
        } else {
            cursor.last_handle.clone().map(|handle| (handle, cursor.last_id))
        };

        let entries = if flags.own_children_only {
            self.own_children_page(home, resume, limit)
        } else {
            self.global_page(resume, limit)
        };

        if let Some(last) = entries.last() {
            cursor.last_handle = Some(last.key.handle.clone());
            cursor.last_id = last.key.id;
        }
        entries
    }

    /// Checks every index against the elements.
    ///
    /// # Errors
    ///
    /// Describes the first inconsistency found.
    pub fn verify(&self) -> Result<(), String> {
        let mut elements = 0_usize;
        let mut timers = 0_usize;
        let mut owned_by_anyone = 0_usize;
        let mut owned = 0_usize;
        let mut connected = 0_usize;
        let mut checksum = ChecksumAccumulator::INITIAL;
        let mut ownership_checksum = ChecksumAccumulator::INITIAL;

        for (handle, pool) in self.pools.iter() {
            pool.verify()?;
            if pool.is_empty() {
                return Err(format!("pool {handle} is empty"));
            }
            for element in pool.elements() {
                let key = ElementKey::new(handle.clone(), element.identifier);
                elements += 1;
                if element.checksum != element.compute_checksum(handle) {
                    return Err(format!("element {key} has a stale checksum"));
                }
                checksum = checksum.add(element.checksum);
                if let Some(timer) = element.timer {
                    timers += 1;
                    if !self.timers.contains(&timer_key(&key, timer.time_stamp)) {
                        return Err(format!("timer of {key} is not indexed"));
                    }
                }
                if !element.home_registrar.is_undefined() {
                    owned_by_anyone += 1;
                    if !self.ownership.contains(&ownership_key(&key, element.home_registrar)) {
                        return Err(format!("ownership of {key} is not indexed"));
                    }
                }
                if self.is_own(element.home_registrar) {
                    owned += 1;
                    ownership_checksum = ownership_checksum.add(element.checksum);
                }
                if let Some(connection) = element.connection {
                    connected += 1;
                    if !self.connections.contains(&connection_key(&key, connection)) {
                        return Err(format!("connection of {key} is not indexed"));
                    }
                }
            }
        }

        let counts = [
            ("elements", elements, self.element_count),
            ("timers", timers, self.timers.len()),
            ("ownerships", owned_by_anyone, self.ownership.len()),
            ("owned elements", owned, self.owned_element_count),
            ("connections", connected, self.connections.len()),
        ];
        for (what, found, stored) in counts {
            if found != stored {
                return Err(format!("{what}: found {found}, stored {stored}"));
            }
        }
        if self.ownership.len() > self.element_count {
            return Err("more ownerships than elements".to_owned());
        }
        if checksum != self.checksum {
            return Err("handlespace checksum mismatch".to_owned());
        }
        if ownership_checksum != self.ownership_checksum {
            return Err("ownership checksum mismatch".to_owned());
        }
        if !self.pools.verify()
            || !self.timers.verify()
            || !self.ownership.verify()
            || !self.connections.verify()
        {
            return Err("index structure corrupt".to_owned());
        }
        Ok(())
    }

    /// Removes everything, calling the disposers once per element and pool.
    ///
    /// Each removed element is reported as a `Delete` notification.
    pub fn clear(
        &mut self,
        mut pool_disposer: impl FnMut(&PoolNode),
        mut element_disposer: impl FnMut(&PoolHandle, &PoolElementNode),
    ) {
        self.timers.clear();
        self.ownership.clear();
        self.connections.clear();
        while let Some((handle, pool)) = self.pools.pop_first() {
            for element in pool.elements() {
                element_disposer(&handle, element);
                self.notify(PoolElementUpdate {
                    action: UpdateAction::Delete,
                    key: ElementKey::new(handle.clone(), element.identifier),
                    home: element.home_registrar,
                    checksum: element.checksum,
                    pre_checksum: element.checksum,
                    pre_home: element.home_registrar,
                });
            }
            pool_disposer(&pool);
        }
        self.element_count = 0;
        self.owned_element_count = 0;
        self.checksum = ChecksumAccumulator::INITIAL;
        self.ownership_checksum = ChecksumAccumulator::INITIAL;
    }

    /// One-line summary.
    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "Handlespace[home={}]: ({} Pools, {} PoolElements, {} Owned)",
            self.home_registrar,
            self.pool_count(),
            self.element_count,
            self.owned_element_count
        )
    }

    fn is_own(&self, home: RegistrarId) -> bool {
        !home.is_undefined() && home == self.home_registrar
    }

    fn notify(&mut self, update: PoolElementUpdate) {
        if self.notifications_enabled {
            self.notifications.push(update);
        }
    }

    fn add_contribution(&mut self, home: RegistrarId, checksum: ChecksumAccumulator) {
        self.checksum = self.checksum.add(checksum);
        if self.is_own(home) {
            self.owned_element_count += 1;
            self.ownership_checksum = self.ownership_checksum.add(checksum);
        }
    }

    fn remove_contribution(&mut self, home: RegistrarId, checksum: ChecksumAccumulator) {
        self.checksum = self.checksum.sub(checksum);
        if self.is_own(home) {
            self.owned_element_count -= 1;
            self.ownership_checksum = self.ownership_checksum.sub(checksum);
        }
    }

    fn link_new_element(&mut self, handle: PoolHandle, id: PoolElementId) -> ElementKey {
        let key = ElementKey::new(handle, id);
        let Some(element) = self.find_pool_element_mut(&key.handle, id) else {
            return key;
        };
        let checksum = element.compute_checksum(&key.handle);
        element.checksum = checksum;
        element.flags.insert(ElementFlags::NEW);
        let home = element.home_registrar;
        let connection = element.connection;

        if !home.is_undefined() {
            let linked = self.ownership.insert(ownership_key(&key, home), (), 0).is_ok();
            debug_assert!(linked, "ownership of {key} already indexed");
        }
        if let Some(connection) = connection {
            let linked = self
                .connections
                .insert(connection_key(&key, connection), (), 0)
                .is_ok();
            debug_assert!(linked, "connection of {key} already indexed");
        }
        self.element_count += 1;
        self.add_contribution(home, checksum);
        self.notify(PoolElementUpdate {
            action: UpdateAction::Create,
            key: key.clone(),
            home,
            checksum,
            pre_checksum: ChecksumAccumulator::INITIAL,
            pre_home: RegistrarId::UNDEFINED,
        });
        key
    }

    fn update_existing_element(
        &mut self,
        handle: PoolHandle,
        candidate: &PoolElementNode,
    ) -> Result<ElementKey, HandlespaceError> {
        let key = ElementKey::new(handle, candidate.identifier);
        let pool = self
            .pools
            .find_mut(&key.handle)
            .ok_or(HandlespaceError::NotFound)?;
        pool.update_element(key.id, candidate)?;
        let element = pool.find(key.id).ok_or(HandlespaceError::NotFound)?;
        let pre_home = element.home_registrar;
        let pre_checksum = element.checksum;

        self.relink_connection(&key, candidate.connection);

        let home = candidate.home_registrar;
        if home != pre_home {
            self.relink_ownership(&key, pre_home, home);
        }
        self.remove_contribution(pre_home, pre_checksum);
        let mut checksum = pre_checksum;
        if let Some(element) = self.find_pool_element_mut(&key.handle, key.id) {
            checksum = element.compute_checksum(&key.handle);
            element.checksum = checksum;
            if home != pre_home {
                element.flags.insert(ElementFlags::UPDATED);
            }
            element.flags.remove(ElementFlags::NEW);
        }
        self.add_contribution(home, checksum);

        self.notify(PoolElementUpdate {
            action: UpdateAction::Update,
            key: key.clone(),
            home,
            checksum,
            pre_checksum,
            pre_home,
        });
        Ok(key)
    }

    fn relink_ownership(&mut self, key: &ElementKey, pre_home: RegistrarId, home: RegistrarId) {
        if !pre_home.is_undefined() {
            self.ownership.remove(&ownership_key(key, pre_home));
        }
        if let Some(element) = self.find_pool_element_mut(&key.handle, key.id) {
            element.home_registrar = home;
        }
        if !home.is_undefined() {
            let linked = self.ownership.insert(ownership_key(key, home), (), 0).is_ok();
            debug_assert!(linked, "ownership of {key} already indexed");
        }
    }

    fn relink_connection(&mut self, key: &ElementKey, connection: Option<Connection>) {
        let Some(element) = self.find_pool_element_mut(&key.handle, key.id) else {
            return;
        };
        let previous = element.connection;
        if previous == connection {
            return;
        }
        element.connection = connection;
        if let Some(previous) = previous {
            self.connections.remove(&connection_key(key, previous));
        }
        if let Some(connection) = connection {
            let linked = self
                .connections
                .insert(connection_key(key, connection), (), 0)
                .is_ok();
            debug_assert!(linked, "connection of {key} already indexed");
        }
    }

    fn global_page(
        &self,
        resume: Option<(PoolHandle, PoolElementId)>,
        limit: usize,
    ) -> Vec<NameTableEntry> {
        let mut entries = Vec::with_capacity(limit);
        let pools = self
            .pools
            .iter_where(|handle| resume.as_ref().is_none_or(|(last, _)| handle >= last));
        for (handle, pool) in pools {
            let after = match &resume {
                Some((last, id)) if last == handle => *id,
                _ => PoolElementId::UNDEFINED,
            };
            for element in pool.elements_after(after) {
                if entries.len() >= limit {
                    return entries;
                }
                entries.push(NameTableEntry {
                    key: ElementKey::new(handle.clone(), element.identifier),
                    element: element.clone(),
                });
            }
        }
        entries
    }

    fn own_children_page(
        &self,
        home: RegistrarId,
        resume: Option<(PoolHandle, PoolElementId)>,
        limit: usize,
    ) -> Vec<NameTableEntry> {
        let keys = match resume {
            Some((handle, id)) => {
                let last = OwnershipKey { home, handle, id };
                self.ownership.iter_after(&last)
            }
            None => self.ownership.iter_where(|key| key.home >= home),
        };
        keys.take_while(|(key, ())| key.home == home)
            .filter_map(|(key, ())| {
                self.find_pool_element(&key.handle, key.id)
                    .map(|element| NameTableEntry {
                        key: ElementKey::new(key.handle.clone(), key.id),
                        element: element.clone(),
                    })
            })
            .take(limit)
            .collect()
    }
}

impl fmt::Display for HandlespaceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.description())?;
        for pool in self.pools() {
            writeln!(f, "  {pool}")?;
            for element in pool.elements() {
                writeln!(f, "    {element}")?;
            }
        }
        Ok(())
    }
}

fn timer_key(key: &ElementKey, time_stamp: TimeStamp) -> TimerKey {
    TimerKey {
        time_stamp,
        handle: key.handle.clone(),
        id: key.id,
    }
}

fn ownership_key(key: &ElementKey, home: RegistrarId) -> OwnershipKey {
    OwnershipKey {
        home,
        handle: key.handle.clone(),
        id: key.id,
    }
}

fn connection_key(key: &ElementKey, connection: Connection) -> ConnectionKey {
    ConnectionKey {
        connection,
        handle: key.handle.clone(),
        id: key.id,
    }
}
