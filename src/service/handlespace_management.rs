//! Handlespace management: registration, resolution and expiry on top of
//! [`HandlespaceNode`].
//!
//! The management layer validates requests against the configured limits,
//! builds the pool template for new pools, keeps the element timers running
//! and hands removed nodes to the caller's disposers before they are
//! dropped.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::HandlespaceConfig;
use crate::domain::{
    ChecksumAccumulator, Connection, ElementKey, ElementTimerCode, HandlespaceNode,
    NameTableCursor, NameTableEntry, NameTableFlags, PolicySettings, PolicyType,
    PoolElementId, PoolElementNode, PoolElementUpdate, PoolHandle, PoolNode, RegistrarId,
    RegistrationOutcome, TimeStamp, TransportAddressBlock,
};
use crate::error::HandlespaceError;

/// Called once for every pool removed from the handlespace.
pub type PoolDisposer = Box<dyn FnMut(&PoolNode) + Send>;

/// Called once for every pool element removed from the handlespace.
pub type PoolElementDisposer = Box<dyn FnMut(&PoolHandle, &PoolElementNode) + Send>;

/// Parameters of one pool element registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Pool to register in.
    pub handle: PoolHandle,
    /// Home registrar of the element.
    pub home: RegistrarId,
    /// Element identifier.
    pub id: PoolElementId,
    /// Registration lifetime announced by the element.
    pub registration_life: u32,
    /// Policy parameters.
    pub policy_settings: PolicySettings,
    /// Addresses under which pool users reach the element.
    pub user_transport: TransportAddressBlock,
    /// Addresses of the registering endpoint, if known.
    pub registrator_transport: Option<TransportAddressBlock>,
    /// Control connection of the registration.
    pub connection: Option<Connection>,
}

/// Handlespace plus limits, selection RNG and disposers.
pub struct HandlespaceManagement {
    handlespace: HandlespaceNode,
    max_pool_elements: usize,
    rng: StdRng,
    pool_disposer: PoolDisposer,
    element_disposer: PoolElementDisposer,
}

impl fmt::Debug for HandlespaceManagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlespaceManagement")
            .field("handlespace", &self.handlespace)
            .field("max_pool_elements", &self.max_pool_elements)
            .finish_non_exhaustive()
    }
}

impl HandlespaceManagement {
    /// Creates an empty handlespace for the configured registrar.
    #[must_use]
    pub fn new(config: &HandlespaceConfig) -> Self {
        let mut handlespace = HandlespaceNode::new(config.registrar_id);
        handlespace.set_name_table_max_entries(config.name_table_max_entries);
        let rng = config
            .random_seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            handlespace,
            max_pool_elements: config.max_pool_elements,
            rng,
            pool_disposer: Box::new(|_: &PoolNode| {}),
            element_disposer: Box::new(|_: &PoolHandle, _: &PoolElementNode| {}),
        }
    }

    /// Installs the disposers for removed pools and pool elements.
    #[must_use]
    pub fn with_disposers(
        mut self,
        pool_disposer: PoolDisposer,
        element_disposer: PoolElementDisposer,
    ) -> Self {
        self.pool_disposer = pool_disposer;
        self.element_disposer = element_disposer;
        self
    }

    /// The managed handlespace.
    #[must_use]
    pub const fn handlespace(&self) -> &HandlespaceNode {
        &self.handlespace
    }

    /// Own registrar identifier.
    #[must_use]
    pub const fn home_registrar(&self) -> RegistrarId {
        self.handlespace.home_registrar()
    }

    /// Changes the own registrar identifier.
    pub fn set_home_registrar(&mut self, home: RegistrarId) {
        self.handlespace.set_home_registrar(home);
    }

    /// Enables or disables the update notification outbox.
    pub fn set_update_notifications(&mut self, enabled: bool) {
        self.handlespace.set_update_notifications(enabled);
    }

    /// Drains the update notifications collected since the last call.
    pub fn take_update_notifications(&mut self) -> Vec<PoolElementUpdate> {
        self.handlespace.take_update_notifications()
    }

    /// Registers a pool element or refreshes an existing registration.
    ///
    /// On success the element's update time stamp, registration life and
    /// transport addresses are taken from `registration`.
    ///
    /// # Errors
    ///
    /// * [`HandlespaceError::InvalidPoolPolicy`] for an unknown policy type.
    /// * [`HandlespaceError::OutOfResources`] when a new element would
    ///   exceed the configured maximum.
    /// * any compatibility error of the target pool.
    pub fn register_pool_element(
        &mut self,
        registration: Registration,
        now: TimeStamp,
    ) -> Result<RegistrationOutcome, HandlespaceError> {
        let Registration {
            handle,
            home,
            id,
            registration_life,
            policy_settings,
            user_transport,
            registrator_transport,
            connection,
        } = registration;

        let Some(policy) = PolicyType::from_code(policy_settings.policy_type) else {
            tracing::warn!(%handle, %id, policy_type = policy_settings.policy_type, "unknown pool policy");
            return Err(HandlespaceError::InvalidPoolPolicy);
        };
        let known = self.handlespace.find_pool_element(&handle, id).is_some();
        if !known
            && self.max_pool_elements != 0
            && self.handlespace.element_count() >= self.max_pool_elements
        {
            tracing::warn!(%handle, %id, max = self.max_pool_elements, "pool element limit reached");
            return Err(HandlespaceError::OutOfResources);
        }

        let template = PoolNode::new(
            handle.clone(),
            policy,
            user_transport.protocol,
            user_transport.control_channel,
        );
        let element = PoolElementNode::new(
            id,
            home,
            registration_life,
            policy_settings,
            user_transport.clone(),
            registrator_transport.clone(),
            connection,
        );
        let outcome = match self.handlespace.add_or_update_pool_element(template, element) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%handle, %id, %error, "pool element registration rejected");
                return Err(error);
            }
        };

        if let Some(stored) = self.handlespace.find_pool_element_mut(&handle, id) {
            stored.last_update_time_stamp = now;
            stored.registration_life = registration_life;
            stored.user_transport = user_transport;
            stored.registrator_transport = registrator_transport;
        }
        match &outcome {
            RegistrationOutcome::Inserted(key) => {
                tracing::info!(handle = %key.handle, id = %key.id, %home, "pool element registered");
            }
            RegistrationOutcome::Updated(key) => {
                tracing::debug!(handle = %key.handle, id = %key.id, %home, "pool element re-registered");
            }
        }
        Ok(outcome)
    }

    /// Removes a pool element, disposing of it and of its pool if that
    /// became empty.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub fn deregister_pool_element(
        &mut self,
        handle: &PoolHandle,
        id: PoolElementId,
    ) -> Result<(), HandlespaceError> {
        self.deregister_pool_element_by_key(&ElementKey::new(handle.clone(), id))
    }

    /// Removes the element at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub fn deregister_pool_element_by_key(
        &mut self,
        key: &ElementKey,
    ) -> Result<(), HandlespaceError> {
        let element = self
            .handlespace
            .remove_pool_element(key)
            .ok_or(HandlespaceError::NotFound)?;
        (self.element_disposer)(&key.handle, &element);
        drop(element);
        tracing::debug!(handle = %key.handle, id = %key.id, "pool element deregistered");

        if let Some(pool) = self.handlespace.remove_empty_pool(&key.handle) {
            (self.pool_disposer)(&pool);
            tracing::debug!(handle = %key.handle, "empty pool removed");
        }
        Ok(())
    }

    /// Looks up a pool element.
    #[must_use]
    pub fn find_pool_element(
        &self,
        handle: &PoolHandle,
        id: PoolElementId,
    ) -> Option<&PoolElementNode> {
        self.handlespace.find_pool_element(handle, id)
    }

    /// Looks up a pool element for changes of its caller-owned fields.
    pub fn find_pool_element_mut(
        &mut self,
        handle: &PoolHandle,
        id: PoolElementId,
    ) -> Option<&mut PoolElementNode> {
        self.handlespace.find_pool_element_mut(handle, id)
    }

    /// Looks up a pool.
    #[must_use]
    pub fn find_pool(&self, handle: &PoolHandle) -> Option<&PoolNode> {
        self.handlespace.find_pool(handle)
    }

    /// Selects up to `max_items` elements of `handle` by the pool's policy.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown pool.
    pub fn name_resolution(
        &mut self,
        handle: &PoolHandle,
        max_items: usize,
        max_increment: usize,
    ) -> Result<Vec<&PoolElementNode>, HandlespaceError> {
        let ids = self.handlespace.select_pool_element_nodes_by_policy(
            handle,
            max_items,
            max_increment,
            &mut self.rng,
        )?;
        let pool = self
            .handlespace
            .find_pool(handle)
            .ok_or(HandlespaceError::NotFound)?;
        Ok(ids.into_iter().filter_map(|id| pool.find(id)).collect())
    }

    /// Deregisters every element whose timer fired at or before `now`.
    ///
    /// Returns the number of purged elements.
    pub fn purge_expired_pool_elements(&mut self, now: TimeStamp) -> usize {
        let mut purged = 0;
        while let Some((time_stamp, key)) = self.handlespace.first_timer() {
            if time_stamp > now {
                break;
            }
            if self.deregister_pool_element_by_key(&key).is_err() {
                break;
            }
            tracing::debug!(handle = %key.handle, id = %key.id, time_stamp, "pool element expired");
            purged += 1;
        }
        purged
    }

    /// Restarts the expiry timer of `key` at its last update plus `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub fn restart_pool_element_expiry_timer(
        &mut self,
        key: &ElementKey,
        timeout: u64,
    ) -> Result<(), HandlespaceError> {
        self.handlespace.deactivate_timer(key)?;
        let last_update = self
            .handlespace
            .find_pool_element(&key.handle, key.id)
            .map(PoolElementNode::last_update_time_stamp)
            .ok_or(HandlespaceError::NotFound)?;
        self.handlespace.activate_timer(
            key,
            ElementTimerCode::Expiry,
            last_update.saturating_add(timeout),
        )
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
        self.handlespace.activate_timer(key, code, time_stamp)
    }

    /// Stops an element's timer.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub fn deactivate_timer(&mut self, key: &ElementKey) -> Result<(), HandlespaceError> {
        self.handlespace.deactivate_timer(key)
    }

    /// Earliest element timer, or [`TIMER_INFINITE`](crate::domain::TIMER_INFINITE).
    #[must_use]
    pub fn next_timer_time_stamp(&self) -> TimeStamp {
        self.handlespace.next_timer_time_stamp()
    }

    /// Returns the next name table page; see [`HandlespaceNode::get_name_table`].
    #[must_use]
    pub fn get_name_table(
        &self,
        cursor: &mut NameTableCursor,
        flags: NameTableFlags,
        max_entries: usize,
    ) -> Vec<NameTableEntry> {
        self.handlespace
            .get_name_table(self.home_registrar(), cursor, flags, max_entries)
    }

    /// Marks every element owned by `owner`.
    pub fn mark_pool_element_nodes(&mut self, owner: RegistrarId) -> usize {
        self.handlespace.mark_pool_element_nodes(owner)
    }

    /// Deregisters the elements of `owner` that were not refreshed since
    /// they were marked.
    pub fn purge_marked_pool_element_nodes(&mut self, owner: RegistrarId) -> usize {
        let keys = self.handlespace.marked_keys(owner);
        let purged = keys
            .iter()
            .filter(|key| self.deregister_pool_element_by_key(key).is_ok())
            .count();
        if purged > 0 {
            tracing::info!(%owner, purged, "purged marked pool elements");
        }
        purged
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
        self.handlespace.update_ownership(key, home)
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
        self.handlespace.update_connection(key, connection)
    }

    /// Elements registered over the given association.
    #[must_use]
    pub fn pool_elements_of_connection(
        &self,
        socket_descriptor: i32,
        assoc_id: u32,
    ) -> Vec<ElementKey> {
        self.handlespace.pool_elements_of_connection(Connection {
            socket_descriptor,
            assoc_id,
        })
    }

    /// Number of pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.handlespace.pool_count()
    }

    /// Number of pool elements.
    #[must_use]
    pub const fn element_count(&self) -> usize {
        self.handlespace.element_count()
    }

    /// Number of pool elements owned by this registrar.
    #[must_use]
    pub const fn owned_element_count(&self) -> usize {
        self.handlespace.owned_element_count()
    }

    /// Handlespace checksum.
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.handlespace.checksum()
    }

    /// Checksum over the elements this registrar owns.
    #[must_use]
    pub const fn ownership_checksum(&self) -> u16 {
        self.handlespace.ownership_checksum()
    }

    /// Checksum over the elements owned by `home`, recomputed.
    #[must_use]
    pub fn compute_ownership_checksum(&self, home: RegistrarId) -> ChecksumAccumulator {
        self.handlespace.compute_ownership_checksum(home)
    }

    /// Full consistency check.
    ///
    /// # Errors
    ///
    /// Describes the first inconsistency found.
    pub fn verify(&self) -> Result<(), String> {
        self.handlespace.verify()
    }

    /// Removes every pool and element, calling the disposers.
    pub fn clear(&mut self) {
        let pool_disposer = &mut self.pool_disposer;
        let element_disposer = &mut self.element_disposer;
        self.handlespace.clear(
            |pool| pool_disposer(pool),
            |handle, element| element_disposer(handle, element),
        );
    }

    /// One-line summary of the handlespace.
    #[must_use]
    pub fn description(&self) -> String {
        self.handlespace.description()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::ElementFlags;
    use crate::domain::pool_element::tests::sctp_transport;

    const OWN: RegistrarId = RegistrarId::new(1);

    fn config() -> HandlespaceConfig {
        HandlespaceConfig {
            registrar_id: OWN,
            random_seed: Some(7),
            ..HandlespaceConfig::default()
        }
    }

    fn handle(name: &str) -> PoolHandle {
        let Ok(handle) = PoolHandle::try_from(name) else {
            panic!("valid handle {name}");
        };
        handle
    }

    fn registration(pool: &str, id: u32, policy: u32) -> Registration {
        Registration {
            handle: handle(pool),
            home: OWN,
            id: PoolElementId::new(id),
            registration_life: 5_000,
            policy_settings: PolicySettings { weight: 1, ..PolicySettings::with_type(policy) },
            user_transport: sctp_transport(1000),
            registrator_transport: None,
            connection: None,
        }
    }

    fn register(management: &mut HandlespaceManagement, pool: &str, id: u32, now: TimeStamp) {
        let Ok(outcome) = management.register_pool_element(registration(pool, id, 1), now) else {
            panic!("element {id} must register");
        };
        let key = outcome.key().clone();
        let Ok(()) = management.restart_pool_element_expiry_timer(&key, 1_000) else {
            panic!("timer of {key} must start");
        };
    }

    #[test]
    fn registration_rejects_unknown_policy_and_limit() {
        let mut management = HandlespaceManagement::new(&HandlespaceConfig {
            max_pool_elements: 2,
            ..config()
        });
        assert_eq!(
            management
                .register_pool_element(registration("EchoPool", 1, 0xdead), 0)
                .err(),
            Some(HandlespaceError::InvalidPoolPolicy)
        );
        register(&mut management, "EchoPool", 1, 0);
        register(&mut management, "EchoPool", 2, 0);
        assert_eq!(
            management
                .register_pool_element(registration("EchoPool", 3, 1), 0)
                .err(),
            Some(HandlespaceError::OutOfResources)
        );
        let Ok(outcome) = management.register_pool_element(registration("EchoPool", 2, 1), 50) else {
            panic!("re-registration must pass the limit");
        };
        assert!(!outcome.is_inserted());
        assert_eq!(
            management
                .find_pool_element(&handle("EchoPool"), PoolElementId::new(2))
                .map(PoolElementNode::last_update_time_stamp),
            Some(50)
        );
        assert!(management.verify().is_ok());
    }

    fn weighted(id: u32, weight: u32) -> Registration {
        let mut request = registration("Pool-A", id, PolicyType::WeightedRoundRobin.code());
        request.policy_settings.weight = weight;
        request
    }

    #[test]
    fn reregistration_replaces_settings_of_the_single_element() {
        let mut management = HandlespaceManagement::new(&config());
        let Ok(outcome) = management.register_pool_element(weighted(5, 3), 0) else {
            panic!("first registration must succeed");
        };
        let key = outcome.key().clone();
        let Ok(()) = management.restart_pool_element_expiry_timer(&key, 1_000) else {
            panic!("timer of {key} must start");
        };
        let checksum = management.checksum();
        let ownership = management.ownership_checksum();
        let owned = management.compute_ownership_checksum(OWN);
        let timers = management.handlespace().timer_count();
        let Some(first) = management.find_pool_element(&key.handle, key.id) else {
            panic!("element must exist");
        };
        assert_eq!(first.virtual_counter(), 3);

        let Ok(RegistrationOutcome::Updated(updated)) =
            management.register_pool_element(weighted(5, 7), 20)
        else {
            panic!("re-registration must update the element");
        };
        assert_eq!(updated, key);
        assert_eq!(management.element_count(), 1);
        assert_eq!(management.find_pool(&key.handle).map(PoolNode::len), Some(1));
        let Some(stored) = management.find_pool_element(&key.handle, key.id) else {
            panic!("element must exist");
        };
        assert_eq!(stored.policy_settings().weight, 7);
        assert_eq!(stored.virtual_counter(), 3);
        assert_eq!(stored.last_update_time_stamp(), 20);
        assert!(stored.flags().contains(ElementFlags::UPDATED));
        assert!(!stored.flags().contains(ElementFlags::NEW));

        assert_eq!(management.checksum(), checksum);
        assert_eq!(management.ownership_checksum(), ownership);
        assert_eq!(management.compute_ownership_checksum(OWN), owned);
        assert_eq!(management.handlespace().timer_count(), timers);
        assert_eq!(management.next_timer_time_stamp(), 1_000);
        assert!(management.verify().is_ok());

        let Ok(_) = management.register_pool_element(weighted(5, 2), 30) else {
            panic!("re-registration must succeed");
        };
        let Some(shrunk) = management.find_pool_element(&key.handle, key.id) else {
            panic!("element must exist");
        };
        assert_eq!(shrunk.virtual_counter(), 2);
        assert_eq!(management.element_count(), 1);
        assert!(management.verify().is_ok());
    }

    #[test]
    fn deregistration_disposes_element_then_pool() {
        let pools = Arc::new(AtomicUsize::new(0));
        let elements = Arc::new(AtomicUsize::new(0));
        let pool_counter = Arc::clone(&pools);
        let element_counter = Arc::clone(&elements);
        let mut management = HandlespaceManagement::new(&config()).with_disposers(
            Box::new(move |_: &PoolNode| {
                pool_counter.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |_: &PoolHandle, _: &PoolElementNode| {
                element_counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        register(&mut management, "EchoPool", 1, 0);
        register(&mut management, "EchoPool", 2, 0);

        let Ok(()) = management.deregister_pool_element(&handle("EchoPool"), PoolElementId::new(1))
        else {
            panic!("element 1 is registered");
        };
        assert_eq!(elements.load(Ordering::SeqCst), 1);
        assert_eq!(pools.load(Ordering::SeqCst), 0);
        assert_eq!(
            management.deregister_pool_element(&handle("EchoPool"), PoolElementId::new(1)),
            Err(HandlespaceError::NotFound)
        );

        let Ok(()) = management.deregister_pool_element(&handle("EchoPool"), PoolElementId::new(2))
        else {
            panic!("element 2 is registered");
        };
        assert_eq!(elements.load(Ordering::SeqCst), 2);
        assert_eq!(pools.load(Ordering::SeqCst), 1);
        assert!(management.find_pool(&handle("EchoPool")).is_none());
        assert!(management.verify().is_ok());
    }

    #[test]
    fn purge_stops_at_first_live_timer() {
        let mut management = HandlespaceManagement::new(&config());
        register(&mut management, "A", 1, 0);
        register(&mut management, "A", 2, 500);
        register(&mut management, "B", 3, 200);
        assert_eq!(management.next_timer_time_stamp(), 1_000);

        assert_eq!(management.purge_expired_pool_elements(999), 0);
        assert_eq!(management.purge_expired_pool_elements(1_200), 2);
        assert_eq!(management.element_count(), 1);
        assert!(management.find_pool(&handle("B")).is_none());
        assert_eq!(management.next_timer_time_stamp(), 1_500);
        assert_eq!(management.purge_expired_pool_elements(u64::MAX - 1), 1);
        assert_eq!(management.next_timer_time_stamp(), u64::MAX);
        assert_eq!(management.pool_count(), 0);
    }

    #[test]
    fn name_resolution_follows_round_robin() {
        let mut management = HandlespaceManagement::new(&config());
        for id in 1..=3 {
            register(&mut management, "EchoPool", id, 0);
        }
        let mut seen = Vec::new();
        for _ in 0..6 {
            let Ok(selected) = management.name_resolution(&handle("EchoPool"), 1, 1) else {
                panic!("pool exists");
            };
            seen.extend(selected.iter().map(|element| element.identifier().value()));
        }
        assert_eq!(seen, vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(
            management.name_resolution(&handle("Missing"), 1, 1).err(),
            Some(HandlespaceError::NotFound)
        );
    }

    #[test]
    fn marked_elements_are_purged_unless_refreshed() {
        let mut management = HandlespaceManagement::new(&config());
        for id in 1..=4 {
            register(&mut management, "EchoPool", id, 0);
        }
        assert_eq!(management.mark_pool_element_nodes(OWN), 4);
        let Ok(_) = management.register_pool_element(registration("EchoPool", 2, 1), 10) else {
            panic!("refresh must succeed");
        };
        assert_eq!(management.purge_marked_pool_element_nodes(OWN), 3);
        assert_eq!(management.element_count(), 1);
        assert!(
            management
                .find_pool_element(&handle("EchoPool"), PoolElementId::new(2))
                .is_some()
        );
        assert!(management.verify().is_ok());
    }

    #[test]
    fn connection_lookup_and_clear() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disposed);
        let mut management = HandlespaceManagement::new(&config()).with_disposers(
            Box::new(|_: &PoolNode| {}),
            Box::new(move |_: &PoolHandle, _: &PoolElementNode| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        for id in 1..=3 {
            let mut request = registration("EchoPool", id, 1);
            request.connection = Some(Connection {
                socket_descriptor: 4,
                assoc_id: id % 2,
            });
            let Ok(_) = management.register_pool_element(request, 0) else {
                panic!("element {id} must register");
            };
        }
        let keys = management.pool_elements_of_connection(4, 1);
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|key| key.id.value() % 2 == 1));

        management.clear();
        assert_eq!(disposed.load(Ordering::SeqCst), 3);
        assert_eq!(management.element_count(), 0);
        assert!(management.pool_elements_of_connection(4, 1).is_empty());
        assert!(management.description().contains("0 PoolElements"));
    }
}
