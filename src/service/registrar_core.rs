//! Registrar core: the shared, lock-protected registrar state.
//!
//! Every mutation follows the same pattern: lock the state, run the
//! operation, feed the handlespace notifications into the peer ownership
//! checksums, publish the resulting events and optionally verify all
//! structures.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;

use super::handlespace_management::{HandlespaceManagement, Registration};
use super::peer_list_management::PeerListManagement;
use crate::config::HandlespaceConfig;
use crate::domain::{
    EventBus, HandlespaceEvent, PeerFlags, PeerKey, PoolElementId, PoolElementNode, PoolHandle,
    RegistrarId, RegistrationOutcome, TIMER_INFINITE, TakeoverProcess, TakeoverProcessList,
    TimeStamp, TransportAddressBlock, UpdateAction,
};
use crate::error::HandlespaceError;

/// Upper bound for one maintenance sleep, so new timers are picked up.
const MAX_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a registrar keeps about the handlespace and its peers.
#[derive(Debug)]
pub struct RegistrarState {
    /// Pools and pool elements.
    pub handlespace: HandlespaceManagement,
    /// Peer registrars.
    pub peers: PeerListManagement,
    /// Running takeovers of failed peers.
    pub takeovers: TakeoverProcessList,
}

impl RegistrarState {
    /// Turns the pending handlespace notifications into peer checksum
    /// updates and events.
    fn drain_notifications(&mut self) -> Vec<HandlespaceEvent> {
        let timestamp = Utc::now();
        let mut events = Vec::new();
        let mut emptied = BTreeSet::new();
        for update in self.handlespace.take_update_notifications() {
            self.peers.apply_handlespace_update(&update);
            if update.action == UpdateAction::Delete
                && self.handlespace.find_pool(&update.key.handle).is_none()
            {
                emptied.insert(update.key.handle.clone());
            }
            events.push(HandlespaceEvent::from_update(&update, timestamp));
        }
        events.extend(
            emptied
                .into_iter()
                .map(|handle| HandlespaceEvent::PoolRemoved { handle, timestamp }),
        );
        events
    }

    fn verify(&self) -> Result<(), String> {
        self.handlespace.verify()?;
        self.peers.verify()?;
        self.takeovers.verify()?;
        self.peers
            .verify_ownership_checksums(self.handlespace.handlespace())
    }
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Pool elements whose expiry timer fired.
    pub pool_elements: usize,
    /// Peers that stopped responding.
    pub peers: usize,
    /// Takeovers that expired before every peer acknowledged.
    pub takeovers: usize,
}

/// Shared handle to the registrar state and its event bus.
#[derive(Debug, Clone)]
pub struct RegistrarCore {
    state: Arc<Mutex<RegistrarState>>,
    event_bus: EventBus,
    config: Arc<HandlespaceConfig>,
}

impl RegistrarCore {
    /// Builds an empty registrar from `config`.
    ///
    /// An unassigned registrar identifier is replaced by a random non-zero
    /// one.
    #[must_use]
    pub fn new(mut config: HandlespaceConfig) -> Self {
        if config.registrar_id.is_undefined() {
            config.registrar_id = RegistrarId::new(rand::thread_rng().gen_range(1..=u32::MAX));
            tracing::info!(registrar = %config.registrar_id, "picked random registrar identifier");
        }
        let mut handlespace = HandlespaceManagement::new(&config);
        handlespace.set_update_notifications(true);
        let state = RegistrarState {
            handlespace,
            peers: PeerListManagement::new(config.registrar_id, config.max_peers),
            takeovers: TakeoverProcessList::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            event_bus: EventBus::new(config.event_bus_capacity),
            config: Arc::new(config),
        }
    }

    /// Current time in microseconds since the Unix epoch.
    #[must_use]
    pub fn now() -> TimeStamp {
        u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
    }

    /// Event bus carrying every state change.
    #[must_use]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Configuration the core was built from.
    #[must_use]
    pub fn config(&self) -> &HandlespaceConfig {
        &self.config
    }

    /// Own registrar identifier.
    pub async fn registrar_id(&self) -> RegistrarId {
        self.state.lock().await.handlespace.home_registrar()
    }

    /// Summary of handlespace and peer list.
    pub async fn description(&self) -> String {
        let state = self.state.lock().await;
        format!(
            "{}; {}",
            state.handlespace.description(),
            state.peers.description()
        )
    }

    /// Runs `operation` on the locked state.
    pub async fn with_state<T>(&self, operation: impl FnOnce(&RegistrarState) -> T) -> T {
        let state = self.state.lock().await;
        operation(&state)
    }

    /// Registers a pool element and starts its expiry timer.
    ///
    /// # Errors
    ///
    /// Returns the registration error of
    /// [`HandlespaceManagement::register_pool_element`].
    pub async fn register_pool_element(
        &self,
        registration: Registration,
    ) -> Result<RegistrationOutcome, HandlespaceError> {
        let now = Self::now();
        let mut state = self.state.lock().await;
        let created_pool = state.handlespace.find_pool(&registration.handle).is_none();
        let outcome = state.handlespace.register_pool_element(registration, now)?;
        state.handlespace.restart_pool_element_expiry_timer(
            outcome.key(),
            self.config.pool_element_expiry_timeout_us,
        )?;

        let mut events = Vec::new();
        if created_pool
            && let Some(pool) = state.handlespace.find_pool(&outcome.key().handle)
        {
            events.push(HandlespaceEvent::PoolCreated {
                handle: pool.handle().clone(),
                policy: pool.policy(),
                timestamp: Utc::now(),
            });
        }
        events.extend(state.drain_notifications());
        self.finish(&state, events);
        Ok(outcome)
    }

    /// Deregisters a pool element.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown element.
    pub async fn deregister_pool_element(
        &self,
        handle: &PoolHandle,
        id: PoolElementId,
    ) -> Result<(), HandlespaceError> {
        let mut state = self.state.lock().await;
        state.handlespace.deregister_pool_element(handle, id)?;
        let events = state.drain_notifications();
        self.finish(&state, events);
        Ok(())
    }

    /// Copy of a pool element.
    pub async fn find_pool_element(
        &self,
        handle: &PoolHandle,
        id: PoolElementId,
    ) -> Option<PoolElementNode> {
        let state = self.state.lock().await;
        state.handlespace.find_pool_element(handle, id).cloned()
    }

    /// Selects pool elements of `handle` by the pool's policy.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown pool.
    pub async fn name_resolution(
        &self,
        handle: &PoolHandle,
        max_items: usize,
        max_increment: usize,
    ) -> Result<Vec<PoolElementNode>, HandlespaceError> {
        let mut state = self.state.lock().await;
        let selected = state
            .handlespace
            .name_resolution(handle, max_items, max_increment)?;
        Ok(selected.into_iter().cloned().collect())
    }

    /// Registers a peer registrar and starts its no-response timer.
    ///
    /// # Errors
    ///
    /// Returns the error of [`PeerListManagement::register_peer`].
    pub async fn register_peer(
        &self,
        identifier: RegistrarId,
        flags: PeerFlags,
        address: &TransportAddressBlock,
    ) -> Result<PeerKey, HandlespaceError> {
        let now = Self::now();
        let mut state = self.state.lock().await;
        let RegistrarState {
            handlespace, peers, ..
        } = &mut *state;
        let key = peers.register_peer(
            identifier,
            flags,
            address,
            now,
            Some(handlespace.handlespace()),
        )?;
        if !key.identifier().is_undefined() {
            peers.restart_peer_expiry_timer(&key, self.config.peer_max_time_no_response_us)?;
        }
        let events = vec![HandlespaceEvent::PeerRegistered {
            registrar: key.identifier(),
            timestamp: Utc::now(),
        }];
        self.finish(&state, events);
        Ok(key)
    }

    /// Deregisters a peer registrar.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] for an unknown peer.
    pub async fn deregister_peer(
        &self,
        identifier: RegistrarId,
        address: Option<&TransportAddressBlock>,
    ) -> Result<(), HandlespaceError> {
        let mut state = self.state.lock().await;
        state.peers.deregister_peer(identifier, address)?;
        let events = vec![HandlespaceEvent::PeerRemoved {
            registrar: identifier,
            timestamp: Utc::now(),
        }];
        self.finish(&state, events);
        Ok(())
    }

    /// Starts the takeover of `target` and returns the number of
    /// acknowledgements required.
    ///
    /// # Errors
    ///
    /// * [`HandlespaceError::InvalidId`] for the undefined or own identifier.
    /// * [`HandlespaceError::DuplicateId`] if a takeover of `target` runs.
    pub async fn begin_takeover(&self, target: RegistrarId) -> Result<usize, HandlespaceError> {
        let mut state = self.state.lock().await;
        if target.is_undefined() || target == state.handlespace.home_registrar() {
            return Err(HandlespaceError::InvalidId);
        }
        let expiry = Self::now().saturating_add(self.config.takeover_expiry_timeout_us);
        let RegistrarState {
            peers, takeovers, ..
        } = &mut *state;
        let outstanding = takeovers
            .create(target, peers.list(), expiry)?
            .outstanding_acknowledgements();
        tracing::info!(%target, outstanding, "takeover started");

        let events = vec![HandlespaceEvent::TakeoverCreated {
            target,
            outstanding,
            timestamp: Utc::now(),
        }];
        self.finish(&state, events);
        Ok(outstanding)
    }

    /// Records a takeover acknowledgement.
    ///
    /// Once every peer acknowledged, the target's pool elements are moved
    /// to this registrar, the target is removed from the peer list and
    /// `true` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::NotFound`] if no takeover of `target`
    /// runs.
    pub async fn acknowledge_takeover(
        &self,
        target: RegistrarId,
        acknowledger: RegistrarId,
    ) -> Result<bool, HandlespaceError> {
        let mut state = self.state.lock().await;
        if state.takeovers.find(target).is_none() {
            return Err(HandlespaceError::NotFound);
        }
        state.takeovers.acknowledge(target, acknowledger);
        let complete = state
            .takeovers
            .find(target)
            .is_some_and(TakeoverProcess::is_complete);
        tracing::debug!(%target, %acknowledger, complete, "takeover acknowledged");
        if !complete {
            return Ok(false);
        }

        state.takeovers.remove(target);
        let own = state.handlespace.home_registrar();
        let keys = state.handlespace.handlespace().owned_keys(target);
        for key in &keys {
            state.handlespace.update_ownership(key, own)?;
        }
        if state.peers.deregister_peer(target, None).is_err() {
            tracing::debug!(%target, "taken over peer already gone");
        }
        tracing::info!(%target, pool_elements = keys.len(), "takeover completed");

        let mut events = state.drain_notifications();
        events.push(HandlespaceEvent::TakeoverCompleted {
            target,
            timestamp: Utc::now(),
        });
        self.finish(&state, events);
        Ok(true)
    }

    /// Purges everything whose timer fired at or before `now`.
    pub async fn purge_expired(&self, now: TimeStamp) -> MaintenanceReport {
        let mut state = self.state.lock().await;
        let timestamp = Utc::now();
        let pool_elements = state.handlespace.purge_expired_pool_elements(now);

        let silent: Vec<RegistrarId> = state
            .peers
            .list()
            .expired(now)
            .iter()
            .map(PeerKey::identifier)
            .collect();
        let peers = state.peers.purge_expired_peers(now);

        let mut takeovers = 0;
        let mut dropped = Vec::new();
        while state.takeovers.next_timer_time_stamp() <= now {
            let Some(target) = state.takeovers.earliest().map(TakeoverProcess::target) else {
                break;
            };
            if let Some(process) = state.takeovers.remove(target) {
                tracing::warn!(
                    %target,
                    outstanding = process.outstanding_acknowledgements(),
                    "takeover expired"
                );
            }
            if state.peers.deregister_peer(target, None).is_ok() {
                dropped.push(target);
            }
            takeovers += 1;
        }

        let mut events = state.drain_notifications();
        events.extend(
            silent
                .into_iter()
                .chain(dropped)
                .map(|registrar| HandlespaceEvent::PeerRemoved {
                    registrar,
                    timestamp,
                }),
        );
        self.finish(&state, events);

        let report = MaintenanceReport {
            pool_elements,
            peers,
            takeovers,
        };
        if report != MaintenanceReport::default() {
            tracing::debug!(?report, "maintenance pass");
        }
        report
    }

    /// Earliest pending timer over pool elements, peers and takeovers.
    pub async fn next_timer_time_stamp(&self) -> TimeStamp {
        let state = self.state.lock().await;
        state
            .handlespace
            .next_timer_time_stamp()
            .min(state.peers.next_timer_time_stamp())
            .min(state.takeovers.next_timer_time_stamp())
    }

    /// Purges expired entries until `shutdown` completes.
    ///
    /// Sleeps until the earliest timer, but at least the configured
    /// minimum interval and at most one second.
    pub async fn run_maintenance(&self, shutdown: impl Future<Output = ()>) {
        let min_interval = Duration::from_millis(self.config.maintenance_min_interval_ms);
        tokio::pin!(shutdown);
        loop {
            let next = self.next_timer_time_stamp().await;
            let delay = if next == TIMER_INFINITE {
                MAX_MAINTENANCE_INTERVAL
            } else {
                Duration::from_micros(next.saturating_sub(Self::now()))
                    .clamp(min_interval, MAX_MAINTENANCE_INTERVAL.max(min_interval))
            };
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(delay) => {
                    self.purge_expired(Self::now()).await;
                }
            }
        }
        tracing::info!("maintenance stopped");
    }

    fn finish(&self, state: &RegistrarState, events: Vec<HandlespaceEvent>) {
        for event in events {
            let _ = self.event_bus.publish(event);
        }
        if self.config.verify_after_mutation
            && let Err(problem) = state.verify()
        {
            tracing::error!(%problem, "registrar state inconsistent");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::domain::peer::tests::peer_address;
    use crate::domain::pool_element::tests::sctp_transport;
    use crate::domain::{PolicySettings, PolicyType};

    const OWN: RegistrarId = RegistrarId::new(0x100);

    fn core() -> RegistrarCore {
        RegistrarCore::new(HandlespaceConfig {
            registrar_id: OWN,
            random_seed: Some(11),
            verify_after_mutation: true,
            maintenance_min_interval_ms: 1,
            ..HandlespaceConfig::default()
        })
    }

    fn handle() -> PoolHandle {
        let Ok(handle) = PoolHandle::try_from("EchoPool") else {
            panic!("valid handle");
        };
        handle
    }

    fn registration(id: u32, home: RegistrarId) -> Registration {
        Registration {
            handle: handle(),
            home,
            id: PoolElementId::new(id),
            registration_life: 5_000,
            policy_settings: PolicySettings::with_type(PolicyType::RoundRobin.code()),
            user_transport: sctp_transport(2000),
            registrator_transport: None,
            connection: None,
        }
    }

    #[tokio::test]
    async fn registration_publishes_pool_and_element_events() {
        let core = core();
        let mut events = core.event_bus().subscribe();

        let Ok(outcome) = core.register_pool_element(registration(1, OWN)).await else {
            panic!("registration must succeed");
        };
        assert!(outcome.is_inserted());
        let Ok(HandlespaceEvent::PoolCreated { policy, .. }) = events.recv().await else {
            panic!("expected PoolCreated");
        };
        assert_eq!(policy, PolicyType::RoundRobin);
        let Ok(HandlespaceEvent::PoolElementCreated { id, home, .. }) = events.recv().await else {
            panic!("expected PoolElementCreated");
        };
        assert_eq!((id, home), (PoolElementId::new(1), OWN));

        let Ok(()) = core.deregister_pool_element(&handle(), PoolElementId::new(1)).await else {
            panic!("deregistration must succeed");
        };
        let Ok(HandlespaceEvent::PoolElementRemoved { .. }) = events.recv().await else {
            panic!("expected PoolElementRemoved");
        };
        let Ok(HandlespaceEvent::PoolRemoved { handle: removed, .. }) = events.recv().await else {
            panic!("expected PoolRemoved");
        };
        assert_eq!(removed, handle());
        assert_eq!(
            core.deregister_pool_element(&handle(), PoolElementId::new(1)).await,
            Err(HandlespaceError::NotFound)
        );
    }

    #[tokio::test]
    async fn expired_elements_are_purged() {
        let core = core();
        for id in 1..=3 {
            let Ok(_) = core.register_pool_element(registration(id, OWN)).await else {
                panic!("element {id} must register");
            };
        }
        let Ok(selected) = core.name_resolution(&handle(), 3, 3).await else {
            panic!("pool exists");
        };
        assert_eq!(selected.len(), 3);
        assert_ne!(core.next_timer_time_stamp().await, TIMER_INFINITE);

        let report = core.purge_expired(RegistrarCore::now()).await;
        assert_eq!(report.pool_elements, 0);
        let report = core.purge_expired(TIMER_INFINITE - 1).await;
        assert_eq!(report.pool_elements, 3);
        assert!(core.find_pool_element(&handle(), PoolElementId::new(1)).await.is_none());
        assert_eq!(core.next_timer_time_stamp().await, TIMER_INFINITE);
    }

    #[tokio::test]
    async fn completed_takeover_moves_ownership() {
        let core = core();
        let target = RegistrarId::new(0x200);
        let witness = RegistrarId::new(0x300);
        for (id, octet) in [(target, 1), (witness, 2)] {
            let Ok(_) = core.register_peer(id, PeerFlags::DYNAMIC, &peer_address(octet)).await else {
                panic!("peer {id} must register");
            };
        }
        for id in 1..=2 {
            let Ok(_) = core.register_pool_element(registration(id, target)).await else {
                panic!("element {id} must register");
            };
        }

        assert_eq!(core.begin_takeover(target).await, Ok(1));
        assert_eq!(core.begin_takeover(target).await, Err(HandlespaceError::DuplicateId));
        assert_eq!(core.begin_takeover(OWN).await, Err(HandlespaceError::InvalidId));
        assert_eq!(core.acknowledge_takeover(target, RegistrarId::new(0x999)).await, Ok(false));
        assert_eq!(core.acknowledge_takeover(target, witness).await, Ok(true));
        assert_eq!(
            core.acknowledge_takeover(target, witness).await,
            Err(HandlespaceError::NotFound)
        );

        let owned = core
            .with_state(|state| state.handlespace.owned_element_count())
            .await;
        assert_eq!(owned, 2);
        let Some(element) = core.find_pool_element(&handle(), PoolElementId::new(2)).await else {
            panic!("element 2 stays registered");
        };
        assert_eq!(element.home_registrar(), OWN);
        let peers = core.with_state(|state| state.peers.peer_count()).await;
        assert_eq!(peers, 1);
        let consistent = core.with_state(RegistrarState::verify).await;
        assert!(consistent.is_ok());
    }

    #[tokio::test]
    async fn maintenance_stops_on_shutdown() {
        let core = core();
        let (stop, stopped) = oneshot::channel::<()>();
        let worker = {
            let core = core.clone();
            tokio::spawn(async move {
                core.run_maintenance(async {
                    let _ = stopped.await;
                })
                .await;
            })
        };
        let Ok(_) = core.register_pool_element(registration(1, OWN)).await else {
            panic!("registration must succeed");
        };
        let _ = stop.send(());
        assert!(worker.await.is_ok());
        assert!(core.description().await.contains("1 PoolElements"));
    }

    #[test]
    fn clock_is_after_epoch() {
        let now = RegistrarCore::now();
        assert!(now > 1_600_000_000_000_000);
        let core = core();
        let id = tokio_test::block_on(core.registrar_id());
        assert_eq!(id, OWN);
    }

    #[test]
    fn unassigned_identifier_is_replaced() {
        let core = RegistrarCore::new(HandlespaceConfig::default());
        assert!(!core.config().registrar_id.is_undefined());
        let id = tokio_test::block_on(core.registrar_id());
        assert_eq!(id, core.config().registrar_id);
    }
}
