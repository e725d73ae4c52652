//! Pool element records and their per-element policy state.

use std::fmt;

use serde::Serialize;

use super::checksum::ChecksumAccumulator;
use super::identifier::{PoolElementId, RegistrarId, TimeStamp};
use super::policy::SelectionKey;
use super::policy_settings::PolicySettings;
use super::pool_handle::PoolHandle;
use super::transport::TransportAddressBlock;

bitflags::bitflags! {
    /// Bit set of pool element state flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct ElementFlags: u32 {
        /// Element is scheduled for removal by a marking pass.
        const MARKED = 1 << 0;
        /// The last re-registration changed the element.
        const UPDATED = 1 << 14;
        /// The last registration created the element.
        const NEW = 1 << 15;
    }
}

/// Reason for a pool element's pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementTimerCode {
    /// Registration lifetime ends.
    Expiry = 1000,
    /// A keep-alive must be sent to the element.
    KeepAliveTransmission = 1001,
    /// A sent keep-alive went unanswered.
    KeepAliveTimeout = 1002,
}

/// Pending timer of a pool element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElementTimer {
    /// Why the timer was started.
    pub code: ElementTimerCode,
    /// When the timer fires.
    pub time_stamp: TimeStamp,
}

/// Control connection over which a pool element registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Connection {
    /// Socket descriptor of the connection (positive).
    pub socket_descriptor: i32,
    /// SCTP association on that socket.
    pub assoc_id: u32,
}

/// One registered server of a pool.
///
/// Key fields (identifier, home registrar, timer, connection) are only
/// changed through the handlespace so that its indices stay consistent;
/// the remaining caller-owned fields have public setters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolElementNode {
    pub(crate) identifier: PoolElementId,
    pub(crate) home_registrar: RegistrarId,
    pub(crate) registration_life: u32,
    pub(crate) policy_settings: PolicySettings,
    pub(crate) flags: ElementFlags,

    pub(crate) seq_number: u64,
    pub(crate) round_counter: u32,
    pub(crate) virtual_counter: u32,
    pub(crate) degradation: u32,
    pub(crate) unreachability_reports: u32,
    pub(crate) selection_counter: u64,
    pub(crate) last_update_time_stamp: TimeStamp,

    pub(crate) timer: Option<ElementTimer>,
    pub(crate) last_keep_alive_transmission: TimeStamp,
    pub(crate) connection: Option<Connection>,

    pub(crate) user_transport: TransportAddressBlock,
    pub(crate) registrator_transport: Option<TransportAddressBlock>,
    pub(crate) user_data: Option<u64>,

    pub(crate) checksum: ChecksumAccumulator,

    #[serde(skip)]
    pub(crate) selection_key: Option<SelectionKey>,
}

impl PoolElementNode {
    /// Creates an unlinked pool element.
    #[must_use]
    pub fn new(
        identifier: PoolElementId,
        home_registrar: RegistrarId,
        registration_life: u32,
        policy_settings: PolicySettings,
        user_transport: TransportAddressBlock,
        registrator_transport: Option<TransportAddressBlock>,
        connection: Option<Connection>,
    ) -> Self {
        Self {
            identifier,
            home_registrar,
            registration_life,
            policy_settings,
            flags: ElementFlags::default(),
            seq_number: 0,
            round_counter: 0,
            virtual_counter: 0,
            degradation: 0,
            unreachability_reports: 0,
            selection_counter: 0,
            last_update_time_stamp: 0,
            timer: None,
            last_keep_alive_transmission: 0,
            connection,
            user_transport,
            registrator_transport,
            user_data: None,
            checksum: ChecksumAccumulator::INITIAL,
            selection_key: None,
        }
    }

    /// Pool element identifier.
    #[must_use]
    pub const fn identifier(&self) -> PoolElementId {
        self.identifier
    }

    /// Registrar owning this element.
    #[must_use]
    pub const fn home_registrar(&self) -> RegistrarId {
        self.home_registrar
    }

    /// Registration lifetime announced by the element.
    #[must_use]
    pub const fn registration_life(&self) -> u32 {
        self.registration_life
    }

    /// Current policy settings.
    #[must_use]
    pub const fn policy_settings(&self) -> &PolicySettings {
        &self.policy_settings
    }

    /// State flags.
    #[must_use]
    pub const fn flags(&self) -> ElementFlags {
        self.flags
    }

    /// Sequence number in the owning pool.
    #[must_use]
    pub const fn seq_number(&self) -> u64 {
        self.seq_number
    }

    /// Weighted round robin round.
    #[must_use]
    pub const fn round_counter(&self) -> u32 {
        self.round_counter
    }

    /// Weighted round robin selections left in the current round.
    #[must_use]
    pub const fn virtual_counter(&self) -> u32 {
        self.virtual_counter
    }

    /// Load degradation accumulated since the last update.
    #[must_use]
    pub const fn degradation(&self) -> u32 {
        self.degradation
    }

    /// Unreachability reports received for this element.
    #[must_use]
    pub const fn unreachability_reports(&self) -> u32 {
        self.unreachability_reports
    }

    /// How often this element has been selected.
    #[must_use]
    pub const fn selection_counter(&self) -> u64 {
        self.selection_counter
    }

    /// Time of the last registration or update.
    #[must_use]
    pub const fn last_update_time_stamp(&self) -> TimeStamp {
        self.last_update_time_stamp
    }

    /// Pending timer, if any.
    #[must_use]
    pub const fn timer(&self) -> Option<ElementTimer> {
        self.timer
    }

    /// Time the last keep-alive was sent.
    #[must_use]
    pub const fn last_keep_alive_transmission(&self) -> TimeStamp {
        self.last_keep_alive_transmission
    }

    /// Control connection, if the element registered over one.
    #[must_use]
    pub const fn connection(&self) -> Option<Connection> {
        self.connection
    }

    /// Transport under which users reach the element.
    #[must_use]
    pub const fn user_transport(&self) -> &TransportAddressBlock {
        &self.user_transport
    }

    /// Transport of the registrator, if known.
    #[must_use]
    pub const fn registrator_transport(&self) -> Option<&TransportAddressBlock> {
        self.registrator_transport.as_ref()
    }

    /// Opaque caller cookie.
    #[must_use]
    pub const fn user_data(&self) -> Option<u64> {
        self.user_data
    }

    /// Cached checksum contribution.
    #[must_use]
    pub const fn checksum(&self) -> ChecksumAccumulator {
        self.checksum
    }

    /// Replaces the caller cookie.
    pub fn set_user_data(&mut self, user_data: Option<u64>) {
        self.user_data = user_data;
    }

    /// Sets the unreachability report counter.
    pub fn set_unreachability_reports(&mut self, reports: u32) {
        self.unreachability_reports = reports;
    }

    /// Records a keep-alive transmission.
    pub fn set_last_keep_alive_transmission(&mut self, time_stamp: TimeStamp) {
        self.last_keep_alive_transmission = time_stamp;
    }

    /// Takes over the policy settings of a re-registration.
    ///
    /// Clears [`ElementFlags::MARKED`]. Returns `true` if the settings
    /// changed or degradation had accumulated; the selection key is then
    /// stale and the pool must relink the element.
    pub fn update(&mut self, source: &Self) -> bool {
        self.flags.remove(ElementFlags::MARKED);
        if !self.policy_settings.has_same_parameters(&source.policy_settings)
            || self.degradation != 0
        {
            self.policy_settings = source.policy_settings;
            self.degradation = 0;
            self.virtual_counter = self.virtual_counter.min(self.policy_settings.weight);
            self.flags.insert(ElementFlags::UPDATED);
            return true;
        }
        self.flags.remove(ElementFlags::UPDATED);
        false
    }

    /// Checksum contribution: the handle bytes followed by the identifier
    /// in network byte order.
    #[must_use]
    pub fn compute_checksum(&self, handle: &PoolHandle) -> ChecksumAccumulator {
        ChecksumAccumulator::INITIAL
            .compute(handle.as_bytes())
            .compute(&self.identifier.value().to_be_bytes())
    }
}

impl fmt::Display for PoolElementNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} home={} seq={} val={} selcnt={} flags={:#06x} {} [{}]",
            self.identifier,
            self.home_registrar,
            self.seq_number,
            self.virtual_counter,
            self.selection_counter,
            self.flags.bits(),
            self.policy_settings,
            self.user_transport
        )
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::domain::transport::TransportProtocol;

    pub(crate) fn sctp_transport(port: u16) -> TransportAddressBlock {
        TransportAddressBlock::new(
            TransportProtocol::Sctp,
            port,
            false,
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))],
        )
    }

    pub(crate) fn element(id: u32, settings: PolicySettings) -> PoolElementNode {
        PoolElementNode::new(
            PoolElementId::new(id),
            RegistrarId::UNDEFINED,
            5_000,
            settings,
            sctp_transport(7),
            None,
            None,
        )
    }

    #[test]
    fn flags_combine_and_serialize_by_name() {
        let flags = ElementFlags::NEW | ElementFlags::UPDATED;
        assert_eq!(flags.bits(), 0xc000);
        assert!(!flags.contains(ElementFlags::MARKED));
        assert_eq!(serde_json::to_string(&flags).unwrap_or_default(), "\"UPDATED | NEW\"");
        assert_eq!(ElementFlags::default(), ElementFlags::empty());
    }

    #[test]
    fn update_with_new_weight_clamps_virtual_counter() {
        let mut node = element(1, PolicySettings { weight: 7, ..PolicySettings::with_type(2) });
        node.virtual_counter = 7;
        node.flags.insert(ElementFlags::MARKED);
        let source = element(1, PolicySettings { weight: 3, ..PolicySettings::with_type(2) });
        assert!(node.update(&source));
        assert_eq!(node.policy_settings.weight, 3);
        assert_eq!(node.virtual_counter, 3);
        assert!(node.flags.contains(ElementFlags::UPDATED));
        assert!(!node.flags.contains(ElementFlags::MARKED));
    }

    #[test]
    fn unchanged_update_clears_updated_flag() {
        let settings = PolicySettings { weight: 3, ..PolicySettings::with_type(2) };
        let mut node = element(1, settings);
        node.flags.insert(ElementFlags::UPDATED);
        assert!(!node.update(&element(1, settings)));
        assert!(!node.flags.contains(ElementFlags::UPDATED));
    }

    #[test]
    fn pending_degradation_forces_update() {
        let settings = PolicySettings::with_type(0x4000_0002);
        let mut node = element(1, settings);
        node.degradation = 10;
        assert!(node.update(&element(1, settings)));
        assert_eq!(node.degradation, 0);
    }

    #[test]
    fn checksum_covers_handle_and_id_only() {
        let Ok(handle) = PoolHandle::try_from("EchoPool") else {
            panic!("valid handle");
        };
        let mut a = element(0x0102_0304, PolicySettings::with_type(1));
        let b = element(0x0102_0304, PolicySettings { weight: 9, ..PolicySettings::with_type(1) });
        a.home_registrar = RegistrarId::new(5);
        assert_eq!(a.compute_checksum(&handle), b.compute_checksum(&handle));
        let expected = ChecksumAccumulator::INITIAL
            .compute(b"EchoPool")
            .compute(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(a.compute_checksum(&handle), expected);
    }
}
