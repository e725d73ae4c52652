//! Domain layer: pools, pool elements, selection policies, the handlespace,
//! the peer list, takeover tracking and the event system.
//!
//! Everything in here is synchronous and single-owner; concurrency is
//! added by [`crate::service::RegistrarCore`].

pub mod checksum;
pub mod event_bus;
pub mod handlespace;
pub mod handlespace_event;
pub mod identifier;
pub mod peer;
pub mod peer_list;
pub mod policy;
pub mod policy_settings;
pub mod pool;
pub mod pool_element;
pub mod pool_handle;
pub mod takeover;
pub mod transport;

pub use checksum::ChecksumAccumulator;
pub use event_bus::EventBus;
pub use handlespace::{
    DEFAULT_NAME_TABLE_MAX_ENTRIES, ElementKey, HandlespaceNode, NameTableCursor, NameTableEntry,
    NameTableFlags, RegistrationOutcome,
};
pub use handlespace_event::{HandlespaceEvent, PoolElementUpdate, UpdateAction};
pub use identifier::{PoolElementId, RegistrarId, TIMER_INFINITE, TimeStamp};
pub use peer::{PeerFlags, PeerKey, PeerListNode, PeerStatus, PeerTimer, PeerTimerCode};
pub use peer_list::{PeerList, PeerRejected};
pub use policy::{PolicyType, SelectionPolicy};
pub use policy_settings::PolicySettings;
pub use pool::{AddOutcome, PoolNode};
pub use pool_element::{Connection, ElementFlags, ElementTimer, ElementTimerCode, PoolElementNode};
pub use pool_handle::PoolHandle;
pub use takeover::{TakeoverProcess, TakeoverProcessList};
pub use transport::{TransportAddressBlock, TransportProtocol};
