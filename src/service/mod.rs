//! Service layer: handlespace and peer list management plus the shared
//! registrar core.
//!
//! [`RegistrarCore`] serializes every operation behind one lock and emits
//! the resulting changes through the [`super::domain::EventBus`].

pub mod handlespace_management;
pub mod peer_list_management;
pub mod registrar_core;

pub use handlespace_management::{
    HandlespaceManagement, PoolDisposer, PoolElementDisposer, Registration,
};
pub use peer_list_management::{PeerDisposer, PeerListManagement};
pub use registrar_core::{MaintenanceReport, RegistrarCore, RegistrarState};
