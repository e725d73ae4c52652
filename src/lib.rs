//! # rserpool-handlespace
//!
//! Handlespace management core for RSerPool registrars.
//!
//! A registrar keeps the handlespace: every pool it knows, the pool
//! elements registered in each pool and the policy that picks elements for
//! name resolution. It also tracks its peer registrars, the per-peer
//! ownership checksums used to detect divergence, and takeovers of failed
//! peers. Protocol handling (ASAP/ENRP messages, sockets) lives outside
//! this crate; callers drive it with decoded requests and a clock.
//!
//! ## Architecture
//!
//! ```text
//! Protocol tasks (ASAP, ENRP)
//!     │
//!     ├── RegistrarCore (service/)  ── EventBus (domain/)
//!     │
//!     ├── HandlespaceManagement     ├── PeerListManagement
//!     │       │                     │       │
//!     │   HandlespaceNode           │   PeerList
//!     │       │                     │
//!     │   PoolNode ── SelectionPolicy
//!     │       │
//!     │   PoolElementNode
//!     │
//!     └── OrderedIndex (index/)
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod index;
pub mod service;
