//! Ordered index engine shared by every storage of the handlespace.

pub mod ordered_index;

pub use ordered_index::{Iter, OrderedIndex};
