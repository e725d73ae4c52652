//! Per-element pool policy parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Policy parameters announced by a pool element at registration.
///
/// `policy_type` is the raw policy code; it is interpreted by
/// [`PolicyType::from_code`](super::PolicyType::from_code). All numeric
/// parameters span the full `u32` range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Raw policy type code.
    pub policy_type: u32,
    /// Weight for weighted policies.
    pub weight: u32,
    /// Current load, scaled to `0..=u32::MAX`.
    pub load: u32,
    /// Load increment applied per selection by degradation policies.
    pub load_degradation: u32,
    /// Load distance penalty factor.
    pub load_dpf: u32,
    /// Weight distance penalty factor.
    pub weight_dpf: u32,
    /// Distance between the element and the registrar.
    pub distance: u32,
}

impl PolicySettings {
    /// Settings for `policy_type` with every parameter zeroed.
    #[must_use]
    pub const fn with_type(policy_type: u32) -> Self {
        Self {
            policy_type,
            weight: 0,
            load: 0,
            load_degradation: 0,
            load_dpf: 0,
            weight_dpf: 0,
            distance: 0,
        }
    }

    /// Compares every parameter except the policy type.
    #[must_use]
    pub const fn has_same_parameters(&self, other: &Self) -> bool {
        self.weight == other.weight
            && self.load == other.load
            && self.load_degradation == other.load_degradation
            && self.load_dpf == other.load_dpf
            && self.weight_dpf == other.weight_dpf
            && self.distance == other.distance
    }

    /// Every representable parameter combination is valid.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        true
    }

    /// Returns `true` if these settings can be used by a pool of
    /// `policy_type`.
    #[must_use]
    pub const fn adapt(&self, policy_type: u32) -> bool {
        self.policy_type == policy_type
    }
}

impl fmt::Display for PolicySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "policy=${:08x} weight={} load={} loaddeg={} loaddpf={} weightdpf={} distance={}",
            self.policy_type,
            self.weight,
            self.load,
            self.load_degradation,
            self.load_dpf,
            self.weight_dpf,
            self.distance
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_parameters_ignores_type() {
        let a = PolicySettings {
            weight: 3,
            ..PolicySettings::with_type(2)
        };
        let b = PolicySettings {
            weight: 3,
            ..PolicySettings::with_type(1)
        };
        assert!(a.has_same_parameters(&b));
        assert!(!a.has_same_parameters(&PolicySettings { weight: 4, ..a }));
    }

    #[test]
    fn adapt_requires_equal_type() {
        let settings = PolicySettings::with_type(0x4000_0001);
        assert!(settings.adapt(0x4000_0001));
        assert!(!settings.adapt(0x1));
        assert!(settings.is_valid());
    }
}
