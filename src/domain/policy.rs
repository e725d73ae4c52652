//! Pool policies: selection orderings and their per-element hooks.
//!
//! Every pool is created with one [`PolicyType`]. The matching
//! [`SelectionPolicy`] decides how elements are ordered in the pool's
//! selection index ([`SelectionPolicy::selection_key`]), which weight they
//! carry in the value tree ([`SelectionPolicy::selection_value`]) and which
//! counters change when an element is handed out.
//!
//! Two strategies exist:
//!
//! - [`SelectionStrategy::SortingOrder`] hands out the first `n` entries of
//!   the selection order.
//! - [`SelectionStrategy::ValueTree`] draws `n` distinct entries at random,
//!   each with probability proportional to its selection value.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identifier::PoolElementId;
use super::pool::PoolNode;
use super::pool_element::PoolElementNode;

/// Upper bound of load, weight and penalty values.
pub const POLICY_VALUE_MAX: u32 = u32::MAX;

/// Position of an element in its pool's selection index.
///
/// Unused components are zero; the identifier makes every key unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SelectionKey {
    /// Most significant ordering component.
    pub primary: u64,
    /// Second ordering component.
    pub secondary: u64,
    /// Third ordering component.
    pub tertiary: u64,
    /// Tie breaker.
    pub id: PoolElementId,
}

impl SelectionKey {
    /// Builds a key from its components.
    #[must_use]
    pub const fn new(primary: u64, secondary: u64, tertiary: u64, id: PoolElementId) -> Self {
        Self {
            primary,
            secondary,
            tertiary,
            id,
        }
    }

    fn by_id(element: &PoolElementNode) -> Self {
        Self::new(0, 0, 0, element.identifier)
    }

    fn by_value_then_seq(value: u64, element: &PoolElementNode) -> Self {
        Self::new(value, element.seq_number, 0, element.identifier)
    }
}

/// How a policy picks elements out of the selection index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Take entries in selection order.
    SortingOrder,
    /// Weighted random draw over selection values.
    ValueTree,
}

/// Pool policy identified by its registered policy code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    /// Cyclic order.
    RoundRobin,
    /// Cyclic order, `weight` selections per round.
    WeightedRoundRobin,
    /// Uniform random draw.
    Random,
    /// Random draw proportional to weight.
    WeightedRandom,
    /// Highest weight first.
    Priority,
    /// Lowest load first.
    LeastUsed,
    /// Lowest load plus accumulated degradation first.
    LeastUsedDegradation,
    /// Lowest load plus announced load degradation first.
    PriorityLeastUsed,
    /// Random draw favouring low load.
    RandomizedLeastUsed,
    /// Random draw favouring low load plus load degradation.
    RandomizedPriorityLeastUsed,
    /// Random draw favouring low load plus degradation.
    RandomizedLeastUsedDegradation,
    /// Lowest load, load degradation and degradation first.
    PriorityLeastUsedDegradation,
    /// Random draw favouring low load, load degradation and degradation.
    RandomizedPriorityLeastUsedDegradation,
    /// Weighted random with distance penalty.
    WeightedRandomDpf,
    /// Least used with distance penalty.
    LeastUsedDpf,
    /// Least used with degradation and distance penalty.
    LeastUsedDegradationDpf,
}

impl PolicyType {
    /// All supported policies.
    pub const ALL: [Self; 16] = [
        Self::RoundRobin,
        Self::WeightedRoundRobin,
        Self::Random,
        Self::WeightedRandom,
        Self::Priority,
        Self::LeastUsed,
        Self::LeastUsedDegradation,
        Self::PriorityLeastUsed,
        Self::RandomizedLeastUsed,
        Self::RandomizedPriorityLeastUsed,
        Self::RandomizedLeastUsedDegradation,
        Self::PriorityLeastUsedDegradation,
        Self::RandomizedPriorityLeastUsedDegradation,
        Self::WeightedRandomDpf,
        Self::LeastUsedDpf,
        Self::LeastUsedDegradationDpf,
    ];

    /// Registered policy code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::RoundRobin => 0x0000_0001,
            Self::WeightedRoundRobin => 0x0000_0002,
            Self::Random => 0x0000_0003,
            Self::WeightedRandom => 0x0000_0004,
            Self::Priority => 0x0000_0005,
            Self::LeastUsed => 0x4000_0001,
            Self::LeastUsedDegradation => 0x4000_0002,
            Self::PriorityLeastUsed => 0x4000_0003,
            Self::RandomizedLeastUsed => 0x4000_0004,
            Self::RandomizedPriorityLeastUsed => 0xb000_1001,
            Self::RandomizedLeastUsedDegradation => 0xb000_1002,
            Self::PriorityLeastUsedDegradation => 0xb000_1003,
            Self::RandomizedPriorityLeastUsedDegradation => 0xb000_1004,
            Self::WeightedRandomDpf => 0xb000_2001,
            Self::LeastUsedDpf => 0xb000_2002,
            Self::LeastUsedDegradationDpf => 0xb000_2003,
        }
    }

    /// Looks up a policy by its code.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|policy| policy.code() == code)
    }

    /// Human-readable policy name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RoundRobin => "RoundRobin",
            Self::WeightedRoundRobin => "WeightedRoundRobin",
            Self::Random => "Random",
            Self::WeightedRandom => "WeightedRandom",
            Self::Priority => "Priority",
            Self::LeastUsed => "LeastUsed",
            Self::LeastUsedDegradation => "LeastUsedDegradation",
            Self::PriorityLeastUsed => "PriorityLeastUsed",
            Self::RandomizedLeastUsed => "RandomizedLeastUsed",
            Self::RandomizedPriorityLeastUsed => "RandomizedPriorityLeastUsed",
            Self::RandomizedLeastUsedDegradation => "RandomizedLeastUsedDegradation",
            Self::PriorityLeastUsedDegradation => "PriorityLeastUsedDegradation",
            Self::RandomizedPriorityLeastUsedDegradation => {
                "RandomizedPriorityLeastUsedDegradation"
            }
            Self::WeightedRandomDpf => "WeightedRandomDPF",
            Self::LeastUsedDpf => "LeastUsedDPF",
            Self::LeastUsedDegradationDpf => "LeastUsedDegradationDPF",
        }
    }

    /// Implementation of this policy.
    #[must_use]
    pub fn policy(self) -> &'static dyn SelectionPolicy {
        match self {
            Self::RoundRobin => &RoundRobin,
            Self::WeightedRoundRobin => &WeightedRoundRobin,
            Self::Random => &Random,
            Self::WeightedRandom => &WeightedRandom,
            Self::Priority => &Priority,
            Self::LeastUsed => &LeastUsed,
            Self::LeastUsedDegradation => &LeastUsedDegradation,
            Self::PriorityLeastUsed => &PriorityLeastUsed,
            Self::RandomizedLeastUsed => &RandomizedLeastUsed,
            Self::RandomizedPriorityLeastUsed => &RandomizedPriorityLeastUsed,
            Self::RandomizedLeastUsedDegradation => &RandomizedLeastUsedDegradation,
            Self::PriorityLeastUsedDegradation => &PriorityLeastUsedDegradation,
            Self::RandomizedPriorityLeastUsedDegradation => {
                &RandomizedPriorityLeastUsedDegradation
            }
            Self::WeightedRandomDpf => &WeightedRandomDpf,
            Self::LeastUsedDpf => &LeastUsedDpf,
            Self::LeastUsedDegradationDpf => &LeastUsedDegradationDpf,
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Behaviour of one pool policy.
///
/// `selection_key` and `selection_value` are evaluated whenever an element
/// is linked into the selection index, so they must depend on element
/// state only. Counter changes caused by a selection happen in
/// [`SelectionPolicy::on_select`], which runs once per handed-out element
/// while it is unlinked.
pub trait SelectionPolicy: fmt::Debug + Send + Sync {
    /// The policy this implementation belongs to.
    fn policy_type(&self) -> PolicyType;

    /// Human-readable policy name.
    fn name(&self) -> &'static str {
        self.policy_type().name()
    }

    /// Number of elements whose counters advance per selection when the
    /// caller passes `max_increment == 0`.
    fn default_max_increment(&self) -> usize {
        1
    }

    /// Selection strategy.
    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::SortingOrder
    }

    /// Ordering key of `element` in the selection index.
    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey;

    /// Weight of `element` in the value tree.
    fn selection_value(&self, _element: &PoolElementNode) -> u64 {
        1
    }

    /// Initialises policy counters of a new element; `first` is the current
    /// head of the selection order.
    fn on_insert(&self, _element: &mut PoolElementNode, _first: Option<&PoolElementNode>) {}

    /// Advances counters of a handed-out element.
    fn on_select(&self, _element: &mut PoolElementNode) {}

    /// Runs before every selection on the whole pool.
    fn on_prepare_selection(&self, _pool: &mut PoolNode) {}
}

/// `v1 + v2 + v3`, saturated to `[0, POLICY_VALUE_MAX]`.
#[must_use]
pub fn saturating_load_sum(v1: u32, v2: u32, v3: u32) -> u32 {
    let sum = u64::from(v1) + u64::from(v2) + u64::from(v3);
    u32::try_from(sum).unwrap_or(POLICY_VALUE_MAX)
}

/// `base - v1 - v2 - v3`, clamped to `[1, POLICY_VALUE_MAX]` so that an
/// element never becomes unselectable.
#[must_use]
pub fn value_fraction(base: u32, v1: u32, v2: u32, v3: u32) -> u64 {
    let value = i64::from(base) - i64::from(v1) - i64::from(v2) - i64::from(v3);
    let clamped = value.clamp(1, i64::from(POLICY_VALUE_MAX));
    u64::try_from(clamped).unwrap_or(1)
}

/// Distance penalty `distance * factor / MAX`.
fn distance_penalty(distance: u32, factor: u32) -> f64 {
    f64::from(distance) * (f64::from(factor) / f64::from(POLICY_VALUE_MAX))
}

/// `rint(base + dpf * MAX)` capped at `POLICY_VALUE_MAX`.
fn penalized_load(base: f64, dpf: f64) -> u64 {
    let value = (base + dpf * f64::from(POLICY_VALUE_MAX)).round_ties_even();
    // float to int casts saturate; negative inputs cannot occur
    (value as u64).min(u64::from(POLICY_VALUE_MAX))
}

fn accumulate_degradation(element: &mut PoolElementNode) {
    element.degradation = saturating_load_sum(
        element.degradation,
        element.policy_settings.load_degradation,
        0,
    );
}

#[derive(Debug)]
struct RoundRobin;

impl SelectionPolicy for RoundRobin {
    fn policy_type(&self) -> PolicyType {
        PolicyType::RoundRobin
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::new(element.seq_number, 0, 0, element.identifier)
    }
}

#[derive(Debug)]
struct WeightedRoundRobin;

impl SelectionPolicy for WeightedRoundRobin {
    fn policy_type(&self) -> PolicyType {
        PolicyType::WeightedRoundRobin
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::new(
            u64::from(element.round_counter),
            u64::from(element.virtual_counter),
            element.seq_number,
            element.identifier,
        )
    }

    fn on_insert(&self, element: &mut PoolElementNode, first: Option<&PoolElementNode>) {
        element.round_counter = first.map_or(0, |head| head.round_counter);
        element.virtual_counter = element.policy_settings.weight;
    }

    fn on_select(&self, element: &mut PoolElementNode) {
        if element.virtual_counter > 1 {
            element.virtual_counter -= 1;
        } else {
            element.round_counter = element.round_counter.wrapping_add(1);
            element.virtual_counter = element.policy_settings.weight;
        }
    }

    fn on_prepare_selection(&self, pool: &mut PoolNode) {
        // the head of the selection order carries the lowest round
        let Some(current) = pool.first_selected().map(|head| head.round_counter) else {
            return;
        };
        if current.checked_add(2).is_none() {
            pool.relink_all(|element| element.round_counter -= current);
        }
    }
}

#[derive(Debug)]
struct Random;

impl SelectionPolicy for Random {
    fn policy_type(&self) -> PolicyType {
        PolicyType::Random
    }

    fn default_max_increment(&self) -> usize {
        0
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::ValueTree
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_id(element)
    }
}

#[derive(Debug)]
struct WeightedRandom;

impl SelectionPolicy for WeightedRandom {
    fn policy_type(&self) -> PolicyType {
        PolicyType::WeightedRandom
    }

    fn default_max_increment(&self) -> usize {
        0
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::ValueTree
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_id(element)
    }

    fn selection_value(&self, element: &PoolElementNode) -> u64 {
        u64::from(element.policy_settings.weight)
    }
}

#[derive(Debug)]
struct Priority;

impl SelectionPolicy for Priority {
    fn policy_type(&self) -> PolicyType {
        PolicyType::Priority
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        let inverted = POLICY_VALUE_MAX - element.policy_settings.weight;
        SelectionKey::by_value_then_seq(u64::from(inverted), element)
    }
}

#[derive(Debug)]
struct LeastUsed;

impl SelectionPolicy for LeastUsed {
    fn policy_type(&self) -> PolicyType {
        PolicyType::LeastUsed
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_value_then_seq(u64::from(element.policy_settings.load), element)
    }
}

#[derive(Debug)]
struct LeastUsedDegradation;

impl SelectionPolicy for LeastUsedDegradation {
    fn policy_type(&self) -> PolicyType {
        PolicyType::LeastUsedDegradation
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        let load = saturating_load_sum(element.policy_settings.load, element.degradation, 0);
        SelectionKey::by_value_then_seq(u64::from(load), element)
    }

    fn on_select(&self, element: &mut PoolElementNode) {
        accumulate_degradation(element);
    }
}

#[derive(Debug)]
struct PriorityLeastUsed;

impl SelectionPolicy for PriorityLeastUsed {
    fn policy_type(&self) -> PolicyType {
        PolicyType::PriorityLeastUsed
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        let settings = &element.policy_settings;
        let load = saturating_load_sum(settings.load, settings.load_degradation, 0);
        SelectionKey::by_value_then_seq(u64::from(load), element)
    }
}

#[derive(Debug)]
struct PriorityLeastUsedDegradation;

impl SelectionPolicy for PriorityLeastUsedDegradation {
    fn policy_type(&self) -> PolicyType {
        PolicyType::PriorityLeastUsedDegradation
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        let settings = &element.policy_settings;
        let load = saturating_load_sum(settings.load, settings.load_degradation, element.degradation);
        SelectionKey::by_value_then_seq(u64::from(load), element)
    }

    fn on_select(&self, element: &mut PoolElementNode) {
        accumulate_degradation(element);
    }
}

#[derive(Debug)]
struct RandomizedLeastUsed;

impl SelectionPolicy for RandomizedLeastUsed {
    fn policy_type(&self) -> PolicyType {
        PolicyType::RandomizedLeastUsed
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::ValueTree
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_id(element)
    }

    fn selection_value(&self, element: &PoolElementNode) -> u64 {
        value_fraction(POLICY_VALUE_MAX, element.policy_settings.load, 0, 0)
    }
}

#[derive(Debug)]
struct RandomizedPriorityLeastUsed;

impl SelectionPolicy for RandomizedPriorityLeastUsed {
    fn policy_type(&self) -> PolicyType {
        PolicyType::RandomizedPriorityLeastUsed
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::ValueTree
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_id(element)
    }

    fn selection_value(&self, element: &PoolElementNode) -> u64 {
        let settings = &element.policy_settings;
        value_fraction(POLICY_VALUE_MAX, settings.load, settings.load_degradation, 0)
    }
}

#[derive(Debug)]
struct RandomizedLeastUsedDegradation;

impl SelectionPolicy for RandomizedLeastUsedDegradation {
    fn policy_type(&self) -> PolicyType {
        PolicyType::RandomizedLeastUsedDegradation
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::ValueTree
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_id(element)
    }

    fn selection_value(&self, element: &PoolElementNode) -> u64 {
        value_fraction(
            POLICY_VALUE_MAX,
            element.policy_settings.load,
            element.degradation,
            0,
        )
    }
}

#[derive(Debug)]
struct RandomizedPriorityLeastUsedDegradation;

impl SelectionPolicy for RandomizedPriorityLeastUsedDegradation {
    fn policy_type(&self) -> PolicyType {
        PolicyType::RandomizedPriorityLeastUsedDegradation
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::ValueTree
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_id(element)
    }

    fn selection_value(&self, element: &PoolElementNode) -> u64 {
        let settings = &element.policy_settings;
        value_fraction(
            POLICY_VALUE_MAX,
            settings.load,
            settings.load_degradation,
            element.degradation,
        )
    }
}

#[derive(Debug)]
struct WeightedRandomDpf;

impl SelectionPolicy for WeightedRandomDpf {
    fn policy_type(&self) -> PolicyType {
        PolicyType::WeightedRandomDpf
    }

    fn default_max_increment(&self) -> usize {
        0
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::ValueTree
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        SelectionKey::by_id(element)
    }

    fn selection_value(&self, element: &PoolElementNode) -> u64 {
        let settings = &element.policy_settings;
        let dpf = distance_penalty(settings.distance, settings.weight_dpf);
        let weight = f64::from(settings.weight);
        // weight * dpf reaches ~1.8e19, so the difference stays in f64
        let value = weight - (weight * dpf).round_ties_even();
        if value < 0.0 {
            1
        } else {
            // integral and within [0, weight]
            (value as u64).min(u64::from(POLICY_VALUE_MAX))
        }
    }
}

#[derive(Debug)]
struct LeastUsedDpf;

impl SelectionPolicy for LeastUsedDpf {
    fn policy_type(&self) -> PolicyType {
        PolicyType::LeastUsedDpf
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        let settings = &element.policy_settings;
        let dpf = distance_penalty(settings.distance, settings.load_dpf);
        let load = penalized_load(f64::from(settings.load), dpf);
        SelectionKey::by_value_then_seq(load, element)
    }
}

#[derive(Debug)]
struct LeastUsedDegradationDpf;

impl SelectionPolicy for LeastUsedDegradationDpf {
    fn policy_type(&self) -> PolicyType {
        PolicyType::LeastUsedDegradationDpf
    }

    fn selection_key(&self, element: &PoolElementNode) -> SelectionKey {
        let settings = &element.policy_settings;
        let dpf = distance_penalty(settings.distance, settings.load_dpf);
        let base = f64::from(settings.load) + f64::from(element.degradation);
        SelectionKey::by_value_then_seq(penalized_load(base, dpf), element)
    }

    fn on_select(&self, element: &mut PoolElementNode) {
        accumulate_degradation(element);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::pool_element::tests::element;
    use crate::domain::policy_settings::PolicySettings;

    #[test]
    fn codes_round_trip_for_every_policy() {
        for policy in PolicyType::ALL {
            assert_eq!(PolicyType::from_code(policy.code()), Some(policy));
            assert_eq!(policy.policy().policy_type(), policy);
        }
        assert_eq!(PolicyType::from_code(0xdead_beef), None);
    }

    #[test]
    fn random_policies_default_to_no_increment() {
        for policy in [
            PolicyType::Random,
            PolicyType::WeightedRandom,
            PolicyType::WeightedRandomDpf,
        ] {
            assert_eq!(policy.policy().default_max_increment(), 0);
        }
        assert_eq!(PolicyType::LeastUsed.policy().default_max_increment(), 1);
    }

    #[test]
    fn saturating_sum_caps_at_max() {
        assert_eq!(saturating_load_sum(u32::MAX, 1, 0), u32::MAX);
        assert_eq!(saturating_load_sum(1, 2, 3), 6);
    }

    #[test]
    fn value_fraction_never_reaches_zero() {
        assert_eq!(value_fraction(u32::MAX, u32::MAX, 0, 0), 1);
        assert_eq!(value_fraction(u32::MAX, 0, 0, 0), u64::from(u32::MAX));
        assert_eq!(value_fraction(100, 10, 20, 30), 40);
    }

    #[test]
    fn priority_orders_heavier_elements_first() {
        let policy = PolicyType::Priority.policy();
        let heavy = element(1, PolicySettings { weight: 10, ..PolicySettings::with_type(5) });
        let light = element(2, PolicySettings { weight: 1, ..PolicySettings::with_type(5) });
        assert!(policy.selection_key(&heavy) < policy.selection_key(&light));
    }

    #[test]
    fn weighted_round_robin_advances_round_after_weight_selections() {
        let policy = PolicyType::WeightedRoundRobin.policy();
        let mut node = element(1, PolicySettings { weight: 2, ..PolicySettings::with_type(2) });
        policy.on_insert(&mut node, None);
        assert_eq!((node.round_counter, node.virtual_counter), (0, 2));
        policy.on_select(&mut node);
        assert_eq!((node.round_counter, node.virtual_counter), (0, 1));
        policy.on_select(&mut node);
        assert_eq!((node.round_counter, node.virtual_counter), (1, 2));
    }

    #[test]
    fn degradation_accumulates_on_select() {
        let policy = PolicyType::LeastUsedDegradation.policy();
        let mut node = element(
            1,
            PolicySettings {
                load: 100,
                load_degradation: 5,
                ..PolicySettings::with_type(0x4000_0002)
            },
        );
        let before = policy.selection_key(&node);
        policy.on_select(&mut node);
        policy.on_select(&mut node);
        assert_eq!(node.degradation, 10);
        assert_eq!(policy.selection_key(&node).primary, 110);
        assert!(before < policy.selection_key(&node));
    }

    #[test]
    fn distance_penalty_shifts_least_used_key() {
        let policy = PolicyType::LeastUsedDpf.policy();
        let near = element(1, PolicySettings { load: 10, ..PolicySettings::with_type(0xb000_2002) });
        let far = element(
            2,
            PolicySettings {
                load: 10,
                load_dpf: u32::MAX / 100,
                distance: 10,
                ..PolicySettings::with_type(0xb000_2002)
            },
        );
        assert_eq!(policy.selection_key(&near).primary, 10);
        assert!(policy.selection_key(&far).primary > policy.selection_key(&near).primary);
    }

    #[test]
    fn weighted_random_dpf_reduces_value() {
        let policy = PolicyType::WeightedRandomDpf.policy();
        let plain = element(1, PolicySettings { weight: 1_000, ..PolicySettings::with_type(0xb000_2001) });
        let penalized = element(
            2,
            PolicySettings {
                weight: 1_000,
                weight_dpf: u32::MAX / 2,
                distance: 1,
                ..PolicySettings::with_type(0xb000_2001)
            },
        );
        assert_eq!(policy.selection_value(&plain), 1_000);
        assert_eq!(policy.selection_value(&penalized), 500);
    }

    #[test]
    fn weighted_random_dpf_survives_maximal_penalty() {
        let policy = PolicyType::WeightedRandomDpf.policy();
        let extreme = element(
            1,
            PolicySettings {
                weight: u32::MAX,
                weight_dpf: u32::MAX,
                distance: u32::MAX,
                ..PolicySettings::with_type(0xb000_2001)
            },
        );
        assert_eq!(policy.selection_value(&extreme), 1);
        let unpenalized = element(
            2,
            PolicySettings {
                weight: u32::MAX,
                weight_dpf: u32::MAX,
                ..PolicySettings::with_type(0xb000_2001)
            },
        );
        assert_eq!(policy.selection_value(&unpenalized), u64::from(u32::MAX));
    }
}
