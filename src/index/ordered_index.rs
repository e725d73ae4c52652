//! Treap-backed ordered index with an augmented running value sum.
//!
//! [`OrderedIndex`] is the one container used for every index role in the
//! crate: pool index, pool element index and selection, handlespace timer,
//! ownership and connection storages, peer list and takeover list. Each
//! entry carries a `u64` weight; every node caches the weight sum of its
//! subtree so that [`OrderedIndex::node_by_value`] performs a weighted draw
//! in `O(log n)` without materialising a candidate list.

use std::cmp::Ordering;

type Link<K, V> = Option<Box<Node<K, V>>>;

#[derive(Debug, Clone)]
struct Node<K, V> {
    key: K,
    payload: V,
    weight: u64,
    priority: u64,
    subtree_sum: u64,
    subtree_len: usize,
    left: Link<K, V>,
    right: Link<K, V>,
}

impl<K, V> Node<K, V> {
    fn boxed(key: K, payload: V, weight: u64, priority: u64) -> Box<Self> {
        Box::new(Self {
            key,
            payload,
            weight,
            priority,
            subtree_sum: weight,
            subtree_len: 1,
            left: None,
            right: None,
        })
    }

    fn refresh(&mut self) {
        self.subtree_sum = sum_of(&self.left)
            .saturating_add(self.weight)
            .saturating_add(sum_of(&self.right));
        self.subtree_len = len_of(&self.left)
            .saturating_add(1)
            .saturating_add(len_of(&self.right));
    }
}

fn sum_of<K, V>(link: &Link<K, V>) -> u64 {
    link.as_ref().map_or(0, |node| node.subtree_sum)
}

fn len_of<K, V>(link: &Link<K, V>) -> usize {
    link.as_ref().map_or(0, |node| node.subtree_len)
}

/// Splits `link` into the entries `< key` and the entries `>= key`.
fn split<K: Ord, V>(link: Link<K, V>, key: &K) -> (Link<K, V>, Link<K, V>) {
    match link {
        None => (None, None),
        Some(mut node) => {
            if node.key < *key {
                let (lower, upper) = split(node.right.take(), key);
                node.right = lower;
                node.refresh();
                (Some(node), upper)
            } else {
                let (lower, upper) = split(node.left.take(), key);
                node.left = upper;
                node.refresh();
                (lower, Some(node))
            }
        }
    }
}

/// Joins two treaps where every key of `lower` is smaller than every key of `upper`.
fn merge<K, V>(lower: Link<K, V>, upper: Link<K, V>) -> Link<K, V> {
    match (lower, upper) {
        (None, upper) => upper,
        (lower, None) => lower,
        (Some(mut lower), Some(mut upper)) => {
            if lower.priority > upper.priority {
                lower.right = merge(lower.right.take(), Some(upper));
                lower.refresh();
                Some(lower)
            } else {
                upper.left = merge(Some(lower), upper.left.take());
                upper.refresh();
                Some(upper)
            }
        }
    }
}

fn remove_node<K: Ord, V>(link: &mut Link<K, V>, key: &K) -> Option<Box<Node<K, V>>> {
    let ordering = key.cmp(&link.as_ref()?.key);
    match ordering {
        Ordering::Equal => {
            let mut node = link.take()?;
            *link = merge(node.left.take(), node.right.take());
            Some(node)
        }
        Ordering::Less | Ordering::Greater => {
            let node = link.as_mut()?;
            let child = if ordering == Ordering::Less {
                &mut node.left
            } else {
                &mut node.right
            };
            let removed = remove_node(child, key);
            if removed.is_some() {
                node.refresh();
            }
            removed
        }
    }
}

fn pop_leftmost<K, V>(link: &mut Link<K, V>) -> Option<Box<Node<K, V>>> {
    let has_left = link.as_ref()?.left.is_some();
    if has_left {
        let node = link.as_mut()?;
        let popped = pop_leftmost(&mut node.left);
        node.refresh();
        popped
    } else {
        let mut node = link.take()?;
        *link = node.right.take();
        Some(node)
    }
}

/// Ordered map from unique keys to payloads, with per-entry weights.
///
/// Keys are unique: [`OrderedIndex::insert`] hands a duplicate back to the
/// caller instead of overwriting, which is what the add-or-update protocols
/// of the handlespace and peer list build on.
#[derive(Debug, Clone)]
pub struct OrderedIndex<K, V> {
    root: Link<K, V>,
    priority_state: u64,
}

impl<K: Ord, V> OrderedIndex<K, V> {
    /// Creates an empty index.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: None,
            priority_state: 0x853c_49e6_748f_ea9b,
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        len_of(&self.root)
    }

    /// Returns `true` if the index contains no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the sum of all entry weights.
    #[must_use]
    pub fn value_sum(&self) -> u64 {
        sum_of(&self.root)
    }

    /// Inserts `key` with `payload` and `weight`.
    ///
    /// # Errors
    ///
    /// Returns the rejected `(key, payload)` pair if the key is already
    /// present; the index is left unchanged.
    pub fn insert(&mut self, key: K, payload: V, weight: u64) -> Result<(), (K, V)> {
        if self.contains(&key) {
            return Err((key, payload));
        }
        let priority = self.next_priority();
        let (lower, upper) = split(self.root.take(), &key);
        let node = Node::boxed(key, payload, weight, priority);
        self.root = merge(merge(lower, Some(node)), upper);
        Ok(())
    }

    /// Removes `key`, returning its payload and weight.
    pub fn remove(&mut self, key: &K) -> Option<(V, u64)> {
        remove_node(&mut self.root, key).map(|node| (node.payload, node.weight))
    }

    /// Removes and returns the smallest entry.
    pub fn pop_first(&mut self) -> Option<(K, V)> {
        pop_leftmost(&mut self.root).map(|node| (node.key, node.payload))
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.find_node(key).is_some()
    }

    /// Returns the payload stored under `key`.
    #[must_use]
    pub fn find(&self, key: &K) -> Option<&V> {
        self.find_node(key).map(|node| &node.payload)
    }

    /// Returns the stored key equal to `key` together with its payload.
    #[must_use]
    pub fn find_entry(&self, key: &K) -> Option<(&K, &V)> {
        self.find_node(key).map(|node| (&node.key, &node.payload))
    }

    /// Returns a mutable reference to the payload stored under `key`.
    ///
    /// The key and the weight are not reachable through this reference, so
    /// ordering and value sums stay intact.
    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        let mut current = self.root.as_deref_mut();
        while let Some(node) = current {
            match key.cmp(&node.key) {
                Ordering::Less => current = node.left.as_deref_mut(),
                Ordering::Greater => current = node.right.as_deref_mut(),
                Ordering::Equal => return Some(&mut node.payload),
            }
        }
        None
    }

    /// Returns the weight stored under `key`.
    #[must_use]
    pub fn weight(&self, key: &K) -> Option<u64> {
        self.find_node(key).map(|node| node.weight)
    }

    /// Returns the smallest entry.
    #[must_use]
    pub fn first(&self) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref()?;
        while let Some(left) = current.left.as_deref() {
            current = left;
        }
        Some((&current.key, &current.payload))
    }

    /// Returns the largest entry.
    #[must_use]
    pub fn last(&self) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref()?;
        while let Some(right) = current.right.as_deref() {
            current = right;
        }
        Some((&current.key, &current.payload))
    }

    /// Returns the smallest entry strictly greater than `key`.
    ///
    /// `key` does not need to be present.
    #[must_use]
    pub fn nearest_next(&self, key: &K) -> Option<(&K, &V)> {
        self.first_where(|candidate| candidate > key)
    }

    /// Returns the largest entry strictly smaller than `key`.
    ///
    /// `key` does not need to be present.
    #[must_use]
    pub fn nearest_prev(&self, key: &K) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref();
        let mut best = None;
        while let Some(node) = current {
            if node.key < *key {
                best = Some(node);
                current = node.right.as_deref();
            } else {
                current = node.left.as_deref();
            }
        }
        best.map(|node| (&node.key, &node.payload))
    }

    /// Successor of a present key in index order.
    #[must_use]
    pub fn next(&self, key: &K) -> Option<(&K, &V)> {
        self.nearest_next(key)
    }

    /// Predecessor of a present key in index order.
    #[must_use]
    pub fn prev(&self, key: &K) -> Option<(&K, &V)> {
        self.nearest_prev(key)
    }

    /// Returns the first entry for which the monotone predicate `bound`
    /// holds (a lower bound search).
    ///
    /// `bound` must be `false` for a prefix of the index and `true` for the
    /// remainder.
    pub fn first_where(&self, bound: impl Fn(&K) -> bool) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref();
        let mut best = None;
        while let Some(node) = current {
            if bound(&node.key) {
                best = Some(node);
                current = node.left.as_deref();
            } else {
                current = node.right.as_deref();
            }
        }
        best.map(|node| (&node.key, &node.payload))
    }

    /// Returns the entry whose cumulative weight range contains `value`.
    ///
    /// With entries `e0, e1, ...` in key order, entry `ei` covers
    /// `[w0 + .. + w(i-1), w0 + .. + wi)`. Returns `None` when
    /// `value >= value_sum()`.
    #[must_use]
    pub fn node_by_value(&self, value: u64) -> Option<(&K, &V)> {
        let mut remaining = value;
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            let left_sum = sum_of(&node.left);
            if remaining < left_sum {
                current = node.left.as_deref();
                continue;
            }
            remaining -= left_sum;
            if remaining < node.weight {
                return Some((&node.key, &node.payload));
            }
            remaining -= node.weight;
            current = node.right.as_deref();
        }
        None
    }

    /// In-order iterator over all entries.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.iter_where(|_| true)
    }

    /// In-order iterator over the entries strictly greater than `key`.
    #[must_use]
    pub fn iter_after(&self, key: &K) -> Iter<'_, K, V> {
        self.iter_where(|candidate| candidate > key)
    }

    /// In-order iterator starting at the first entry satisfying the
    /// monotone predicate `bound` (see [`OrderedIndex::first_where`]).
    pub fn iter_where(&self, bound: impl Fn(&K) -> bool) -> Iter<'_, K, V> {
        let mut stack = Vec::new();
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            if bound(&node.key) {
                stack.push(node);
                current = node.left.as_deref();
            } else {
                current = node.right.as_deref();
            }
        }
        Iter { stack }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        while self.pop_first().is_some() {}
    }

    /// Checks key order, heap order and cached aggregates of the whole tree.
    #[must_use]
    pub fn verify(&self) -> bool {
        fn check<K: Ord, V>(link: &Link<K, V>, parent_priority: u64) -> Option<(usize, u64)> {
            let Some(node) = link.as_deref() else {
                return Some((0, 0));
            };
            if node.priority > parent_priority {
                return None;
            }
            if let Some(left) = node.left.as_deref()
                && left.key >= node.key
            {
                return None;
            }
            if let Some(right) = node.right.as_deref()
                && right.key <= node.key
            {
                return None;
            }
            let (left_len, left_sum) = check(&node.left, node.priority)?;
            let (right_len, right_sum) = check(&node.right, node.priority)?;
            let len = left_len + 1 + right_len;
            let sum = left_sum.saturating_add(node.weight).saturating_add(right_sum);
            (len == node.subtree_len && sum == node.subtree_sum).then_some((len, sum))
        }

        if check(&self.root, u64::MAX).is_none() {
            return false;
        }
        self.iter()
            .zip(self.iter().skip(1))
            .all(|((a, _), (b, _))| a < b)
    }

    fn find_node(&self, key: &K) -> Option<&Node<K, V>> {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            match key.cmp(&node.key) {
                Ordering::Less => current = node.left.as_deref(),
                Ordering::Greater => current = node.right.as_deref(),
                Ordering::Equal => return Some(node),
            }
        }
        None
    }

    /// splitmix64 over an internal counter; only the heap shape depends on it.
    fn next_priority(&mut self) -> u64 {
        self.priority_state = self.priority_state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.priority_state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

impl<K: Ord, V> Default for OrderedIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// In-order iterator over an [`OrderedIndex`].
#[derive(Debug)]
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let mut current = node.right.as_deref();
        while let Some(child) = current {
            self.stack.push(child);
            current = child.left.as_deref();
        }
        Some((&node.key, &node.payload))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn filled(keys: &[u32]) -> OrderedIndex<u32, String> {
        let mut index = OrderedIndex::new();
        for key in keys {
            let Ok(()) = index.insert(*key, format!("v{key}"), u64::from(*key)) else {
                panic!("unexpected duplicate {key}");
            };
        }
        index
    }

    #[test]
    fn insert_keeps_keys_sorted() {
        let index = filled(&[5, 1, 9, 3, 7]);
        let keys: Vec<u32> = index.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
        assert_eq!(index.len(), 5);
        assert!(index.verify());
    }

    #[test]
    fn duplicate_insert_hands_back_candidate() {
        let mut index = filled(&[4]);
        let Err((key, payload)) = index.insert(4, "other".to_string(), 1) else {
            panic!("duplicate must be rejected");
        };
        assert_eq!(key, 4);
        assert_eq!(payload, "other");
        assert_eq!(index.find(&4).map(String::as_str), Some("v4"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_updates_sums_and_len() {
        let mut index = filled(&[1, 2, 3, 4]);
        assert_eq!(index.value_sum(), 10);
        let Some((payload, weight)) = index.remove(&3) else {
            panic!("key 3 present");
        };
        assert_eq!(payload, "v3");
        assert_eq!(weight, 3);
        assert_eq!(index.value_sum(), 7);
        assert_eq!(index.len(), 3);
        assert!(index.remove(&3).is_none());
        assert!(index.verify());
    }

    #[test]
    fn nearest_lookups_skip_missing_keys() {
        let index = filled(&[10, 20, 30]);
        assert_eq!(index.nearest_next(&15).map(|(k, _)| *k), Some(20));
        assert_eq!(index.nearest_next(&20).map(|(k, _)| *k), Some(30));
        assert_eq!(index.nearest_next(&30), None);
        assert_eq!(index.nearest_prev(&25).map(|(k, _)| *k), Some(20));
        assert_eq!(index.nearest_prev(&10), None);
        assert_eq!(index.first().map(|(k, _)| *k), Some(10));
        assert_eq!(index.last().map(|(k, _)| *k), Some(30));
    }

    #[test]
    fn node_by_value_walks_cumulative_ranges() {
        // weights equal keys: 1 -> [0,1), 2 -> [1,3), 3 -> [3,6)
        let index = filled(&[1, 2, 3]);
        assert_eq!(index.node_by_value(0).map(|(k, _)| *k), Some(1));
        assert_eq!(index.node_by_value(1).map(|(k, _)| *k), Some(2));
        assert_eq!(index.node_by_value(2).map(|(k, _)| *k), Some(2));
        assert_eq!(index.node_by_value(3).map(|(k, _)| *k), Some(3));
        assert_eq!(index.node_by_value(5).map(|(k, _)| *k), Some(3));
        assert_eq!(index.node_by_value(6), None);
    }

    #[test]
    fn zero_weight_entries_are_never_drawn() {
        let mut index = OrderedIndex::new();
        let _ = index.insert(1u32, (), 0);
        let _ = index.insert(2u32, (), 4);
        for value in 0..4 {
            assert_eq!(index.node_by_value(value).map(|(k, _)| *k), Some(2));
        }
    }

    #[test]
    fn iter_after_and_first_where() {
        let index = filled(&[2, 4, 6, 8]);
        let after: Vec<u32> = index.iter_after(&4).map(|(k, _)| *k).collect();
        assert_eq!(after, vec![6, 8]);
        let from: Vec<u32> = index.iter_where(|k| *k >= 3).map(|(k, _)| *k).collect();
        assert_eq!(from, vec![4, 6, 8]);
        assert_eq!(index.first_where(|k| *k >= 7).map(|(k, _)| *k), Some(8));
        assert!(index.first_where(|k| *k > 8).is_none());
    }

    #[test]
    fn find_mut_changes_payload_only() {
        let mut index = filled(&[1, 2]);
        if let Some(payload) = index.find_mut(&2) {
            payload.push('!');
        }
        assert_eq!(index.find(&2).map(String::as_str), Some("v2!"));
        assert_eq!(index.weight(&2), Some(2));
    }

    #[test]
    fn large_sequence_stays_consistent() {
        let mut index = OrderedIndex::new();
        for key in (0..2_000u32).map(|k| k.wrapping_mul(7919) % 2_000) {
            let _ = index.insert(key, (), 1);
        }
        assert_eq!(index.len(), 2_000);
        for key in (0..2_000u32).step_by(2) {
            assert!(index.remove(&key).is_some());
        }
        assert_eq!(index.len(), 1_000);
        assert_eq!(index.value_sum(), 1_000);
        assert!(index.verify());
        index.clear();
        assert!(index.is_empty());
    }
}
