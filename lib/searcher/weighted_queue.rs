//! A collection of weighted items supporting weighted random choice.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::hash::Hash;

/// Weights which are not positive and finite are raised to this.
pub const MIN_WEIGHT: f64 = f64::MIN_POSITIVE;

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else if weight == f64::INFINITY {
        f64::MAX
    } else {
        MIN_WEIGHT
    }
}

/// Sums over bucket slots. Leaves hold the total weight of one bucket.
#[derive(Clone, Debug, Default)]
struct SegmentTree {
    capacity: usize,
    sums: Vec<f64>,
}

impl SegmentTree {
    fn total(&self) -> f64 {
        self.sums.get(1).copied().unwrap_or(0.0)
    }

    fn grow(&mut self, slot: usize) {
        if slot < self.capacity {
            return;
        }
        let mut capacity = self.capacity.max(1);
        while capacity <= slot {
            capacity *= 2;
        }
        let mut sums = vec![0.0; capacity * 2];
        for leaf in 0..self.capacity {
            sums[capacity + leaf] = self.sums[self.capacity + leaf];
        }
        for node in (1..capacity).rev() {
            sums[node] = sums[node * 2] + sums[node * 2 + 1];
        }
        self.capacity = capacity;
        self.sums = sums;
    }

    fn set(&mut self, slot: usize, value: f64) {
        self.grow(slot);
        let mut node = self.capacity + slot;
        self.sums[node] = value;
        while node > 1 {
            node /= 2;
            self.sums[node] = self.sums[node * 2] + self.sums[node * 2 + 1];
        }
    }

    /// The slot holding the point `target` of the cumulative distribution,
    /// and the offset of `target` into that slot.
    fn find(&self, mut target: f64) -> (usize, f64) {
        let mut node = 1;
        while node < self.capacity {
            let (left, right) = (self.sums[node * 2], self.sums[node * 2 + 1]);
            if target < left || right <= 0.0 {
                target = target.min(left);
                node *= 2;
            } else {
                target -= left;
                node = node * 2 + 1;
            }
        }
        (node - self.capacity, target)
    }
}

#[derive(Clone, Debug)]
struct Bucket<T> {
    weight: f64,
    items: Vec<T>,
}

/// A set of items, each with a positive weight, from which an item can be
/// chosen with probability proportional to its weight.
///
/// Items of equal weight share a bucket. Buckets are found by weight through
/// an ordered map, and each occupies a slot in a segment tree of bucket
/// totals. A reverse index maps every item to its bucket and position, so
/// insertion, update, removal and choice are all logarithmic.
#[derive(Clone, Debug)]
pub struct WeightedQueue<T> {
    buckets: BTreeMap<u64, usize>,
    slots: Vec<Bucket<T>>,
    free_slots: Vec<usize>,
    index: FxHashMap<T, (usize, usize)>,
    tree: SegmentTree,
}

impl<T> Default for WeightedQueue<T>
where
    T: Clone + Eq + Hash,
{
    fn default() -> WeightedQueue<T> {
        WeightedQueue::new()
    }
}

impl<T> WeightedQueue<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new() -> WeightedQueue<T> {
        WeightedQueue {
            buckets: BTreeMap::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            index: FxHashMap::default(),
            tree: SegmentTree::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains_key(item)
    }

    /// The sum of all weights.
    pub fn total(&self) -> f64 {
        self.tree.total()
    }

    /// The weight of `item`, if it is in the queue.
    pub fn weight(&self, item: &T) -> Option<f64> {
        self.index
            .get(item)
            .map(|(slot, _)| self.slots[*slot].weight)
    }

    fn refresh(&mut self, slot: usize) {
        let bucket = &self.slots[slot];
        self.tree.set(slot, bucket.weight * bucket.items.len() as f64);
    }

    fn bucket_for(&mut self, weight: f64) -> usize {
        let key = weight.to_bits();
        if let Some(slot) = self.buckets.get(&key) {
            return *slot;
        }
        let bucket = Bucket {
            weight,
            items: Vec::new(),
        };
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = bucket;
                slot
            }
            None => {
                self.slots.push(bucket);
                self.slots.len() - 1
            }
        };
        self.buckets.insert(key, slot);
        slot
    }

    /// Add `item` with `weight`. An item already present has its weight
    /// updated instead.
    pub fn insert(&mut self, item: T, weight: f64) {
        if self.contains(&item) {
            self.update(&item, weight);
            return;
        }
        let slot = self.bucket_for(sanitize(weight));
        let position = self.slots[slot].items.len();
        self.slots[slot].items.push(item.clone());
        self.index.insert(item, (slot, position));
        self.refresh(slot);
    }

    /// Change the weight of `item`. Returns false if it is not in the queue.
    pub fn update(&mut self, item: &T, weight: f64) -> bool {
        let weight = sanitize(weight);
        match self.weight(item) {
            None => false,
            Some(current) if current.to_bits() == weight.to_bits() => true,
            Some(_) => {
                self.remove(item);
                self.insert(item.clone(), weight);
                true
            }
        }
    }

    /// Remove `item`. Returns false if it was not in the queue.
    pub fn remove(&mut self, item: &T) -> bool {
        let (slot, position) = match self.index.remove(item) {
            Some(location) => location,
            None => return false,
        };
        let bucket = &mut self.slots[slot];
        bucket.items.swap_remove(position);
        if let Some(moved) = bucket.items.get(position) {
            self.index.insert(moved.clone(), (slot, position));
        }
        if self.slots[slot].items.is_empty() {
            self.buckets.remove(&self.slots[slot].weight.to_bits());
            self.free_slots.push(slot);
        }
        self.refresh(slot);
        true
    }

    /// The item at point `p` of the cumulative weight distribution, where
    /// `p` is in `[0, 1)`. Drawing `p` uniformly picks each item with
    /// probability proportional to its weight.
    pub fn choose(&self, p: f64) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        let total = self.total();
        let target = (p.clamp(0.0, 1.0) * total).min(total);
        let (slot, offset) = self.tree.find(target);
        let bucket = self.slots.get(slot)?;
        if bucket.items.is_empty() {
            // Rounding at the very end of the distribution.
            return self
                .slots
                .iter()
                .rev()
                .find_map(|bucket| bucket.items.last());
        }
        let position = ((offset / bucket.weight) as usize).min(bucket.items.len() - 1);
        bucket.items.get(position)
    }

    /// Every item and its weight, heaviest bucket first.
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        self.buckets.values().rev().flat_map(move |slot| {
            let bucket = &self.slots[*slot];
            bucket.items.iter().map(move |item| (item, bucket.weight))
        })
    }
}

#[cfg(test)]
mod weighted_queue_tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn insert_update_remove() {
        let mut queue = WeightedQueue::new();
        queue.insert(1u64, 1.0);
        queue.insert(2, 1.0);
        queue.insert(3, 2.0);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.total(), 4.0);

        assert!(queue.update(&2, 5.0));
        assert_eq!(queue.weight(&2), Some(5.0));
        assert_eq!(queue.total(), 8.0);

        assert!(queue.remove(&1));
        assert!(!queue.remove(&1));
        assert!(!queue.contains(&1));
        assert!(!queue.update(&1, 3.0));
        assert_eq!(queue.total(), 7.0);

        queue.insert(4, 0.0);
        assert_eq!(queue.weight(&4), Some(MIN_WEIGHT));

        assert!(queue.remove(&2));
        assert!(queue.remove(&3));
        assert!(queue.remove(&4));
        assert!(queue.is_empty());
        assert_eq!(queue.choose(0.5), None);
    }

    #[test]
    fn choice_follows_the_distribution() {
        let mut queue = WeightedQueue::new();
        queue.insert("a", 1.0);
        queue.insert("b", 3.0);
        assert_eq!(queue.choose(0.0), Some(&"a"));
        assert_eq!(queue.choose(0.2), Some(&"a"));
        assert_eq!(queue.choose(0.3), Some(&"b"));
        assert_eq!(queue.choose(0.999_999), Some(&"b"));
        assert_eq!(queue.choose(1.0), Some(&"b"));
    }

    #[test]
    fn many_buckets() {
        let mut queue = WeightedQueue::new();
        for i in 0..1000u64 {
            queue.insert(i, (i % 37 + 1) as f64);
        }
        for i in (0..1000u64).step_by(3) {
            queue.remove(&i);
        }
        let expected: f64 = (0..1000u64)
            .filter(|i| i % 3 != 0)
            .map(|i| (i % 37 + 1) as f64)
            .sum();
        assert!((queue.total() - expected).abs() < 1e-6);
        for i in 0..1000 {
            let p = i as f64 / 1000.0;
            let item = queue.choose(p).unwrap();
            assert!(item % 3 != 0);
        }
    }

    #[test]
    fn chi_square() {
        let weights = [1.0, 2.0, 3.0, 4.0, 10.0];
        let mut queue = WeightedQueue::new();
        for (item, weight) in weights.iter().enumerate() {
            queue.insert(item, *weight);
        }
        // churn the structure so choice runs over reused slots
        queue.insert(99, 7.0);
        queue.update(&0, 8.0);
        queue.update(&0, 1.0);
        queue.remove(&99);

        let samples = 200_000;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut counts = [0u64; 5];
        for _ in 0..samples {
            counts[*queue.choose(rng.gen::<f64>()).unwrap()] += 1;
        }

        let total: f64 = weights.iter().sum();
        let chi_square: f64 = weights
            .iter()
            .zip(counts.iter())
            .map(|(weight, count)| {
                let expected = samples as f64 * weight / total;
                (*count as f64 - expected).powi(2) / expected
            })
            .sum();
        // 4 degrees of freedom, p = 0.001
        assert!(chi_square < 18.47, "chi square {}", chi_square);
    }
}
