// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity priority reservoirs.
//!
//! [`SamplingPriorityQueue`] keeps the highest-priority events seen during a harvest period.
//! Once full, an event is admitted only when its priority is strictly greater than the lowest
//! priority currently held, and that lowest entry is evicted. Among equal priorities the
//! earliest arrival is kept.
//!
//! Reservoirs sit on the hot path of every recorded transaction and span, so:
//! - counters are atomics and never take the storage lock
//! - a full reservoir rejects low-priority events from an atomic snapshot of its minimum
//!   without locking
//! - storage is an ordered set guarded by a per-reservoir lock held only for the insert or
//!   removal, so both the eviction candidate and the highest entry are `O(log n)` away
//!
//! Harvesting goes through [`DoubleBufferedReservoir`], which flips writers to a second buffer
//! before draining the first so the harvest never competes with producers for the same lock.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::debug;

use crate::priority;

/// Anything that can be ordered inside a reservoir.
pub trait PriorityAware {
    fn priority(&self) -> f32;
}

impl<T: PriorityAware + ?Sized> PriorityAware for Arc<T> {
    fn priority(&self) -> f32 {
        (**self).priority()
    }
}

impl<T: PriorityAware + ?Sized> PriorityAware for Box<T> {
    fn priority(&self) -> f32 {
        (**self).priority()
    }
}

/// Stored item. Entries sort in report order, so the first entry is the highest priority and
/// the last is the one evicted next: the lowest priority and, among equal priorities, the latest
/// arrival.
struct Entry<T> {
    priority: f32,
    sequence: u64,
    item: T,
}

impl<T> Entry<T> {
    /// Ordering used for reporting: highest priority first, earliest arrival first.
    fn report_order(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .total_cmp(&self.priority)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.report_order(other)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded, priority-ordered reservoir.
///
/// A capacity of `0` is accepted and admits nothing.
pub struct SamplingPriorityQueue<T> {
    capacity: usize,
    entries: Mutex<BTreeSet<Entry<T>>>,
    sequence: AtomicU64,
    full: AtomicBool,
    /// Bits of the lowest priority held, valid while `full` is set.
    min_priority: AtomicU32,
    number_of_tries: AtomicUsize,
    sampled: AtomicUsize,
    decided: AtomicUsize,
}

impl<T> std::fmt::Debug for SamplingPriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingPriorityQueue")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .field("number_of_tries", &self.number_of_tries())
            .field("sampled", &self.sampled())
            .finish_non_exhaustive()
    }
}

impl<T: PriorityAware> SamplingPriorityQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(BTreeSet::new()),
            sequence: AtomicU64::new(0),
            full: AtomicBool::new(capacity == 0),
            min_priority: AtomicU32::new(f32::INFINITY.to_bits()),
            number_of_tries: AtomicUsize::new(0),
            sampled: AtomicUsize::new(0),
            decided: AtomicUsize::new(0),
        }
    }

    /// Offers an item. Returns whether it was retained.
    ///
    /// Always counts the attempt. Never panics.
    pub fn add(&self, item: T) -> bool {
        let priority = item.priority();
        self.number_of_tries.fetch_add(1, Ordering::Relaxed);
        if priority::is_sampled(priority) {
            self.sampled.fetch_add(1, Ordering::Relaxed);
        }
        self.offer(priority, item)
    }

    fn offer(&self, priority: f32, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }
        // Unlocked rejection: the minimum of a full reservoir only grows until `clear`.
        if self.full.load(Ordering::Acquire)
            && priority <= f32::from_bits(self.min_priority.load(Ordering::Acquire))
        {
            return false;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            priority,
            sequence,
            item,
        };

        let mut entries = lock(&self.entries);
        if entries.len() >= self.capacity {
            let admit = entries.last().is_some_and(|min| priority > min.priority);
            if !admit {
                return false;
            }
            entries.pop_last();
        }
        entries.insert(entry);
        self.refresh_min(&entries);
        true
    }

    fn refresh_min(&self, entries: &BTreeSet<Entry<T>>) {
        let full = entries.len() >= self.capacity;
        if let Some(min) = entries.last() {
            self.min_priority
                .store(min.priority.to_bits(), Ordering::Release);
        }
        self.full.store(full, Ordering::Release);
    }

    /// Removes and returns the highest-priority item.
    pub fn poll(&self) -> Option<T> {
        let mut entries = lock(&self.entries);
        let entry = entries.pop_first()?;
        self.refresh_min(&entries);
        Some(entry.item)
    }

    /// Re-offers every item held by `other`, for example events from a failed harvest.
    ///
    /// Retried items are not counted as new attempts.
    pub fn retry_all(&self, other: &SamplingPriorityQueue<T>) {
        for item in other.drain_items() {
            let priority = item.priority();
            self.offer(priority, item);
        }
    }

    fn drain_items(&self) -> Vec<T> {
        let mut entries = lock(&self.entries);
        let drained = std::mem::take(&mut *entries);
        self.refresh_min(&entries);
        drop(entries);
        drained.into_iter().map(|entry| entry.item).collect()
    }

    /// Empties storage and resets every counter, returning the drained items highest first.
    pub fn drain(&self) -> Drained<T> {
        let events = self.drain_items();
        Drained {
            events,
            seen: self.number_of_tries.swap(0, Ordering::AcqRel),
            sampled: self.sampled.swap(0, Ordering::AcqRel),
            decided: self.decided.swap(0, Ordering::AcqRel),
        }
    }

    /// Empties storage and resets the sampled counter. Attempt and decision counters are left
    /// to the harvest cycle.
    pub fn clear(&self) {
        let mut entries = lock(&self.entries);
        entries.clear();
        self.min_priority
            .store(f32::INFINITY.to_bits(), Ordering::Release);
        self.full.store(self.capacity == 0, Ordering::Release);
        self.sampled.store(0, Ordering::Release);
    }
}

impl<T: PriorityAware + Clone> SamplingPriorityQueue<T> {
    /// Snapshot of the contents, highest priority first.
    #[must_use]
    pub fn as_list(&self) -> Vec<T> {
        lock(&self.entries)
            .iter()
            .map(|entry| entry.item.clone())
            .collect()
    }

    /// The highest-priority item, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        lock(&self.entries)
            .first()
            .map(|entry| entry.item.clone())
    }
}

impl<T> SamplingPriorityQueue<T> {
    #[must_use]
    pub fn size(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    /// Number of `add` calls since the last drain.
    #[must_use]
    pub fn number_of_tries(&self) -> usize {
        self.number_of_tries.load(Ordering::Acquire)
    }

    /// Number of sampled (`priority >= 1.0`) items offered since the last clear.
    #[must_use]
    pub fn sampled(&self) -> usize {
        self.sampled.load(Ordering::Acquire)
    }

    /// Records one adaptive sampling decision attributed to this reservoir.
    pub fn increment_decided(&self) {
        self.decided.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn decided(&self) -> usize {
        self.decided.load(Ordering::Acquire)
    }
}

/// Contents and counters removed from a reservoir by a harvest.
#[derive(Debug, Clone, PartialEq)]
pub struct Drained<T> {
    /// Retained items, highest priority first.
    pub events: Vec<T>,
    /// Attempts made during the period.
    pub seen: usize,
    /// Sampled items offered during the period.
    pub sampled: usize,
    /// Adaptive decisions attributed to the period.
    pub decided: usize,
}

/// Two reservoirs: producers write into the active one while the harvest drains the other.
pub struct DoubleBufferedReservoir<T> {
    buffers: [SamplingPriorityQueue<T>; 2],
    active_index: AtomicUsize,
}

impl<T: PriorityAware> DoubleBufferedReservoir<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: [
                SamplingPriorityQueue::new(capacity),
                SamplingPriorityQueue::new(capacity),
            ],
            active_index: AtomicUsize::new(0),
        }
    }

    /// The buffer currently receiving writes.
    #[must_use]
    pub fn active(&self) -> &SamplingPriorityQueue<T> {
        let index = self.active_index.load(Ordering::Acquire);
        &self.buffers[index]
    }

    pub fn add(&self, item: T) -> bool {
        self.active().add(item)
    }

    /// Flips producers to the other buffer and drains the previously active one.
    ///
    /// Writers that loaded the old index just before the flip land in the drained buffer and
    /// are reported by the harvest after next.
    pub fn harvest(&self) -> Drained<T> {
        let old_index = self.active_index.load(Ordering::Acquire);
        let new_index = 1 - old_index;

        self.active_index.store(new_index, Ordering::Release);

        std::thread::yield_now();

        let drained = self.buffers[old_index].drain();
        debug!(
            "Harvested reservoir: {} events kept, {} seen, {} sampled",
            drained.events.len(),
            drained.seen,
            drained.sampled
        );
        drained
    }
}

/// Reservoirs keyed by application name.
pub struct ReservoirRegistry<T> {
    capacity: usize,
    reservoirs: RwLock<HashMap<String, Arc<DoubleBufferedReservoir<T>>>>,
}

impl<T: PriorityAware> ReservoirRegistry<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            reservoirs: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get_or_create_reservoir(&self, app_name: &str) -> Arc<DoubleBufferedReservoir<T>> {
        if let Some(reservoir) = self
            .reservoirs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_name)
        {
            return Arc::clone(reservoir);
        }

        let mut reservoirs = self
            .reservoirs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            reservoirs
                .entry(app_name.to_string())
                .or_insert_with(|| Arc::new(DoubleBufferedReservoir::new(self.capacity))),
        )
    }

    /// Drains the named reservoir. `None` when nothing was ever recorded for `app_name`.
    pub fn harvest(&self, app_name: &str) -> Option<Drained<T>> {
        let reservoir = self
            .reservoirs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_name)
            .map(Arc::clone)?;
        Some(reservoir.harvest())
    }

    #[must_use]
    pub fn app_names(&self) -> Vec<String> {
        self.reservoirs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
