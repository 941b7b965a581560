//! Future event sets.
//!
//! A future event set holds submitted events whose tick has not been
//! dispatched yet, ordered by [`EventKey`] (time, then submission sequence).
//! The representation is swappable so the same driving loop can be compared
//! across containers:
//!
//! - [`HeapEventSet`]: binary min-heap
//! - [`TreeEventSet`]: balanced tree keyed by `(time, sequence)`
//! - [`DoubleBuffered`]: append-only intake buffer in front of either of the
//!   above, sorted into the ordered set only when the clock reads it

use crate::{Event, EventKey, SimTime};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// Priority container of pending events.
///
/// Not internally synchronized: the kernel only touches it under exclusive
/// access (its own lock, or during the quiescent phase).
pub trait FutureEventSet: Send {
    fn push(&mut self, event: Event);

    /// Remove and return the earliest event.
    fn pop(&mut self) -> Option<Event>;

    /// Key of the earliest event, without removing it.
    fn peek_key(&self) -> Option<EventKey>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn peek_time(&self) -> Option<SimTime> {
        self.peek_key().map(|key| key.time)
    }

    fn extend(&mut self, events: Vec<Event>) {
        for event in events {
            self.push(event);
        }
    }

    /// Remove every event scheduled at exactly `time`, in key order.
    fn drain_at(&mut self, time: SimTime) -> Vec<Event> {
        let mut due = Vec::new();
        while self.peek_time() == Some(time) {
            match self.pop() {
                Some(event) => due.push(event),
                None => break,
            }
        }
        due
    }
}

/// Selects a [`FutureEventSet`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FutureSetKind {
    #[default]
    Heap,
    Tree,
    DoubleHeap,
    DoubleTree,
}

impl FutureSetKind {
    pub fn build(self) -> Box<dyn FutureEventSet> {
        match self {
            FutureSetKind::Heap => Box::new(HeapEventSet::new()),
            FutureSetKind::Tree => Box::new(TreeEventSet::new()),
            FutureSetKind::DoubleHeap => Box::new(DoubleBuffered::new(HeapEventSet::new())),
            FutureSetKind::DoubleTree => Box::new(DoubleBuffered::new(TreeEventSet::new())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FutureSetKind::Heap => "heap",
            FutureSetKind::Tree => "tree",
            FutureSetKind::DoubleHeap => "double_heap",
            FutureSetKind::DoubleTree => "double_tree",
        }
    }
}

impl std::str::FromStr for FutureSetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heap" => Ok(FutureSetKind::Heap),
            "tree" => Ok(FutureSetKind::Tree),
            "double_heap" | "double-heap" => Ok(FutureSetKind::DoubleHeap),
            "double_tree" | "double-tree" => Ok(FutureSetKind::DoubleTree),
            other => Err(format!("unknown future set kind: {other}")),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Heap
// ═══════════════════════════════════════════════════════════════════════

/// Heap entry with reversed ordering so `BinaryHeap` pops the minimum key.
struct HeapEntry(Event);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.key().cmp(&self.0.key())
    }
}

/// Binary min-heap ordered by `(time, sequence)`.
#[derive(Default)]
pub struct HeapEventSet {
    heap: BinaryHeap<HeapEntry>,
}

impl HeapEventSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FutureEventSet for HeapEventSet {
    fn push(&mut self, event: Event) {
        self.heap.push(HeapEntry(event));
    }

    fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|entry| entry.0)
    }

    fn peek_key(&self) -> Option<EventKey> {
        self.heap.peek().map(|entry| entry.0.key())
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tree
// ═══════════════════════════════════════════════════════════════════════

/// Balanced tree keyed by [`EventKey`].
///
/// Keys are unique as long as sequence numbers are; the kernel guarantees
/// that by stamping every submission.
#[derive(Default)]
pub struct TreeEventSet {
    tree: BTreeMap<EventKey, Event>,
}

impl TreeEventSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FutureEventSet for TreeEventSet {
    fn push(&mut self, event: Event) {
        self.tree.insert(event.key(), event);
    }

    fn pop(&mut self) -> Option<Event> {
        self.tree.pop_first().map(|(_, event)| event)
    }

    fn peek_key(&self) -> Option<EventKey> {
        self.tree.first_key_value().map(|(key, _)| *key)
    }

    fn len(&self) -> usize {
        self.tree.len()
    }

    fn drain_at(&mut self, time: SimTime) -> Vec<Event> {
        let mut due = Vec::new();
        while let Some(entry) = self.tree.first_entry() {
            if entry.key().time != time {
                break;
            }
            due.push(entry.remove());
        }
        due
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Double buffer
// ═══════════════════════════════════════════════════════════════════════

/// Append-only intake buffer in front of an ordered set.
///
/// Pushes land in the intake vector; the intake is sorted into the ordered
/// set the next time an event is removed. The minimum intake key is tracked
/// so peeking never has to flush.
pub struct DoubleBuffered<S> {
    intake: Vec<Event>,
    intake_min: Option<EventKey>,
    ordered: S,
}

impl<S: FutureEventSet> DoubleBuffered<S> {
    pub fn new(ordered: S) -> Self {
        Self {
            intake: Vec::new(),
            intake_min: None,
            ordered,
        }
    }

    fn flush(&mut self) {
        if self.intake.is_empty() {
            return;
        }
        let intake = std::mem::take(&mut self.intake);
        self.ordered.extend(intake);
        self.intake_min = None;
    }
}

impl<S: FutureEventSet> FutureEventSet for DoubleBuffered<S> {
    fn push(&mut self, event: Event) {
        let key = event.key();
        if self.intake_min.map_or(true, |min| key < min) {
            self.intake_min = Some(key);
        }
        self.intake.push(event);
    }

    fn pop(&mut self) -> Option<Event> {
        self.flush();
        self.ordered.pop()
    }

    fn peek_key(&self) -> Option<EventKey> {
        match (self.ordered.peek_key(), self.intake_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn len(&self) -> usize {
        self.ordered.len() + self.intake.len()
    }

    fn drain_at(&mut self, time: SimTime) -> Vec<Event> {
        self.flush();
        self.ordered.drain_at(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventId;

    fn event(time: u64, sequence: u64) -> Event {
        let mut event = Event::new(SimTime::new(time), |_| {});
        event.assign_sequence(EventId::new(sequence));
        event
    }

    fn all_kinds() -> [FutureSetKind; 4] {
        [
            FutureSetKind::Heap,
            FutureSetKind::Tree,
            FutureSetKind::DoubleHeap,
            FutureSetKind::DoubleTree,
        ]
    }

    #[test]
    fn test_pop_order_is_time_then_sequence() {
        for kind in all_kinds() {
            let mut set = kind.build();
            set.push(event(30, 1));
            set.push(event(10, 4));
            set.push(event(10, 2));
            set.push(event(20, 3));

            let keys: Vec<(u64, u64)> = std::iter::from_fn(|| set.pop())
                .map(|e| (e.time().ticks(), e.sequence().raw()))
                .collect();
            assert_eq!(
                keys,
                vec![(10, 2), (10, 4), (20, 3), (30, 1)],
                "wrong order for {}",
                kind.name()
            );
        }
    }

    #[test]
    fn test_drain_at_takes_only_that_tick() {
        for kind in all_kinds() {
            let mut set = kind.build();
            set.push(event(5, 1));
            set.push(event(5, 2));
            set.push(event(10, 3));

            let due = set.drain_at(SimTime::new(5));
            assert_eq!(due.len(), 2, "{}", kind.name());
            assert_eq!(set.len(), 1);
            assert_eq!(set.peek_time(), Some(SimTime::new(10)));
        }
    }

    #[test]
    fn test_double_buffer_peek_sees_intake() {
        let mut set = DoubleBuffered::new(HeapEventSet::new());
        set.push(event(20, 1));
        assert_eq!(set.pop().map(|e| e.time()), Some(SimTime::new(20)));

        set.push(event(40, 2));
        set.push(event(15, 3));
        assert_eq!(set.peek_time(), Some(SimTime::new(15)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_empty_set() {
        for kind in all_kinds() {
            let mut set = kind.build();
            assert!(set.is_empty());
            assert!(set.pop().is_none());
            assert!(set.peek_time().is_none());
            assert!(set.drain_at(SimTime::ZERO).is_empty());
        }
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("tree".parse::<FutureSetKind>(), Ok(FutureSetKind::Tree));
        assert_eq!(
            "double-heap".parse::<FutureSetKind>(),
            Ok(FutureSetKind::DoubleHeap)
        );
        assert!("splay".parse::<FutureSetKind>().is_err());
    }
}
