use itertools::Itertools;

use crate::error::{CodivError, Result};
use crate::utils::NoPrettyPrint;

/// A divergence time shared by every comparison assigned to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub time: f64,
}

/// Assignment of comparisons to events.
///
/// Events live in an arena indexed by small integers and every comparison
/// stores the index of its event. Removing an event shifts the indices above
/// it down by one, so indices are always `0..n_events()`. After every
/// completed move the arena is put back into canonical (restricted growth)
/// order with [`EventPartition::canonicalize`].
#[derive(Clone, PartialEq)]
pub struct EventPartition {
    assignments: Vec<Option<usize>>,
    events: Vec<Event>,
    counts: Vec<usize>,
}

impl std::fmt::Debug for EventPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let assignments: Vec<_> = self
            .assignments
            .iter()
            .map(|a| a.map_or_else(|| String::from("-"), |a| a.to_string()))
            .map(NoPrettyPrint::new)
            .collect();
        let times: Vec<f64> = self.events.iter().map(|e| e.time).collect();

        f.debug_struct("EventPartition")
            .field("assignments", &NoPrettyPrint::new(assignments))
            .field("times", &NoPrettyPrint::new(times))
            .field("counts", &NoPrettyPrint::new(&self.counts))
            .finish()
    }
}

impl EventPartition {
    /// Build a partition from event labels and one time per label.
    ///
    /// Labels need not be canonical, but every label in `0..times.len()` must
    /// be used by at least one comparison.
    pub fn from_assignments(assignments: &[usize], times: &[f64]) -> Result<Self> {
        if assignments.is_empty() {
            return Err(CodivError::config("a partition needs at least one comparison"));
        }
        let mut counts = vec![0_usize; times.len()];
        for &a in assignments {
            let Some(count) = counts.get_mut(a) else {
                return Err(CodivError::config(format!(
                    "event index {a} has no time (only {} events)",
                    times.len()
                )));
            };
            *count += 1;
        }
        if let Some(empty) = counts.iter().position(|&c| c == 0) {
            return Err(CodivError::config(format!(
                "event index {empty} has no comparisons assigned"
            )));
        }

        let mut partition = Self {
            assignments: assignments.iter().copied().map(Some).collect(),
            events: times.iter().map(|&time| Event { time }).collect(),
            counts,
        };
        partition.canonicalize();
        Ok(partition)
    }

    /// Number of comparisons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    #[must_use]
    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of comparisons in each event.
    #[must_use]
    pub fn event_sizes(&self) -> &[usize] {
        &self.counts
    }

    #[must_use]
    pub fn event_time(&self, event: usize) -> f64 {
        self.events[event].time
    }

    pub fn set_event_time(&mut self, event: usize, time: f64) {
        self.events[event].time = time;
    }

    #[must_use]
    pub fn assignment(&self, index: usize) -> Option<usize> {
        self.assignments.get(index).copied().flatten()
    }

    #[must_use]
    pub fn assignments(&self) -> &[Option<usize>] {
        &self.assignments
    }

    /// Event index of a comparison.
    ///
    /// # Panics
    /// If the comparison is unassigned, which only happens in the middle of
    /// a Gibbs sweep.
    #[must_use]
    pub fn event_of(&self, index: usize) -> usize {
        self.assignments[index].expect("every comparison is assigned outside of a Gibbs sweep")
    }

    /// Divergence time of the event a comparison belongs to.
    #[must_use]
    pub fn time_of(&self, index: usize) -> f64 {
        self.event_time(self.event_of(index))
    }

    /// Comparisons assigned to `event`.
    pub fn members(&self, event: usize) -> impl Iterator<Item = usize> + '_ {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(move |(i, a)| (*a == Some(event)).then_some(i))
    }

    /// Events with at least two members.
    #[must_use]
    pub fn splittable_events(&self) -> Vec<usize> {
        self.counts
            .iter()
            .enumerate()
            .filter_map(|(e, &c)| (c > 1).then_some(e))
            .collect()
    }

    /// Place comparison `index` (which must be unassigned) in the existing
    /// event `event`.
    pub fn assign(&mut self, index: usize, event: usize) {
        debug_assert!(self.assignments[index].is_none());
        debug_assert!(event < self.events.len());
        self.assignments[index] = Some(event);
        self.counts[event] += 1;
    }

    /// Place comparison `index` (which must be unassigned) in a brand new event.
    pub fn assign_new(&mut self, index: usize, time: f64) -> usize {
        debug_assert!(self.assignments[index].is_none());
        self.events.push(Event { time });
        self.counts.push(1);
        let event = self.events.len() - 1;
        self.assignments[index] = Some(event);
        event
    }

    /// Remove a comparison from its event.
    ///
    /// Returns the event if it became empty and was removed from the arena.
    pub fn unassign(&mut self, index: usize) -> Option<Event> {
        let event = self.assignments[index]?;
        self.assignments[index] = None;
        self.counts[event] -= 1;

        (self.counts[event] == 0).then(|| self.remove_empty_event(event))
    }

    /// Move every member of `from` into `into` and drop `from`.
    pub fn merge_events(&mut self, from: usize, into: usize) {
        debug_assert_ne!(from, into);
        let moved = self.counts[from];
        self.assignments
            .iter_mut()
            .filter(|a| **a == Some(from))
            .for_each(|a| *a = Some(into));
        self.counts[into] += moved;
        self.counts[from] = 0;
        self.remove_empty_event(from);
    }

    /// Move `members` (a proper, nonempty subset of `event`) to a new event.
    pub fn split_event(&mut self, event: usize, members: &[usize], time: f64) -> usize {
        debug_assert!(!members.is_empty() && members.len() < self.counts[event]);
        self.events.push(Event { time });
        self.counts.push(members.len());
        let new_event = self.events.len() - 1;
        self.counts[event] -= members.len();
        for &i in members {
            debug_assert_eq!(self.assignments[i], Some(event));
            self.assignments[i] = Some(new_event);
        }
        new_event
    }

    fn remove_empty_event(&mut self, event: usize) -> Event {
        debug_assert_eq!(self.counts[event], 0);
        self.counts.remove(event);
        let removed = self.events.remove(event);

        self.assignments
            .iter_mut()
            .filter_map(|a| a.as_mut().and_then(|a| (*a > event).then_some(a)))
            .for_each(|a| *a -= 1);

        removed
    }

    /// Relabel events in order of first appearance.
    pub fn canonicalize(&mut self) {
        let mut relabel: Vec<Option<usize>> = vec![None; self.events.len()];
        let mut next = 0;
        for a in self.assignments.iter().flatten() {
            if relabel[*a].is_none() {
                relabel[*a] = Some(next);
                next += 1;
            }
        }
        if relabel.iter().enumerate().all(|(i, r)| *r == Some(i)) {
            return;
        }

        let mut events = self.events.clone();
        let mut counts = self.counts.clone();
        for (old, new) in relabel.iter().enumerate() {
            if let Some(new) = new {
                events[*new] = self.events[old];
                counts[*new] = self.counts[old];
            }
        }
        self.events = events;
        self.counts = counts;
        self.assignments
            .iter_mut()
            .flatten()
            .for_each(|a| *a = relabel[*a].expect("every used label was relabelled"));
    }

    /// Whether event indices appear in first-appearance order.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        let mut next = 0;
        for a in self.assignments.iter().flatten() {
            if *a > next {
                return false;
            }
            if *a == next {
                next += 1;
            }
        }
        next == self.events.len() && self.counts.iter().all(|&c| c > 0)
    }

    /// Event index of every comparison, without `Option` wrapping.
    ///
    /// # Panics
    /// If any comparison is unassigned.
    #[must_use]
    pub fn labels(&self) -> Vec<usize> {
        (0..self.len()).map(|i| self.event_of(i)).collect()
    }

    /// The canonical restricted growth string, e.g. `"001"`.
    ///
    /// Labels are concatenated digits when there are at most ten events and
    /// comma separated otherwise.
    #[must_use]
    pub fn restricted_growth_string(&self) -> String {
        let mut canonical = self.clone();
        canonical.canonicalize();
        if canonical.n_events() <= 10 {
            canonical.labels().iter().map(ToString::to_string).collect()
        } else {
            canonical.labels().iter().join(",")
        }
    }
}
