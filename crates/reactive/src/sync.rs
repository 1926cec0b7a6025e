//! Two-way links between reactive cells.
//!
//! A [`SyncLink`] keeps two cells consistent through a forward and an inverse
//! transform. Each side remembers the value the link last wrote onto it, and
//! the notification carrying that value is dropped when it arrives, even if
//! the cell delivers it later from its queue. One external change produces
//! at most one hop and never comes back onto the cell it started from.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::cell::{ReactiveCell, SubscriptionId, WeakReactiveCell};

/// What a link did with one change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The counterpart was updated
    Propagated,
    /// The counterpart already held the computed value
    Unchanged,
    /// The transform declined to produce a value
    Skipped,
    /// The change was an echo of the link's own write
    Suppressed,
    /// The counterpart cell no longer exists
    Detached,
}

/// Counters of a link's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Writes from the first cell onto the second
    pub forward_hops: u64,
    /// Writes from the second cell onto the first
    pub inverse_hops: u64,
    /// Transforms that returned `None`
    pub skipped: u64,
    /// Echo notifications dropped while propagating
    pub suppressed: u64,
}

impl SyncStats {
    /// Total writes performed by the link.
    pub fn hops(&self) -> u64 {
        self.forward_hops + self.inverse_hops
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Inverse,
}

#[derive(Default)]
struct LinkState {
    stats: Cell<SyncStats>,
}

/// The value the link wrote onto one side and has not yet seen echoed.
struct Echo<T>(RefCell<Option<T>>);

impl<T: PartialEq> Echo<T> {
    fn new() -> Self {
        Self(RefCell::new(None))
    }

    fn arm(&self, value: T) {
        *self.0.borrow_mut() = Some(value);
    }

    fn clear(&self) {
        self.0.borrow_mut().take();
    }

    /// Consume the expected echo if `value` is it.
    fn take_if(&self, value: &T) -> bool {
        let mut expected = self.0.borrow_mut();
        if expected.as_ref() == Some(value) {
            *expected = None;
            true
        } else {
            false
        }
    }
}

impl LinkState {
    fn record(&self, f: impl FnOnce(&mut SyncStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn propagate<S, T>(
        &self,
        direction: Direction,
        source: &S,
        source_echo: &Echo<S>,
        transform: &dyn Fn(&S) -> Option<T>,
        target: &WeakReactiveCell<T>,
        target_echo: &Echo<T>,
    ) -> SyncOutcome
    where
        S: PartialEq,
        T: Clone + PartialEq + 'static,
    {
        if source_echo.take_if(source) {
            self.record(|s| s.suppressed += 1);
            return SyncOutcome::Suppressed;
        }
        let Some(target) = target.upgrade() else {
            return SyncOutcome::Detached;
        };
        let Some(value) = transform(source) else {
            self.record(|s| s.skipped += 1);
            trace!(?direction, "Sync computation skipped");
            return SyncOutcome::Skipped;
        };
        if target.with(|current| *current == value) {
            return SyncOutcome::Unchanged;
        }

        // Armed before the write: an idle target notifies synchronously.
        target_echo.arm(value.clone());
        if !target.set(value) {
            target_echo.clear();
            return SyncOutcome::Unchanged;
        }
        self.record(|s| match direction {
            Direction::Forward => s.forward_hops += 1,
            Direction::Inverse => s.inverse_hops += 1,
        });
        SyncOutcome::Propagated
    }
}

/// A live two-way link. Dropping it detaches both sides.
#[must_use = "dropping a SyncLink detaches it immediately"]
pub struct SyncLink {
    state: Rc<LinkState>,
    detach: Option<Box<dyn FnOnce()>>,
}

impl SyncLink {
    /// Activity counters.
    pub fn stats(&self) -> SyncStats {
        self.state.stats.get()
    }

    /// Whether the link is still attached.
    pub fn is_linked(&self) -> bool {
        self.detach.is_some()
    }

    /// Detach both sides now.
    pub fn unlink(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for SyncLink {
    fn drop(&mut self) {
        self.unlink();
    }
}

impl std::fmt::Debug for SyncLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLink")
            .field("linked", &self.is_linked())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Link `a` and `b` so that a change on either side updates the other.
///
/// `forward` maps a value of `a` to a value of `b`, `inverse` the other way.
/// A transform returning `None` leaves the counterpart untouched. The
/// counterpart is only written when the computed value differs from what it
/// holds. Nothing is propagated at link time.
pub fn link<A, B, F, G>(
    a: &ReactiveCell<A>,
    b: &ReactiveCell<B>,
    forward: F,
    inverse: G,
) -> SyncLink
where
    A: Clone + PartialEq + 'static,
    B: Clone + PartialEq + 'static,
    F: Fn(&A) -> Option<B> + 'static,
    G: Fn(&B) -> Option<A> + 'static,
{
    let state = Rc::new(LinkState::default());
    let a_echo = Rc::new(Echo::<A>::new());
    let b_echo = Rc::new(Echo::<B>::new());

    let a_sub = {
        let state = Rc::clone(&state);
        let (a_echo, b_echo) = (Rc::clone(&a_echo), Rc::clone(&b_echo));
        let target = b.downgrade();
        a.subscribe(move |_, new| {
            state.propagate(Direction::Forward, new, &a_echo, &forward, &target, &b_echo);
        })
    };
    let b_sub = {
        let state = Rc::clone(&state);
        let target = a.downgrade();
        b.subscribe(move |_, new| {
            state.propagate(Direction::Inverse, new, &b_echo, &inverse, &target, &a_echo);
        })
    };

    let a_weak = a.downgrade();
    let b_weak = b.downgrade();
    let detach = move || {
        unsubscribe(&a_weak, a_sub);
        unsubscribe(&b_weak, b_sub);
    };

    SyncLink {
        state,
        detach: Some(Box::new(detach)),
    }
}

fn unsubscribe<T: Clone + PartialEq + 'static>(cell: &WeakReactiveCell<T>, id: SubscriptionId) {
    if let Some(cell) = cell.upgrade() {
        cell.unsubscribe(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: f64 = 6190.0;

    fn reciprocal(range: &Vec<f64>) -> Option<Vec<f64>> {
        if range.iter().any(|v| *v == 0.0) {
            return None;
        }
        Some(range.iter().rev().map(|v| K / v).collect())
    }

    #[test]
    fn test_forward_change_propagates_once() {
        let angular = ReactiveCell::new(vec![1.0, 2.0]);
        let distance = ReactiveCell::new(Vec::<f64>::new());
        let link = link(&angular, &distance, reciprocal, reciprocal);

        angular.set(vec![10.0, 20.0]);
        assert_eq!(distance.get(), vec![K / 20.0, K / 10.0]);
        assert_eq!(link.stats().forward_hops, 1);
        assert_eq!(link.stats().inverse_hops, 0);
        assert_eq!(link.stats().suppressed, 1);

        // writing back the already-consistent pair changes nothing
        distance.set(vec![K / 20.0, K / 10.0]);
        assert_eq!(angular.get(), vec![10.0, 20.0]);
        assert_eq!(link.stats().hops(), 1);
    }

    #[test]
    fn test_inverse_direction() {
        let celsius = ReactiveCell::new(0.0_f64);
        let fahrenheit = ReactiveCell::new(32.0_f64);
        let link = link(
            &celsius,
            &fahrenheit,
            |c| Some(c * 9.0 / 5.0 + 32.0),
            |f| Some((f - 32.0) * 5.0 / 9.0),
        );

        fahrenheit.set(212.0);
        assert_eq!(celsius.get(), 100.0);
        assert_eq!(link.stats().inverse_hops, 1);
        assert_eq!(link.stats().forward_hops, 0);
    }

    #[test]
    fn test_skipped_transform_leaves_counterpart() {
        let angular = ReactiveCell::new(vec![1.0]);
        let distance = ReactiveCell::new(vec![K]);
        let link = link(&angular, &distance, reciprocal, reciprocal);

        angular.set(vec![0.0, 5.0]);
        assert_eq!(distance.get(), vec![K]);
        assert_eq!(link.stats().skipped, 1);
        assert_eq!(link.stats().hops(), 0);
    }

    #[test]
    fn test_unchanged_counterpart_is_not_written() {
        let a = ReactiveCell::new(1_i32);
        let b = ReactiveCell::new(10_i32);
        let writes = Rc::new(Cell::new(0));
        let w = writes.clone();
        b.subscribe(move |_, _| w.set(w.get() + 1));

        // forward collapses everything onto 10
        let link = link(&a, &b, |_| Some(10), |b| Some(b / 10));
        a.set(2);
        assert_eq!(writes.get(), 0);
        assert_eq!(link.stats().hops(), 0);
    }

    #[test]
    fn test_queued_echo_is_not_written_back() {
        let a = ReactiveCell::new(0.0_f64);
        let b = ReactiveCell::new(0.0_f64);
        let a_writes = Rc::new(Cell::new(0));
        let w = a_writes.clone();
        a.subscribe(move |_, _| w.set(w.get() + 1));
        let link = link(&a, &b, |x| Some(x * 3.0), |y| Some(y / 3.0));

        // While b is still notifying, a listener moves a; the link's write
        // onto b is queued behind b's current notification.
        let weak = a.downgrade();
        b.subscribe(move |_, new| {
            if *new == 99.0 {
                weak.upgrade().unwrap().set(0.1);
            }
        });

        b.set(99.0);
        assert_eq!(a.get(), 0.1);
        assert_eq!(b.get(), 0.1 * 3.0);
        assert_eq!(link.stats().inverse_hops, 1);
        assert_eq!(link.stats().forward_hops, 1);
        assert_eq!(link.stats().suppressed, 2);
        assert_eq!(a_writes.get(), 2);
    }

    #[test]
    fn test_drop_detaches_both_sides() {
        let a = ReactiveCell::new(1_i32);
        let b = ReactiveCell::new(2_i32);
        {
            let _link = link(&a, &b, |a| Some(a * 2), |b| Some(b / 2));
            assert_eq!(a.listener_count(), 1);
            assert_eq!(b.listener_count(), 1);
        }
        assert_eq!(a.listener_count(), 0);
        assert_eq!(b.listener_count(), 0);
        a.set(7);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn test_unlink_and_dead_counterpart() {
        let a = ReactiveCell::new(1_i32);
        let mut l = {
            let b = ReactiveCell::new(2_i32);
            link(&a, &b, |a| Some(a * 2), |b| Some(b / 2))
        };
        // counterpart already gone
        a.set(3);
        assert_eq!(l.stats().hops(), 0);

        l.unlink();
        assert!(!l.is_linked());
        assert_eq!(a.listener_count(), 0);
    }
}
