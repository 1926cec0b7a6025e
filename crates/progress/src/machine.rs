//! Stage state machine.
//!
//! Owns one [`StageState`] in a [`ReactiveCell`], moves its current marker
//! under the stage's [`GateTable`], and dispatches marker-change events to
//! hooks in registration order.
//!
//! Dispatch is synchronous: every hook for a transition has run before the
//! transition call returns. A transition requested from inside a hook (or
//! from a state subscriber) is applied at once, and its event is queued
//! behind the event being dispatched.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use datastory_core::{Marker, MarkerSequence, MultipleChoiceResponse, StageState};
use datastory_reactive::{ReactiveCell, SubscriptionId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Boundary, Result, TransitionError};
use crate::gate::GateTable;

/// One marker transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkerChange<M> {
    /// Marker before the transition
    pub old: M,
    /// Marker the transition landed on
    pub new: M,
}

impl<M: Marker> MarkerChange<M> {
    /// Whether the transition moved forward.
    pub fn is_forward(&self) -> bool {
        self.new > self.old
    }
}

/// Handle returned when registering a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

#[derive(Debug, Clone, Copy)]
enum Trigger<M> {
    Any,
    Enter(M),
    Leave(M),
}

impl<M: Marker> Trigger<M> {
    fn matches(&self, change: &MarkerChange<M>) -> bool {
        match *self {
            Trigger::Any => true,
            Trigger::Enter(m) => change.new == m,
            Trigger::Leave(m) => change.old == m,
        }
    }
}

type HookFn<M, F> = dyn Fn(&StageStateMachine<M, F>, MarkerChange<M>);

struct Hook<M, F> {
    id: HookId,
    trigger: Trigger<M>,
    run: Rc<HookFn<M, F>>,
}

impl<M: Copy, F> Clone for Hook<M, F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            trigger: self.trigger,
            run: Rc::clone(&self.run),
        }
    }
}

struct Inner<M, F> {
    state: ReactiveCell<StageState<M, F>>,
    gates: GateTable<M, F>,
    hooks: RefCell<Vec<Hook<M, F>>>,
    next_hook: Cell<u64>,
    events: RefCell<VecDeque<MarkerChange<M>>>,
    dispatching: Cell<bool>,
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Marker state machine for one stage.
///
/// Cloning yields another handle to the same machine. Hooks receive the
/// machine as an argument, so they never need to capture it.
pub struct StageStateMachine<M, F> {
    inner: Rc<Inner<M, F>>,
}

/// Non-owning handle to a [`StageStateMachine`].
pub struct WeakStageStateMachine<M, F> {
    inner: Weak<Inner<M, F>>,
}

impl<M, F> Clone for StageStateMachine<M, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M, F> Clone for WeakStageStateMachine<M, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<M, F> WeakStageStateMachine<M, F> {
    /// The machine, if it is still alive.
    pub fn upgrade(&self) -> Option<StageStateMachine<M, F>> {
        self.inner.upgrade().map(|inner| StageStateMachine { inner })
    }
}

impl<M, F> StageStateMachine<M, F>
where
    M: Marker,
    F: Clone + PartialEq + 'static,
{
    /// Create a machine over `state`.
    pub fn new(state: StageState<M, F>, gates: GateTable<M, F>) -> Self {
        Self {
            inner: Rc::new(Inner {
                state: ReactiveCell::new(state),
                gates,
                hooks: RefCell::new(Vec::new()),
                next_hook: Cell::new(0),
                events: RefCell::new(VecDeque::new()),
                dispatching: Cell::new(false),
            }),
        }
    }

    /// Non-owning handle, for closures stored outside the machine.
    pub fn downgrade(&self) -> WeakStageStateMachine<M, F> {
        WeakStageStateMachine {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // ---- queries ----

    /// Snapshot of the whole state.
    pub fn state(&self) -> StageState<M, F> {
        self.inner.state.get()
    }

    /// Borrow the state.
    pub fn with_state<R>(&self, f: impl FnOnce(&StageState<M, F>) -> R) -> R {
        self.inner.state.with(f)
    }

    /// Borrow the stage fields.
    pub fn with_fields<R>(&self, f: impl FnOnce(&F) -> R) -> R {
        self.inner.state.with(|s| f(&s.fields))
    }

    /// Stage identifier.
    pub fn stage_id(&self) -> String {
        self.with_state(|s| s.stage_id.clone())
    }

    /// Current marker.
    pub fn current_marker(&self) -> M {
        self.with_state(|s| s.current_marker())
    }

    /// Furthest marker reached.
    pub fn max_marker_reached(&self) -> M {
        self.with_state(|s| s.max_marker_reached())
    }

    /// Whether the current marker is `target`.
    pub fn is_current(&self, target: M) -> bool {
        self.current_marker() == target
    }

    /// Whether the current marker is within `lo..=hi`.
    pub fn between(&self, lo: M, hi: M) -> bool {
        MarkerSequence::<M>::between_inclusive(self.current_marker(), lo, hi)
    }

    /// Whether the current marker is `target` or later.
    pub fn at_or_after(&self, target: M) -> bool {
        self.current_marker() >= target
    }

    /// Name of the gate on the step `from -> to`, if any.
    pub fn gate_for(&self, from: M, to: M) -> Option<String> {
        self.inner.gates.get(from, to).map(|g| g.name().to_string())
    }

    /// The gate table.
    pub fn gates(&self) -> &GateTable<M, F> {
        &self.inner.gates
    }

    /// Name of the gate currently keeping the machine from advancing.
    pub fn blocking_gate(&self) -> Option<String> {
        let current = self.current_marker();
        let next = MarkerSequence::<M>::next(current)?;
        let gates = &self.inner.gates;
        self.with_state(|s| {
            gates
                .get(current, next)
                .filter(|g| !g.passes(s))
                .map(|g| g.name().to_string())
        })
    }

    /// Whether [`advance`](Self::advance) would succeed.
    pub fn can_advance(&self) -> bool {
        let current = self.current_marker();
        MarkerSequence::<M>::next(current).is_some() && self.blocking_gate().is_none()
    }

    /// Whether [`retreat`](Self::retreat) would succeed.
    pub fn can_retreat(&self) -> bool {
        MarkerSequence::<M>::previous(self.current_marker()).is_some()
    }

    // ---- transitions ----

    /// Move to the next marker if its gate passes.
    pub fn advance(&self) -> Result<M> {
        let current = self.current_marker();
        let next = MarkerSequence::<M>::next(current)
            .ok_or_else(|| out_of_range(current, Boundary::Last))?;
        self.check_gates(current, next)?;

        self.apply(next);
        debug!(stage = %self.stage_id(), from = current.name(), to = next.name(), "Advanced");
        Ok(next)
    }

    /// Move to the previous marker. The high-water mark is kept.
    pub fn retreat(&self) -> Result<M> {
        let current = self.current_marker();
        let previous = MarkerSequence::<M>::previous(current)
            .ok_or_else(|| out_of_range(current, Boundary::First))?;

        self.apply(previous);
        debug!(stage = %self.stage_id(), from = current.name(), to = previous.name(), "Retreated");
        Ok(previous)
    }

    /// Move to `target`.
    ///
    /// Forward jumps check every gate on the way before anything changes,
    /// unless `force` is set, and emit one event. An unforced backward jump
    /// retreats one marker at a time, so hooks see every marker passed. A
    /// forced jump in either direction is one transition with one event.
    /// Jumping to the current marker does nothing.
    pub fn jump(&self, target: M, force: bool) -> Result<()> {
        let current = self.current_marker();
        if target == current {
            return Ok(());
        }
        if !force && target < current {
            // Hooks may move the machine while we step; stop once at or below target.
            for _ in 0..(current.ordinal() - target.ordinal()) {
                if self.current_marker() <= target {
                    break;
                }
                self.retreat()?;
            }
            return Ok(());
        }
        if !force {
            self.check_gates(current, target)?;
        }

        self.apply(target);
        if force {
            info!(
                stage = %self.stage_id(),
                from = current.name(),
                to = target.name(),
                "Forced jump"
            );
        } else {
            debug!(stage = %self.stage_id(), from = current.name(), to = target.name(), "Jumped");
        }
        Ok(())
    }

    fn check_gates(&self, from: M, to: M) -> Result<()> {
        let gates = &self.inner.gates;
        let failing = self.with_state(|s| {
            gates
                .first_failing(from, to, s)
                .map(|g| (g.from(), g.to(), g.name().to_string()))
        });
        match failing {
            None => Ok(()),
            Some((gate_from, gate_to, gate)) => {
                warn!(
                    stage = %self.stage_id(),
                    from = gate_from.name(),
                    to = gate_to.name(),
                    %gate,
                    "Transition blocked by gate"
                );
                Err(TransitionError::InvalidTransition {
                    from: gate_from.name(),
                    to: gate_to.name(),
                    gate,
                })
            }
        }
    }

    fn apply(&self, target: M) {
        let mut next = self.state();
        let Some(old) = next.move_to(target) else {
            return;
        };
        self.inner
            .events
            .borrow_mut()
            .push_back(MarkerChange { old, new: target });
        self.inner.state.set(next);
        self.dispatch();
    }

    fn dispatch(&self) {
        if self.inner.dispatching.get() {
            return;
        }
        self.inner.dispatching.set(true);
        let _guard = DispatchGuard(&self.inner.dispatching);

        loop {
            let next = self.inner.events.borrow_mut().pop_front();
            let Some(change) = next else { break };

            let hooks: Vec<Hook<M, F>> = self.inner.hooks.borrow().clone();
            for hook in hooks {
                if hook.trigger.matches(&change) && self.has_hook(hook.id) {
                    (hook.run)(self, change);
                }
            }
        }
    }

    // ---- field mutation ----

    /// Modify the stage fields. Returns whether anything changed.
    pub fn update_fields(&self, f: impl FnOnce(&mut F)) -> bool {
        let mut next = self.state();
        f(&mut next.fields);
        self.inner.state.set(next)
    }

    /// Record an attempt at a multiple-choice question.
    pub fn record_multiple_choice(
        &self,
        tag: &str,
        choice: usize,
        correct: bool,
        score: u32,
    ) -> MultipleChoiceResponse {
        let mut next = self.state();
        let response = next
            .responses
            .record_multiple_choice(tag, choice, correct, score)
            .clone();
        self.inner.state.set(next);
        response
    }

    /// Record a free-text answer.
    pub fn record_free_response(&self, tag: &str, response: impl Into<String>) {
        let mut next = self.state();
        next.responses.record_free_response(tag, response);
        self.inner.state.set(next);
    }

    /// Replace the whole state without emitting marker events.
    pub fn restore(&self, state: StageState<M, F>) {
        self.inner.state.set(state);
    }

    // ---- subscriptions ----

    /// Call `f(old, new)` after every state change, markers included.
    pub fn subscribe_state(
        &self,
        f: impl Fn(&StageState<M, F>, &StageState<M, F>) + 'static,
    ) -> SubscriptionId {
        self.inner.state.subscribe(f)
    }

    /// Remove a state subscriber.
    pub fn unsubscribe_state(&self, id: SubscriptionId) -> bool {
        self.inner.state.unsubscribe(id)
    }

    /// Call `f` after every marker transition.
    pub fn on_marker_change(
        &self,
        f: impl Fn(&StageStateMachine<M, F>, MarkerChange<M>) + 'static,
    ) -> HookId {
        self.add_hook(Trigger::Any, f)
    }

    /// Call `f` after every transition landing on `marker`.
    pub fn on_enter(
        &self,
        marker: M,
        f: impl Fn(&StageStateMachine<M, F>, MarkerChange<M>) + 'static,
    ) -> HookId {
        self.add_hook(Trigger::Enter(marker), f)
    }

    /// Call `f` after every transition away from `marker`.
    pub fn on_leave(
        &self,
        marker: M,
        f: impl Fn(&StageStateMachine<M, F>, MarkerChange<M>) + 'static,
    ) -> HookId {
        self.add_hook(Trigger::Leave(marker), f)
    }

    /// Remove a hook. Returns whether it was registered.
    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut hooks = self.inner.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|h| h.id != id);
        hooks.len() != before
    }

    fn add_hook(
        &self,
        trigger: Trigger<M>,
        f: impl Fn(&StageStateMachine<M, F>, MarkerChange<M>) + 'static,
    ) -> HookId {
        let id = HookId(self.inner.next_hook.get());
        self.inner.next_hook.set(id.0 + 1);
        self.inner.hooks.borrow_mut().push(Hook {
            id,
            trigger,
            run: Rc::new(f),
        });
        id
    }

    fn has_hook(&self, id: HookId) -> bool {
        self.inner.hooks.borrow().iter().any(|h| h.id == id)
    }
}

impl<M, F> std::fmt::Debug for StageStateMachine<M, F>
where
    M: Marker,
    F: Clone + PartialEq + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageStateMachine")
            .field("state", &self.inner.state)
            .field("gates", &self.inner.gates.len())
            .finish()
    }
}

fn out_of_range<M: Marker>(marker: M, boundary: Boundary) -> TransitionError {
    TransitionError::OutOfRange {
        marker: marker.name(),
        boundary,
        sequence: M::SEQUENCE_NAME,
    }
}
