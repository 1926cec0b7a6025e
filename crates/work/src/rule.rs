//! Auto-advance rules.

use std::cell::Cell;

use datastory_core::{Marker, StageState};

type Predicate<M, F> = Box<dyn Fn(&StageState<M, F>) -> bool>;

/// Force-jump to `target` when `when` becomes true while the stage sits at
/// `at`.
///
/// Rules are edge-triggered: they fire when the predicate goes from false
/// to true, never merely because it holds. A student who retreats past a
/// rule that already fired is not pushed forward again until the predicate
/// drops and rises once more.
pub struct AutoAdvanceRule<M, F> {
    /// Rule name, for logs
    pub name: String,
    /// Marker the rule is armed at
    pub at: M,
    /// Marker the rule jumps to
    pub target: M,
    when: Predicate<M, F>,
    was_satisfied: Cell<bool>,
}

impl<M: Marker, F> AutoAdvanceRule<M, F> {
    /// Create a rule.
    pub fn new(
        name: impl Into<String>,
        at: M,
        target: M,
        when: impl Fn(&StageState<M, F>) -> bool + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            at,
            target,
            when: Box::new(when),
            was_satisfied: Cell::new(false),
        }
    }

    /// Record the predicate's value without firing.
    pub(crate) fn prime(&self, state: &StageState<M, F>) {
        self.was_satisfied.set((self.when)(state));
    }

    /// Feed a new state; returns whether the rule fires.
    pub(crate) fn observe(&self, state: &StageState<M, F>) -> bool {
        let satisfied = (self.when)(state);
        let rising = satisfied && !self.was_satisfied.get();
        self.was_satisfied.set(satisfied);
        rising && state.current_marker() == self.at
    }
}

impl<M: Marker, F> std::fmt::Debug for AutoAdvanceRule<M, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoAdvanceRule")
            .field("name", &self.name)
            .field("at", &self.at.name())
            .field("target", &self.target.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    datastory_core::markers! {
        enum Ab {
            A = "a",
            B = "b",
        }
    }

    #[test]
    fn test_fires_only_on_rising_edge_at_marker() {
        let rule = AutoAdvanceRule::new("one", Ab::A, Ab::B, |s: &StageState<Ab, u32>| {
            s.fields == 1
        });
        let mut state = StageState::<Ab, u32>::new("ab");
        rule.prime(&state);

        state.fields = 1;
        assert!(rule.observe(&state));
        // still true, no new edge
        assert!(!rule.observe(&state));

        state.fields = 2;
        assert!(!rule.observe(&state));
        state.fields = 1;
        state.move_to(Ab::B);
        // edge away from the armed marker is consumed
        assert!(!rule.observe(&state));
        state.move_to(Ab::A);
        assert!(!rule.observe(&state));
    }

    #[test]
    fn test_primed_rule_does_not_fire() {
        let rule = AutoAdvanceRule::new("one", Ab::A, Ab::B, |s: &StageState<Ab, u32>| {
            s.fields == 1
        });
        let mut state = StageState::<Ab, u32>::new("ab");
        state.fields = 1;
        rule.prime(&state);
        assert!(!rule.observe(&state));
    }
}
