//! Gate table - pure predicates guarding single marker steps.

use std::collections::BTreeMap;
use std::rc::Rc;

use datastory_core::{Marker, MarkerSequence, StageState};

use crate::error::GateError;

type Check<M, F> = Rc<dyn Fn(&StageState<M, F>) -> bool>;

/// A named predicate on one `(from, next)` step.
pub struct Gate<M, F> {
    name: String,
    from: M,
    to: M,
    check: Check<M, F>,
}

impl<M: Marker, F> Gate<M, F> {
    /// Gate name, used in errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step start.
    pub fn from(&self) -> M {
        self.from
    }

    /// Step end.
    pub fn to(&self) -> M {
        self.to
    }

    /// Evaluate against `state`.
    pub fn passes(&self, state: &StageState<M, F>) -> bool {
        (self.check)(state)
    }
}

impl<M: Marker, F> std::fmt::Debug for Gate<M, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("name", &self.name)
            .field("from", &self.from.name())
            .field("to", &self.to.name())
            .finish()
    }
}

/// Every gate of a stage, keyed by the step they guard.
///
/// Steps without a gate are always open.
pub struct GateTable<M, F> {
    gates: BTreeMap<M, Gate<M, F>>,
}

impl<M: Marker, F> Default for GateTable<M, F> {
    fn default() -> Self {
        Self {
            gates: BTreeMap::new(),
        }
    }
}

impl<M: Marker, F> GateTable<M, F> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard the step `from -> to` with `check`.
    ///
    /// `to` must directly follow `from`, and each step takes one gate.
    pub fn register(
        &mut self,
        from: M,
        to: M,
        name: impl Into<String>,
        check: impl Fn(&StageState<M, F>) -> bool + 'static,
    ) -> Result<(), GateError> {
        let name = name.into();
        if MarkerSequence::<M>::next(from) != Some(to) {
            return Err(GateError::NonAdjacent {
                gate: name,
                from: from.name(),
                to: to.name(),
            });
        }
        if let Some(existing) = self.gates.get(&from) {
            return Err(GateError::Duplicate {
                existing: existing.name.clone(),
                from: from.name(),
                to: to.name(),
            });
        }
        self.gates.insert(
            from,
            Gate {
                name,
                from,
                to,
                check: Rc::new(check),
            },
        );
        Ok(())
    }

    /// Builder form of [`GateTable::register`].
    pub fn with_gate(
        mut self,
        from: M,
        to: M,
        name: impl Into<String>,
        check: impl Fn(&StageState<M, F>) -> bool + 'static,
    ) -> Result<Self, GateError> {
        self.register(from, to, name, check)?;
        Ok(self)
    }

    /// Gate on the step `from -> to`, if any.
    pub fn get(&self, from: M, to: M) -> Option<&Gate<M, F>> {
        self.gates.get(&from).filter(|g| g.to == to)
    }

    /// First gate between `from` and `to` (forward) that `state` fails.
    pub fn first_failing(&self, from: M, to: M, state: &StageState<M, F>) -> Option<&Gate<M, F>> {
        if to <= from {
            return None;
        }
        self.gates
            .range(from..to)
            .map(|(_, gate)| gate)
            .find(|gate| !gate.passes(state))
    }

    /// Gates in marker order.
    pub fn iter(&self) -> impl Iterator<Item = &Gate<M, F>> {
        self.gates.values()
    }

    /// Number of gates.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Whether no step is gated.
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    datastory_core::markers! {
        enum Step {
            One = "one",
            Two = "two",
            Three = "three",
            Four = "four",
        }
    }

    type State = StageState<Step, u32>;

    fn table() -> GateTable<Step, u32> {
        GateTable::new()
            .with_gate(Step::One, Step::Two, "at_least_1", |s: &State| s.fields >= 1)
            .unwrap()
            .with_gate(Step::Three, Step::Four, "at_least_3", |s: &State| s.fields >= 3)
            .unwrap()
    }

    #[test]
    fn test_register_rejects_non_adjacent_and_duplicates() {
        let mut gates = table();
        assert!(matches!(
            gates.register(Step::One, Step::Three, "skip", |_| true),
            Err(GateError::NonAdjacent { .. })
        ));
        assert!(matches!(
            gates.register(Step::Two, Step::One, "backwards", |_| true),
            Err(GateError::NonAdjacent { .. })
        ));
        assert_eq!(
            gates.register(Step::One, Step::Two, "again", |_| true),
            Err(GateError::Duplicate {
                existing: "at_least_1".to_string(),
                from: "one",
                to: "two",
            })
        );
        assert_eq!(gates.len(), 2);
    }

    #[test]
    fn test_first_failing_gate_in_range() {
        let gates = table();
        let mut state = State::new("steps");

        assert_eq!(
            gates.first_failing(Step::One, Step::Four, &state).map(|g| g.name()),
            Some("at_least_1")
        );
        state.fields = 2;
        assert_eq!(
            gates.first_failing(Step::One, Step::Four, &state).map(|g| g.name()),
            Some("at_least_3")
        );
        assert!(gates.first_failing(Step::One, Step::Three, &state).is_none());
        assert!(gates.first_failing(Step::Four, Step::One, &state).is_none());
    }

    #[test]
    fn test_lookup_and_iteration_order() {
        let gates = table();
        assert_eq!(gates.get(Step::Three, Step::Four).map(|g| g.name()), Some("at_least_3"));
        assert!(gates.get(Step::Two, Step::Three).is_none());

        let names: Vec<_> = gates.iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["at_least_1", "at_least_3"]);
    }
}
