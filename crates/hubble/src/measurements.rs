//! Student and example measurement collections.
//!
//! Both are reactive lists shared by every stage of a session; stages
//! subscribe to them to keep their counters and gates current.

use datastory_core::{Galaxy, GalaxyId, Measurement, MeasurementNumber, MeasurementSource};
use datastory_reactive::{ReactiveCell, SubscriptionId, WeakReactiveCell};
use tracing::debug;

use crate::physics::rest_wavelength;

/// Most galaxies a student measures.
pub const MAX_GALAXIES: usize = 5;

/// A listener on a measurement list, removed when dropped.
#[must_use = "dropping a MeasurementWatch removes the listener"]
pub struct MeasurementWatch {
    cell: WeakReactiveCell<Vec<Measurement>>,
    id: SubscriptionId,
}

impl Drop for MeasurementWatch {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.upgrade() {
            cell.unsubscribe(self.id);
        }
    }
}

/// What an update did to a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementUpdate {
    /// No measurement matched
    Missing,
    /// Found, and already held the new values
    Unchanged,
    /// Found and modified
    Changed,
}

impl MeasurementUpdate {
    /// Whether a measurement matched.
    pub fn found(self) -> bool {
        self != MeasurementUpdate::Missing
    }

    /// Whether the measurement was modified.
    pub fn changed(self) -> bool {
        self == MeasurementUpdate::Changed
    }
}

fn update_where(
    cell: &ReactiveCell<Vec<Measurement>>,
    matches: impl Fn(&Measurement) -> bool,
    f: impl FnOnce(&mut Measurement),
) -> MeasurementUpdate {
    let mut all = cell.get();
    let Some(m) = all.iter_mut().find(|m| matches(m)) else {
        return MeasurementUpdate::Missing;
    };
    f(m);
    if cell.set(all) {
        MeasurementUpdate::Changed
    } else {
        MeasurementUpdate::Unchanged
    }
}

fn watch(
    cell: &ReactiveCell<Vec<Measurement>>,
    f: impl Fn(&[Measurement]) + 'static,
) -> MeasurementWatch {
    MeasurementWatch {
        cell: cell.downgrade(),
        id: cell.subscribe(move |_, new| f(new)),
    }
}

/// The student's own measurements, in selection order.
#[derive(Clone, Default)]
pub struct MeasurementCollection {
    cell: ReactiveCell<Vec<Measurement>>,
}

impl MeasurementCollection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection holding `measurements`.
    pub fn with_measurements(measurements: Vec<Measurement>) -> Self {
        Self {
            cell: ReactiveCell::new(measurements),
        }
    }

    /// Number of measurements.
    pub fn len(&self) -> usize {
        self.cell.with(|m| m.len())
    }

    /// Whether nothing has been measured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a galaxy is already in the collection.
    pub fn contains(&self, galaxy_id: GalaxyId) -> bool {
        self.cell.with(|m| m.iter().any(|x| x.galaxy_id() == galaxy_id))
    }

    /// Append a measurement of `galaxy`, filling its rest wavelength from
    /// the element. Returns `false` when the galaxy is already present.
    pub fn add(&self, student_id: u64, galaxy: Galaxy) -> bool {
        if self.contains(galaxy.id) {
            return false;
        }
        let mut measurement = Measurement::new(student_id, galaxy);
        measurement.rest_wave_value = rest_wavelength(&measurement.galaxy.element);
        debug!(galaxy = measurement.galaxy_id(), "Adding measurement");
        self.cell.update(|m| m.push(measurement))
    }

    /// Modify the measurement of a galaxy.
    pub fn update(
        &self,
        galaxy_id: GalaxyId,
        f: impl FnOnce(&mut Measurement),
    ) -> MeasurementUpdate {
        update_where(&self.cell, |m| m.galaxy_id() == galaxy_id, f)
    }

    /// Modify every measurement at once.
    pub fn update_all(&self, f: impl FnMut(&mut Measurement)) -> bool {
        self.cell.update(|all| all.iter_mut().for_each(f))
    }

    /// Replace the whole collection.
    pub fn replace(&self, measurements: Vec<Measurement>) -> bool {
        self.cell.set(measurements)
    }

    /// Call `f` with the new list after every change.
    pub fn subscribe(&self, f: impl Fn(&[Measurement]) + 'static) -> SubscriptionId {
        self.cell.subscribe(move |_, new| f(new))
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.cell.unsubscribe(id)
    }

    /// Like [`subscribe`](Self::subscribe), detached when the guard drops.
    pub fn watch(&self, f: impl Fn(&[Measurement]) + 'static) -> MeasurementWatch {
        watch(&self.cell, f)
    }
}

impl MeasurementSource for MeasurementCollection {
    fn measurements(&self) -> Vec<Measurement> {
        self.cell.get()
    }
}

/// Measurements of the example galaxy, first and second pass.
#[derive(Clone, Default)]
pub struct ExampleMeasurements {
    cell: ReactiveCell<Vec<Measurement>>,
}

impl ExampleMeasurements {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a first-pass measurement of `galaxy`.
    pub fn for_galaxy(student_id: u64, galaxy: Galaxy) -> Self {
        let mut first = Measurement::new(student_id, galaxy);
        first.rest_wave_value = rest_wavelength(&first.galaxy.element);
        Self {
            cell: ReactiveCell::new(vec![first]),
        }
    }

    /// All example measurements.
    pub fn all(&self) -> Vec<Measurement> {
        self.cell.get()
    }

    /// The example measurement of `galaxy_id` with the given number.
    pub fn get(&self, galaxy_id: GalaxyId, number: MeasurementNumber) -> Option<Measurement> {
        self.cell.with(|all| {
            all.iter()
                .find(|m| m.galaxy_id() == galaxy_id && m.measurement_number == number)
                .cloned()
        })
    }

    /// First-pass measurement, whatever the galaxy.
    pub fn first(&self) -> Option<Measurement> {
        self.cell.with(|all| {
            all.iter()
                .find(|m| m.measurement_number == MeasurementNumber::First)
                .cloned()
        })
    }

    /// Rest wavelength of the first example, used by the linked viewers.
    pub fn rest_wavelength(&self) -> Option<f64> {
        self.first().and_then(|m| m.rest_wave_value)
    }

    /// Modify one example measurement.
    pub fn update(
        &self,
        galaxy_id: GalaxyId,
        number: MeasurementNumber,
        f: impl FnOnce(&mut Measurement),
    ) -> MeasurementUpdate {
        update_where(
            &self.cell,
            |m| m.galaxy_id() == galaxy_id && m.measurement_number == number,
            f,
        )
    }

    /// Create the second-pass measurement from the first if it is missing.
    ///
    /// Safe to call any number of times; returns whether it created one.
    pub fn ensure_second_example(&self) -> bool {
        let Some(first) = self.first() else {
            return false;
        };
        if self.get(first.galaxy_id(), MeasurementNumber::Second).is_some() {
            return false;
        }
        let mut second = Measurement::new(first.student_id, first.galaxy.clone())
            .with_number(MeasurementNumber::Second);
        second.rest_wave_value = first.rest_wave_value;
        debug!(galaxy = first.galaxy_id(), "Creating second example measurement");
        self.cell.update(|all| all.push(second))
    }

    /// Call `f` with the new list after every change.
    pub fn subscribe(&self, f: impl Fn(&[Measurement]) + 'static) -> SubscriptionId {
        self.cell.subscribe(move |_, new| f(new))
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.cell.unsubscribe(id)
    }

    /// Like [`subscribe`](Self::subscribe), detached when the guard drops.
    pub fn watch(&self, f: impl Fn(&[Measurement]) + 'static) -> MeasurementWatch {
        watch(&self.cell, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn galaxy(id: GalaxyId) -> Galaxy {
        Galaxy {
            id,
            name: format!("J{:06}", id),
            ra: 150.0,
            decl: 2.0,
            z: 0.02,
            element: "H-α".to_string(),
        }
    }

    #[test]
    fn test_add_ignores_duplicates_and_sets_rest_wavelength() {
        let measurements = MeasurementCollection::new();
        assert!(measurements.add(1, galaxy(10)));
        assert!(!measurements.add(1, galaxy(10)));
        assert_eq!(measurements.len(), 1);
        assert_eq!(
            measurements.get_measurement(10).and_then(|m| m.rest_wave_value),
            Some(6565.0)
        );
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let measurements = MeasurementCollection::new();
        measurements.add(1, galaxy(10));
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        measurements.subscribe(move |all| c.set(all.len()));

        assert_eq!(
            measurements.update(10, |m| m.obs_wave_value = Some(6700.0)),
            MeasurementUpdate::Changed
        );
        assert_eq!(
            measurements.update(10, |m| m.obs_wave_value = Some(6700.0)),
            MeasurementUpdate::Unchanged
        );
        assert_eq!(
            measurements.update(99, |m| m.obs_wave_value = Some(1.0)),
            MeasurementUpdate::Missing
        );
        assert_eq!(calls.get(), 1);
        assert_eq!(measurements.count_where(|m| m.obs_wave_value.is_some()), 1);
    }

    #[test]
    fn test_watch_detaches_on_drop() {
        let measurements = MeasurementCollection::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let guard = measurements.watch(move |_| c.set(c.get() + 1));

        measurements.add(1, galaxy(1));
        drop(guard);
        measurements.add(1, galaxy(2));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_ensure_second_example_is_idempotent() {
        let examples = ExampleMeasurements::for_galaxy(1, galaxy(1576));
        assert!(examples.ensure_second_example());
        let once = examples.all();
        assert!(!examples.ensure_second_example());
        assert_eq!(examples.all(), once);
        assert_eq!(once.len(), 2);

        let second = examples.get(1576, MeasurementNumber::Second).unwrap();
        assert_eq!(second.rest_wave_value, Some(6565.0));
        assert!(second.obs_wave_value.is_none());

        assert!(!ExampleMeasurements::new().ensure_second_example());
    }

    #[test]
    fn test_example_update_tells_found_from_changed() {
        let examples = ExampleMeasurements::for_galaxy(1, galaxy(1576));
        let set = |m: &mut Measurement| m.ang_size_value = Some(61.0);

        assert!(examples.update(1576, MeasurementNumber::First, set).changed());
        let again = examples.update(1576, MeasurementNumber::First, set);
        assert!(again.found());
        assert!(!again.changed());
        assert!(!examples.update(1576, MeasurementNumber::Second, set).found());
    }
}
