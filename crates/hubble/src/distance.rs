//! Distance measurement stage.
//!
//! Students measure the example galaxy's angular size in the sky viewer,
//! turn it into a distance, compare against the class on a dot plot, then
//! repeat the measurement for their own galaxies.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use datastory_core::{
    Galaxy, GalaxyId, Measurement, MeasurementNumber, MeasurementSource, SessionContext, StageState,
};
use datastory_progress::{GateError, GateTable, StageStateMachine, WeakStageStateMachine};
use datastory_reactive::{link, ReactiveCell, SyncLink};
use datastory_storage::StageStore;
use datastory_work::{AutoAdvanceRule, ControllerConfig, StageStateController};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::measurements::{
    ExampleMeasurements, MeasurementCollection, MeasurementWatch, MAX_GALAXIES,
};
use crate::physics::{distance_from_angular_size, reciprocal_range};
use crate::sky::{SkyViewer, GALAXY_FOV};

/// Persistence key suffix of this stage.
pub const STAGE_ID: &str = "distance_measurements";

/// Accepted angular sizes while measuring the example galaxy, in arcseconds.
pub const EXAMPLE_GUARD_RANGE: (f64, f64) = (6.0, 6.0 * 60.0);

/// Accepted angular sizes for the student's galaxies, in arcseconds.
pub const GUARD_RANGE: (f64, f64) = (6.0, 60.0 * 60.0);

datastory_core::markers! {
    /// Checkpoints of the distance measurement stage.
    pub enum DistanceMarker {
        AngSiz1 = "ang_siz1",
        ChoRow1 = "cho_row1",
        AngSiz2 = "ang_siz2",
        AngSiz2b = "ang_siz2b",
        AngSiz3 = "ang_siz3",
        AngSiz4 = "ang_siz4",
        AngSiz5 = "ang_siz5",
        AngSiz5a = "ang_siz5a",
        EstDis1 = "est_dis1",
        EstDis2 = "est_dis2",
        EstDis3 = "est_dis3",
        EstDis4 = "est_dis4",
        DotSeq1 = "dot_seq1",
        DotSeq2 = "dot_seq2",
        DotSeq3 = "dot_seq3",
        DotSeq4 = "dot_seq4",
        DotSeq4a = "dot_seq4a",
        DotSeq5 = "dot_seq5",
        DotSeq5a = "dot_seq5a",
        DotSeq5b = "dot_seq5b",
        DotSeq5c = "dot_seq5c",
        RepRem1 = "rep_rem1",
        FilRem1 = "fil_rem1",
        EndSta3 = "end_sta3",
    }
}

/// Stage-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceFields {
    /// Example galaxy chosen from the example table
    pub selected_example_galaxy: Option<GalaxyId>,
    /// Student galaxy being measured
    pub selected_galaxy: Option<GalaxyId>,
    /// Ruler clicks reported by the sky viewer
    pub ruler_click_count: u32,
    /// Example angular-size measurements taken
    pub n_meas: u32,
    /// Last example angular size, in arcseconds
    pub meas_theta: f64,
    /// Student galaxies with an angular size
    pub angular_sizes_total: usize,
    /// Example measurements with an angular size
    pub example_angular_sizes_total: usize,
    /// Student galaxies with a distance
    pub distances_total: usize,
    /// Whether example distances are filled in automatically
    pub fill_est_dist_values: bool,
    /// Whether the student pressed the fill-distances button
    pub galaxy_distances_filled: bool,
    /// Whether the ruler overlay is shown
    pub show_ruler: bool,
    /// Bumped whenever the viewer canvas must be cleared
    pub reset_canvas: u32,
    /// Bumped on every marker change
    pub background_count: u32,
    /// Whether the last measurement was rejected by the viewer
    pub bad_measurement: bool,
    /// Rejected measurements so far
    pub bad_measurement_count: u32,
    /// Whether the sky viewer reported ready
    pub wwt_ready: bool,
}

type State = StageState<DistanceMarker, DistanceFields>;
type Machine = StageStateMachine<DistanceMarker, DistanceFields>;

/// Gates of the stage.
pub fn gates() -> std::result::Result<GateTable<DistanceMarker, DistanceFields>, GateError> {
    use DistanceMarker::*;

    GateTable::new()
        .with_gate(ChoRow1, AngSiz2, "example_galaxy_selected", |s: &State| {
            s.fields.selected_example_galaxy.is_some()
        })?
        .with_gate(AngSiz4, AngSiz5, "example_measured", |s: &State| s.fields.n_meas >= 1)?
        .with_gate(EstDis4, DotSeq1, "example_distance_estimated", |s: &State| {
            s.fields.fill_est_dist_values
        })?
        .with_gate(DotSeq5, DotSeq5a, "example_measured_twice", |s: &State| {
            s.fields.example_angular_sizes_total >= 2
        })?
        .with_gate(RepRem1, FilRem1, "all_angular_sizes_measured", |s: &State| {
            s.fields.angular_sizes_total >= MAX_GALAXIES
        })?
        .with_gate(FilRem1, EndSta3, "all_distances_estimated", |s: &State| {
            s.fields.distances_total >= MAX_GALAXIES
        })
}

/// Whether the ruler overlay belongs on screen at `marker`.
pub fn shows_ruler(marker: DistanceMarker) -> bool {
    use DistanceMarker::*;
    (AngSiz3..=EstDis4).contains(&marker) || marker >= DotSeq5
}

/// Angular sizes the measuring tool accepts at `marker`.
pub fn guard_range(marker: DistanceMarker) -> (f64, f64) {
    if uses_example(marker) {
        EXAMPLE_GUARD_RANGE
    } else {
        GUARD_RANGE
    }
}

fn sync_guard(marker: DistanceMarker, sky: &dyn SkyViewer) {
    let (min, max) = guard_range(marker);
    sky.set_guard(min, max);
}

fn resets_canvas(marker: DistanceMarker) -> bool {
    use DistanceMarker::*;
    marker == DotSeq5 || (DotSeq1..=DotSeq4).contains(&marker)
}

fn uses_example(marker: DistanceMarker) -> bool {
    marker <= DistanceMarker::DotSeq5c
}

fn example_number(marker: DistanceMarker) -> MeasurementNumber {
    if marker >= DistanceMarker::DotSeq5 {
        MeasurementNumber::Second
    } else {
        MeasurementNumber::First
    }
}

fn count(measurements: &[Measurement], filled: impl Fn(&Measurement) -> bool) -> usize {
    measurements.iter().filter(|m| filled(m)).count()
}

fn sync_ruler(machine: &Machine, sky: &dyn SkyViewer) {
    let show = shows_ruler(machine.current_marker());
    if machine.update_fields(|f| f.show_ruler = show) {
        sky.set_show_ruler(show);
    }
}

/// Dot-plot ranges kept in step by the stage's link.
#[derive(Clone, Default)]
pub struct DistanceViewers {
    /// Visible angular-size range, in arcseconds
    pub angular_size_range: ReactiveCell<Vec<f64>>,
    /// Visible distance range, in Mpc
    pub distance_range: ReactiveCell<Vec<f64>>,
}

/// Outcome of [`DistanceStage::on_angular_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngularSizeOutcome {
    /// Stored on the example or student measurement
    Recorded,
    /// The measuring tool is off
    NotMeasuring,
    /// No galaxy to attach the measurement to
    NoGalaxy,
    /// Outside the guard range; counted as a bad measurement
    OutsideGuard,
}

/// A mounted distance measurement stage.
pub struct DistanceStage {
    controller: StageStateController<DistanceMarker, DistanceFields>,
    measurements: MeasurementCollection,
    examples: ExampleMeasurements,
    sky: Rc<dyn SkyViewer>,
    viewers: DistanceViewers,
    measuring: Cell<bool>,
    brightness: Cell<f64>,
    link: SyncLink,
    watches: Vec<MeasurementWatch>,
}

impl DistanceStage {
    /// Load the stage for `context` and wire its rules, listeners and link.
    pub async fn mount(
        context: SessionContext,
        store: Arc<dyn StageStore>,
        config: ControllerConfig,
        measurements: MeasurementCollection,
        examples: ExampleMeasurements,
        sky: Rc<dyn SkyViewer>,
    ) -> Result<Self> {
        use DistanceMarker::*;

        let machine = StageStateMachine::new(State::new(STAGE_ID), gates()?);
        let mut controller = StageStateController::new(context, machine, store, config);

        controller.add_rule(AutoAdvanceRule::new(
            "example_galaxy_selected",
            ChoRow1,
            AngSiz2,
            |s: &State| s.fields.selected_example_galaxy.is_some(),
        ));
        controller.add_rule(AutoAdvanceRule::new(
            "first_ruler_click",
            AngSiz3,
            AngSiz4,
            |s: &State| s.fields.ruler_click_count == 1,
        ));
        controller.add_rule(AutoAdvanceRule::new(
            "first_measurement",
            AngSiz4,
            AngSiz5,
            |s: &State| s.fields.n_meas == 1,
        ));

        {
            let measurements = measurements.clone();
            let examples = examples.clone();
            let sky = Rc::clone(&sky);
            controller.on_loaded(move |machine| {
                examples.ensure_second_example();
                let student = measurements.measurements();
                let example = examples.all();
                machine.update_fields(|f| {
                    f.angular_sizes_total = count(&student, |m| m.ang_size_value.is_some());
                    f.distances_total = count(&student, |m| m.est_dist_value.is_some());
                    f.example_angular_sizes_total = count(&example, |m| m.ang_size_value.is_some());
                });
                sync_ruler(machine, sky.as_ref());
                sync_guard(machine.current_marker(), sky.as_ref());
            });
        }

        {
            let examples = examples.clone();
            controller.machine().on_leave(EstDis3, move |machine, change| {
                let theta = machine.with_fields(|f| f.meas_theta);
                if let Some(galaxy_id) = machine.with_fields(|f| f.selected_example_galaxy) {
                    let number = example_number(change.new);
                    examples.update(galaxy_id, number, |m| {
                        m.est_dist_value = distance_from_angular_size(theta);
                    });
                }
                machine.update_fields(|f| f.fill_est_dist_values = true);
            });
        }

        {
            let sky = Rc::clone(&sky);
            controller.on_marker_change(move |machine, change| {
                if resets_canvas(change.new) {
                    machine.update_fields(|f| f.reset_canvas += 1);
                    sky.reset_canvas();
                }
                machine.update_fields(|f| f.background_count += 1);
                sky.set_background();
                sync_ruler(machine, sky.as_ref());
                if uses_example(change.old) != uses_example(change.new) {
                    sync_guard(change.new, sky.as_ref());
                }
            });
        }

        controller.load().await;

        let weak = controller.machine().downgrade();
        let on_measurements = measurements.watch(move |all| {
            if let Some(machine) = weak.upgrade() {
                machine.update_fields(|f| {
                    f.angular_sizes_total = count(all, |m| m.ang_size_value.is_some());
                    f.distances_total = count(all, |m| m.est_dist_value.is_some());
                });
            }
        });
        let weak = controller.machine().downgrade();
        let on_examples = examples.watch(move |all| {
            if let Some(machine) = weak.upgrade() {
                machine.update_fields(|f| {
                    f.example_angular_sizes_total = count(all, |m| m.ang_size_value.is_some());
                });
            }
        });

        let viewers = DistanceViewers::default();
        let link = link_ranges(&viewers, controller.machine().downgrade());

        Ok(Self {
            controller,
            measurements,
            examples,
            sky,
            viewers,
            measuring: Cell::new(false),
            brightness: Cell::new(1.0),
            link,
            watches: vec![on_measurements, on_examples],
        })
    }

    /// Detach listeners and the link, then flush the pending write.
    pub async fn unmount(self) -> Result<()> {
        let Self {
            controller,
            link,
            watches,
            ..
        } = self;
        drop(link);
        drop(watches);
        controller.unmount().await?;
        Ok(())
    }

    /// The stage's state machine.
    pub fn machine(&self) -> &Machine {
        self.controller.machine()
    }

    /// The persistence controller.
    pub fn controller(&self) -> &StageStateController<DistanceMarker, DistanceFields> {
        &self.controller
    }

    /// Current state snapshot.
    pub fn state(&self) -> State {
        self.machine().state()
    }

    /// Linked dot-plot ranges.
    pub fn viewers(&self) -> &DistanceViewers {
        &self.viewers
    }

    /// The angular size ⇄ distance link.
    pub fn link(&self) -> &SyncLink {
        &self.link
    }

    /// Whether the measuring tool is on.
    pub fn is_measuring(&self) -> bool {
        self.measuring.get()
    }

    // ---- sky viewer ----

    fn show_galaxy(&self, galaxy: &Galaxy) {
        self.sky.set_background();
        self.set_measuring(false);
        self.sky.go_to_location(galaxy.ra, galaxy.decl, GALAXY_FOV);
    }

    fn set_measuring(&self, measuring: bool) {
        self.measuring.set(measuring);
        self.sky.set_measuring(measuring);
    }

    /// Choose the example galaxy and centre the viewer on it.
    pub fn select_example_galaxy(&self, galaxy: &Galaxy) {
        debug!(galaxy = galaxy.id, "Selecting example galaxy");
        self.machine()
            .update_fields(|f| f.selected_example_galaxy = Some(galaxy.id));
        self.show_galaxy(galaxy);
    }

    /// Choose one of the student's galaxies and centre the viewer on it.
    pub fn select_galaxy(&self, galaxy: &Galaxy) {
        debug!(galaxy = galaxy.id, "Selecting galaxy");
        self.machine()
            .update_fields(|f| f.selected_galaxy = Some(galaxy.id));
        self.show_galaxy(galaxy);
    }

    /// Switch the measuring tool on.
    pub fn start_measuring(&self) {
        self.set_measuring(true);
    }

    /// The viewer reported it is ready.
    pub fn on_viewer_ready(&self) {
        self.machine().update_fields(|f| f.wwt_ready = true);
    }

    /// The viewer reported its ruler click count.
    pub fn on_ruler_click(&self, count: u32) {
        self.machine().update_fields(|f| f.ruler_click_count = count);
    }

    /// The viewer reported its brightness, in percent.
    pub fn on_brightness(&self, percent: f64) {
        self.brightness.set(percent / 100.0);
    }

    /// The viewer rejected a measurement.
    pub fn on_bad_measurement(&self) {
        info!("Bad angular size measurement");
        self.machine().update_fields(|f| {
            f.bad_measurement = true;
            f.bad_measurement_count += 1;
        });
    }

    /// The viewer measured an angular size, in arcseconds.
    ///
    /// Angles outside [`guard_range`] are rejected as bad measurements.
    /// Up to `dot_seq5c` it goes to the example galaxy (its second
    /// measurement from `dot_seq5` on); after that to the selected student
    /// galaxy. The distance is filled in too once the stage has taught it,
    /// or when the measurement already had one.
    pub fn on_angular_size(&self, arcsec: f64) -> AngularSizeOutcome {
        if !self.measuring.get() {
            return AngularSizeOutcome::NotMeasuring;
        }
        let marker = self.machine().current_marker();
        let (min, max) = guard_range(marker);
        if !(min..=max).contains(&arcsec) {
            debug!(arcsec, min, max, "Angular size outside the guard range");
            self.on_bad_measurement();
            return AngularSizeOutcome::OutsideGuard;
        }
        let theta = arcsec.trunc();
        let brightness = self.brightness.get();
        let auto_fill = self.auto_fills_distance();
        let measure = |m: &mut Measurement| {
            let refill = auto_fill || m.est_dist_value.is_some();
            m.ang_size_value = Some(theta);
            m.brightness = Some(brightness);
            if refill {
                m.est_dist_value = distance_from_angular_size(theta);
            }
        };

        let recorded = if uses_example(marker) {
            let galaxy = self.machine().with_fields(|f| f.selected_example_galaxy);
            let recorded = galaxy.is_some_and(|id| {
                self.examples
                    .update(id, example_number(marker), measure)
                    .found()
            });
            if recorded {
                self.machine().update_fields(|f| {
                    f.meas_theta = theta;
                    f.n_meas += 1;
                });
            }
            recorded
        } else {
            let galaxy = self.machine().with_fields(|f| f.selected_galaxy);
            galaxy.is_some_and(|id| self.measurements.update(id, measure).found())
        };

        if !recorded {
            warn!(marker = %marker, "Angular size measured with no galaxy to attach it to");
            return AngularSizeOutcome::NoGalaxy;
        }
        self.machine().update_fields(|f| f.bad_measurement = false);
        AngularSizeOutcome::Recorded
    }

    fn auto_fills_distance(&self) -> bool {
        use DistanceMarker::*;
        let machine = self.machine();
        machine.between(EstDis4, DotSeq5c)
            || machine.at_or_after(FilRem1)
            || machine.with_fields(|f| f.galaxy_distances_filled)
    }

    /// Estimate distances for every student galaxy with an angular size.
    ///
    /// Returns how many galaxies have one.
    pub fn fill_galaxy_distances(&self) -> usize {
        self.measurements.update_all(|m| {
            if let Some(theta) = m.ang_size_value {
                m.est_dist_value = distance_from_angular_size(theta);
            }
        });
        let missing = self.measurements.count_where(|m| m.ang_size_value.is_none());
        if missing > 0 {
            warn!(missing, "Some galaxies have no angular size");
        }
        self.machine().update_fields(|f| f.galaxy_distances_filled = true);
        let filled = self.measurements.count_where(|m| m.est_dist_value.is_some());
        info!(filled, "Filled galaxy distances");
        filled
    }
}

fn link_ranges(
    viewers: &DistanceViewers,
    machine: WeakStageStateMachine<DistanceMarker, DistanceFields>,
) -> SyncLink {
    let active = move || {
        machine
            .upgrade()
            .is_some_and(|m| m.between(DistanceMarker::DotSeq1, DistanceMarker::DotSeq5c))
    };
    let inverse_active = active.clone();
    link(
        &viewers.angular_size_range,
        &viewers.distance_range,
        move |angles: &Vec<f64>| active().then(|| reciprocal_range(angles)),
        move |distances: &Vec<f64>| inverse_active().then(|| reciprocal_range(distances)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill::{
        catalogue, example_galaxy, fill_galaxies, fill_wave_vel_ang, EXAMPLE_GALAXY_ID,
    };
    use crate::sky::{RecordingSkyViewer, SkyCommand};
    use datastory_storage::MemoryStageStore;

    use DistanceMarker::*;

    struct Harness {
        stage: DistanceStage,
        sky: Rc<RecordingSkyViewer>,
    }

    async fn mount(store: Arc<MemoryStageStore>, measurements: MeasurementCollection) -> Harness {
        let sky = Rc::new(RecordingSkyViewer::new());
        let stage = DistanceStage::mount(
            SessionContext::new(7, "hubbles_law"),
            store,
            ControllerConfig::default(),
            measurements,
            ExampleMeasurements::for_galaxy(7, example_galaxy()),
            sky.clone(),
        )
        .await
        .unwrap();
        Harness { stage, sky }
    }

    async fn harness() -> Harness {
        mount(Arc::new(MemoryStageStore::new()), MeasurementCollection::new()).await
    }

    fn example(stage: &DistanceStage, number: MeasurementNumber) -> Measurement {
        stage.examples.get(EXAMPLE_GALAXY_ID, number).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_example_measurement_walkthrough() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.advance().unwrap();
        assert!(machine.advance().is_err());

        h.sky.take();
        h.stage.select_example_galaxy(&example_galaxy());
        assert_eq!(machine.current_marker(), AngSiz2);
        let galaxy = example_galaxy();
        assert!(h.sky.commands().contains(&SkyCommand::GoTo {
            ra: galaxy.ra,
            dec: galaxy.decl,
            fov: GALAXY_FOV,
        }));
        assert!(h.sky.commands().contains(&SkyCommand::Measuring(false)));

        machine.jump(AngSiz3, false).unwrap();
        assert!(h.stage.state().fields.show_ruler);

        h.stage.on_ruler_click(1);
        assert_eq!(machine.current_marker(), AngSiz4);

        assert_eq!(h.stage.on_angular_size(61.9), AngularSizeOutcome::NotMeasuring);
        h.stage.start_measuring();
        assert_eq!(h.stage.on_angular_size(61.9), AngularSizeOutcome::Recorded);
        assert_eq!(machine.current_marker(), AngSiz5);

        let first = example(&h.stage, MeasurementNumber::First);
        assert_eq!(first.ang_size_value, Some(61.0));
        assert_eq!(first.est_dist_value, None);
        assert_eq!(h.stage.state().fields.meas_theta, 61.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_estimate_fills_example_distance() {
        let h = harness().await;
        let machine = h.stage.machine();
        h.stage.select_example_galaxy(&example_galaxy());
        h.stage.start_measuring();
        machine.jump(AngSiz5, true).unwrap();
        h.stage.on_angular_size(61.0);

        machine.jump(EstDis3, false).unwrap();
        assert!(machine.jump(DotSeq1, false).is_err());
        machine.advance().unwrap();

        assert!(h.stage.state().fields.fill_est_dist_values);
        assert_eq!(example(&h.stage, MeasurementNumber::First).est_dist_value, Some(101.0));
        machine.advance().unwrap();
        assert_eq!(machine.current_marker(), DotSeq1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_canvas_and_background_counters() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.jump(DotSeq1, true).unwrap();
        machine.advance().unwrap();
        machine.jump(DotSeq5, true).unwrap();
        machine.jump(DotSeq5a, true).unwrap();

        let fields = h.stage.state().fields;
        assert_eq!(fields.reset_canvas, 3);
        assert_eq!(fields.background_count, 4);
        assert_eq!(
            h.sky.commands().iter().filter(|c| **c == SkyCommand::ResetCanvas).count(),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ruler_follows_marker_ranges() {
        let h = harness().await;
        let machine = h.stage.machine();
        assert!(!h.stage.state().fields.show_ruler);
        for marker in [AngSiz3, EstDis4, DotSeq5, EndSta3] {
            machine.jump(marker, true).unwrap();
            assert!(h.stage.state().fields.show_ruler, "{}", marker);
        }
        for marker in [DotSeq1, AngSiz2] {
            machine.jump(marker, true).unwrap();
            assert!(!h.stage.state().fields.show_ruler, "{}", marker);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ranges_linked_only_on_dot_plot_markers() {
        let h = harness().await;
        let viewers = h.stage.viewers();

        viewers.angular_size_range.set(vec![10.0, 20.0]);
        assert!(viewers.distance_range.get().is_empty());
        assert_eq!(h.stage.link().stats().skipped, 1);

        h.stage.machine().jump(DotSeq1, true).unwrap();
        viewers.angular_size_range.set(vec![20.0, 40.0]);
        assert_eq!(viewers.distance_range.get(), vec![154.75, 309.5]);
        assert_eq!(h.stage.link().stats().hops(), 1);
        assert_eq!(h.stage.link().stats().suppressed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_example_measurement_autofills() {
        let h = harness().await;
        let machine = h.stage.machine();
        h.stage.select_example_galaxy(&example_galaxy());
        machine.jump(DotSeq5, true).unwrap();
        h.stage.start_measuring();

        assert!(machine.advance().is_err());
        h.stage.on_angular_size(30.0);
        let second = example(&h.stage, MeasurementNumber::Second);
        assert_eq!(second.ang_size_value, Some(30.0));
        assert_eq!(second.est_dist_value, Some(206.0));
        assert!(example(&h.stage, MeasurementNumber::First).ang_size_value.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_measurement_is_counted() {
        let h = harness().await;
        h.stage.on_bad_measurement();
        h.stage.on_bad_measurement();
        let fields = h.stage.state().fields;
        assert!(fields.bad_measurement);
        assert_eq!(fields.bad_measurement_count, 2);
        assert_eq!(fields.n_meas, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_example_measurement_counts_every_time() {
        let h = harness().await;
        h.stage.select_example_galaxy(&example_galaxy());
        h.stage.start_measuring();

        assert_eq!(h.stage.on_angular_size(61.0), AngularSizeOutcome::Recorded);
        assert_eq!(h.stage.on_angular_size(61.0), AngularSizeOutcome::Recorded);
        assert_eq!(h.stage.state().fields.n_meas, 2);
        assert_eq!(h.stage.state().fields.meas_theta, 61.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_range_rejects_implausible_angles() {
        let h = harness().await;
        assert!(h.sky.commands().contains(&SkyCommand::Guard { min: 6.0, max: 360.0 }));
        h.stage.select_example_galaxy(&example_galaxy());
        h.stage.start_measuring();

        assert_eq!(h.stage.on_angular_size(5.0), AngularSizeOutcome::OutsideGuard);
        assert_eq!(h.stage.on_angular_size(400.0), AngularSizeOutcome::OutsideGuard);
        let fields = h.stage.state().fields;
        assert!(fields.bad_measurement);
        assert_eq!(fields.bad_measurement_count, 2);
        assert_eq!(fields.n_meas, 0);

        assert_eq!(h.stage.on_angular_size(360.0), AngularSizeOutcome::Recorded);
        assert!(!h.stage.state().fields.bad_measurement);

        h.sky.take();
        h.stage.machine().jump(RepRem1, true).unwrap();
        assert!(h.sky.commands().contains(&SkyCommand::Guard { min: 6.0, max: 3600.0 }));
        assert_eq!(guard_range(RepRem1), GUARD_RANGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stepping_back_replays_canvas_resets_and_estimate() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.jump(DotSeq4a, true).unwrap();
        let resets = h.stage.state().fields.reset_canvas;

        machine.jump(DotSeq1, false).unwrap();
        assert!(machine.is_current(DotSeq1));
        assert_eq!(h.stage.state().fields.reset_canvas, resets + 4);

        machine.update_fields(|f| f.fill_est_dist_values = false);
        machine.jump(EstDis2, false).unwrap();
        assert!(h.stage.state().fields.fill_est_dist_values);
    }

    #[tokio::test(start_paused = true)]
    async fn test_student_galaxies_and_fill_distances() {
        let measurements = MeasurementCollection::new();
        fill_galaxies(&measurements, 7);
        let h = mount(Arc::new(MemoryStageStore::new()), measurements).await;
        let machine = h.stage.machine();
        machine.jump(RepRem1, true).unwrap();

        let galaxy = catalogue()[0].clone();
        h.stage.select_galaxy(&galaxy);
        assert_eq!(h.stage.on_angular_size(48.0), AngularSizeOutcome::NotMeasuring);
        h.stage.start_measuring();
        h.stage.on_brightness(50.0);
        assert_eq!(h.stage.on_angular_size(48.0), AngularSizeOutcome::Recorded);

        let measured = h.stage.measurements.get_measurement(galaxy.id).unwrap();
        assert_eq!(measured.ang_size_value, Some(48.0));
        assert_eq!(measured.brightness, Some(0.5));
        assert_eq!(measured.est_dist_value, None);
        assert_eq!(h.stage.state().fields.angular_sizes_total, 1);

        assert_eq!(h.stage.fill_galaxy_distances(), 1);
        assert_eq!(h.stage.state().fields.distances_total, 1);
        assert!(machine.advance().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_recounts_totals() {
        let measurements = MeasurementCollection::new();
        fill_wave_vel_ang(&measurements, 7);
        let h = mount(Arc::new(MemoryStageStore::new()), measurements).await;

        let fields = h.stage.state().fields;
        assert_eq!(fields.angular_sizes_total, MAX_GALAXIES);
        assert_eq!(fields.distances_total, 0);
        assert_eq!(h.stage.examples.all().len(), 2);
    }
}
