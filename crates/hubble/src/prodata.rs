//! Professional data stage.
//!
//! The class's velocity/distance points are shown next to Hubble's 1929
//! data and the HST Key Project data. On load the class's Hubble constant
//! is fitted and turned into an age of the universe.

use std::sync::Arc;

use datastory_core::{
    Measurement, MeasurementSource, MultipleChoiceResponse, SessionContext, StageState,
};
use datastory_progress::{GateError, GateTable, StageStateMachine};
use datastory_reactive::ReactiveCell;
use datastory_storage::StageStore;
use datastory_work::{ControllerConfig, StageStateController};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::measurements::MeasurementCollection;

/// Persistence key suffix of this stage.
pub const STAGE_ID: &str = "professional_data";

/// Converts a Hubble constant in km/s/Mpc to an age in Gyr.
pub const AGE_CONSTANT: f64 = 977.8;

/// Age of the universe from the HST Key Project fit, in Gyr.
pub const HST_KEY_AGE: f64 = 13.58;

/// Reflection prompts answered at `pro_dat8`.
pub const REFLECTIONS: [&str; 3] = [
    "prodata-reflect-8a",
    "prodata-reflect-8b",
    "prodata-reflect-8c",
];

datastory_core::markers! {
    /// Checkpoints of the professional data stage.
    pub enum ProDataMarker {
        ProDat0 = "pro_dat0",
        ProDat1 = "pro_dat1",
        ProDat2 = "pro_dat2",
        ProDat3 = "pro_dat3",
        ProDat4 = "pro_dat4",
        ProDat5 = "pro_dat5",
        ProDat6 = "pro_dat6",
        ProDat7 = "pro_dat7",
        ProDat8 = "pro_dat8",
        ProDat9 = "pro_dat9",
        StoFin1 = "sto_fin1",
        StoFin2 = "sto_fin2",
        StoFin3 = "sto_fin3",
    }
}

/// Stage-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProDataFields {
    /// Age from the class fit, in Gyr
    pub class_age: Option<f64>,
    /// Whether the fit line is drawn on the plot
    pub fit_line_shown: bool,
}

type State = StageState<ProDataMarker, ProDataFields>;

/// Gates of the stage.
pub fn gates() -> std::result::Result<GateTable<ProDataMarker, ProDataFields>, GateError> {
    use ProDataMarker::*;

    GateTable::new()
        .with_gate(ProDat1, ProDat2, "pro-dat1", |s: &State| s.question_completed("pro-dat1"))?
        .with_gate(ProDat2, ProDat3, "pro-dat2", |s: &State| s.question_completed("pro-dat2"))?
        .with_gate(ProDat4, ProDat5, "pro-dat4", |s: &State| {
            s.question_completed("pro-dat4") && s.question_completed("prodata-free-4")
        })?
        .with_gate(ProDat6, ProDat7, "pro-dat6", |s: &State| s.question_completed("pro-dat6"))?
        .with_gate(ProDat7, ProDat8, "pro-dat7", |s: &State| {
            s.question_completed("pro-dat7") && s.question_completed("prodata-free-7")
        })?
        .with_gate(ProDat8, ProDat9, "reflections_answered", |s: &State| {
            REFLECTIONS.iter().all(|tag| s.question_completed(tag))
        })?
        .with_gate(ProDat9, StoFin1, "pro-dat9", |s: &State| s.question_completed("pro-dat9"))
}

/// Slope of the line through the origin that best fits `points`.
///
/// `None` without any point off the origin.
pub fn slope_through_origin(points: &[(f64, f64)]) -> Option<f64> {
    let (xy, xx) = points
        .iter()
        .fold((0.0, 0.0), |(xy, xx), (x, y)| (xy + x * y, xx + x * x));
    (xx > 0.0).then(|| xy / xx)
}

/// Age of the universe implied by the class's measurements, in Gyr.
///
/// Only rows with a non-zero velocity and distance count.
pub fn class_age(measurements: &[Measurement]) -> Option<f64> {
    let points: Vec<(f64, f64)> = measurements
        .iter()
        .filter_map(|m| match (m.est_dist_value, m.velocity_value) {
            (Some(d), Some(v)) if d != 0.0 && v != 0.0 => Some((d, v)),
            _ => None,
        })
        .collect();
    let slope = slope_through_origin(&points)?;
    if slope == 0.0 {
        return None;
    }
    Some(round_to(AGE_CONSTANT / slope, 8))
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Which data sets the fit plot shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layers {
    /// The class's own measurements
    pub class_data: bool,
    /// Hubble's 1929 data
    pub hubble_1929: bool,
    /// HST Key Project 2001 data
    pub hst_key: bool,
}

impl Layers {
    /// Layers on screen at `marker`.
    ///
    /// Hubble's data comes first, is swapped for the HST data from
    /// `pro_dat5`, and both return alongside the class from `pro_dat8`.
    pub fn for_marker(marker: ProDataMarker) -> Self {
        use ProDataMarker::*;
        Self {
            class_data: true,
            hubble_1929: (ProDat1..=ProDat4).contains(&marker) || marker >= ProDat8,
            hst_key: marker >= ProDat5,
        }
    }
}

/// Whether the fit legend is shown at `marker`.
pub fn shows_legend(marker: ProDataMarker) -> bool {
    marker >= ProDataMarker::ProDat8
}

/// Reactive plot settings driven by the marker.
#[derive(Clone)]
pub struct ProDataViewers {
    /// Visible data sets
    pub layers: ReactiveCell<Layers>,
    /// Fit legend shown
    pub legend: ReactiveCell<bool>,
}

impl Default for ProDataViewers {
    fn default() -> Self {
        Self {
            layers: ReactiveCell::new(Layers::for_marker(ProDataMarker::ProDat0)),
            legend: ReactiveCell::new(false),
        }
    }
}

impl ProDataViewers {
    fn show(&self, marker: ProDataMarker) {
        self.layers.set(Layers::for_marker(marker));
        self.legend.set(shows_legend(marker));
    }
}

/// A mounted professional data stage.
pub struct ProDataStage {
    controller: StageStateController<ProDataMarker, ProDataFields>,
    viewers: ProDataViewers,
}

impl ProDataStage {
    /// Load the stage and fit the class data.
    pub async fn mount(
        context: SessionContext,
        store: Arc<dyn StageStore>,
        config: ControllerConfig,
        class: MeasurementCollection,
    ) -> Result<Self> {
        let machine = StageStateMachine::new(State::new(STAGE_ID), gates()?);
        let mut controller = StageStateController::new(context, machine, store, config);
        let viewers = ProDataViewers::default();

        controller.on_loaded(move |machine| {
            let age = class_age(&class.measurements());
            match age {
                Some(age) => info!(age, rows = class.len(), "Fitted class age"),
                None => debug!(rows = class.len(), "No class data to fit"),
            }
            machine.update_fields(|f| {
                if age.is_some() {
                    f.class_age = age;
                }
                f.fit_line_shown = true;
            });
        });

        {
            let viewers = viewers.clone();
            controller.on_loaded(move |machine| viewers.show(machine.current_marker()));
        }
        {
            let viewers = viewers.clone();
            controller.on_marker_change(move |_, change| viewers.show(change.new));
        }

        controller.load().await;
        Ok(Self {
            controller,
            viewers,
        })
    }

    /// Flush the pending write.
    pub async fn unmount(self) -> Result<()> {
        self.controller.unmount().await?;
        Ok(())
    }

    /// The stage's state machine.
    pub fn machine(&self) -> &StageStateMachine<ProDataMarker, ProDataFields> {
        self.controller.machine()
    }

    /// Current state snapshot.
    pub fn state(&self) -> State {
        self.machine().state()
    }

    /// Plot settings.
    pub fn viewers(&self) -> &ProDataViewers {
        &self.viewers
    }

    /// Age from the class fit, in Gyr.
    pub fn class_age(&self) -> Option<f64> {
        self.machine().with_fields(|f| f.class_age)
    }

    /// How far the class age is from the HST Key Project age, in Gyr.
    pub fn age_gap(&self) -> Option<f64> {
        self.class_age().map(|age| age - HST_KEY_AGE)
    }

    /// Draw or hide the fit line.
    pub fn show_fit_line(&self, show: bool) {
        self.machine().update_fields(|f| f.fit_line_shown = show);
    }

    /// Record a multiple-choice attempt.
    pub fn answer(
        &self,
        tag: &str,
        choice: usize,
        correct: bool,
        score: u32,
    ) -> MultipleChoiceResponse {
        self.machine().record_multiple_choice(tag, choice, correct, score)
    }

    /// Record a free-text answer.
    pub fn respond(&self, tag: &str, response: impl Into<String>) {
        self.machine().record_free_response(tag, response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill::{catalogue, fill_all_measurements};
    use datastory_storage::MemoryStageStore;

    use ProDataMarker::*;

    fn point(galaxy: usize, distance: f64, velocity: f64) -> Measurement {
        let mut m = Measurement::new(7, catalogue()[galaxy].clone());
        m.est_dist_value = Some(distance);
        m.velocity_value = Some(velocity);
        m
    }

    async fn mount(store: Arc<MemoryStageStore>, class: MeasurementCollection) -> ProDataStage {
        ProDataStage::mount(
            SessionContext::new(7, "hubbles_law"),
            store,
            ControllerConfig::default(),
            class,
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_slope_through_origin() {
        assert_eq!(slope_through_origin(&[(1.0, 2.0), (2.0, 4.0)]), Some(2.0));
        assert_eq!(slope_through_origin(&[(1.0, 1.0), (1.0, 3.0)]), Some(2.0));
        assert_eq!(slope_through_origin(&[]), None);
        assert_eq!(slope_through_origin(&[(0.0, 5.0)]), None);
    }

    #[test]
    fn test_class_age_skips_incomplete_rows() {
        let mut missing = point(2, 10.0, 1.0);
        missing.velocity_value = None;
        let class = vec![
            point(0, 100.0, 7000.0),
            point(1, 50.0, 3500.0),
            missing,
            point(3, 0.0, 9000.0),
        ];
        assert_eq!(class_age(&class), Some(round_to(AGE_CONSTANT / 70.0, 8)));
        assert_eq!(class_age(&[]), None);
    }

    #[test]
    fn test_layers_follow_marker() {
        let only_class = Layers {
            class_data: true,
            ..Default::default()
        };
        assert_eq!(Layers::for_marker(ProDat0), only_class);
        assert!(Layers::for_marker(ProDat3).hubble_1929);
        assert!(!Layers::for_marker(ProDat3).hst_key);

        let hst = Layers::for_marker(ProDat6);
        assert!(!hst.hubble_1929);
        assert!(hst.hst_key);

        let all = Layers::for_marker(StoFin2);
        assert!(all.class_data && all.hubble_1929 && all.hst_key);
        assert!(!shows_legend(ProDat7));
        assert!(shows_legend(ProDat8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_fits_class_age_and_shows_fit() {
        let class = MeasurementCollection::new();
        fill_all_measurements(&class, 7);
        let expected = class_age(&class.measurements());
        assert!(expected.is_some());

        let stage = mount(Arc::new(MemoryStageStore::new()), class).await;
        assert_eq!(stage.class_age(), expected);
        assert!(stage.state().fields.fit_line_shown);
        assert_eq!(stage.viewers().layers.get(), Layers::for_marker(ProDat0));
        assert_eq!(stage.age_gap(), expected.map(|age| age - HST_KEY_AGE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_class_keeps_stored_age() {
        let store = Arc::new(MemoryStageStore::new());
        let context = SessionContext::new(7, "hubbles_law");
        let mut stored = State::new(STAGE_ID);
        stored.move_to(ProDat6);
        stored.fields.class_age = Some(12.5);
        let doc = serde_json::to_value(&stored).unwrap();
        store
            .put_stage_state(&context.stage_key(STAGE_ID), &doc)
            .await
            .unwrap();

        let stage = mount(store, MeasurementCollection::new()).await;
        assert_eq!(stage.class_age(), Some(12.5));
        assert_eq!(stage.viewers().layers.get(), Layers::for_marker(ProDat6));
        assert!(!stage.viewers().legend.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_markers_drive_layers_and_legend() {
        let stage = mount(Arc::new(MemoryStageStore::new()), MeasurementCollection::new()).await;
        let machine = stage.machine();

        machine.advance().unwrap();
        assert!(stage.viewers().layers.get().hubble_1929);

        machine.jump(ProDat5, true).unwrap();
        let layers = stage.viewers().layers.get();
        assert!(!layers.hubble_1929);
        assert!(layers.hst_key);

        machine.jump(ProDat8, true).unwrap();
        assert!(stage.viewers().legend.get());
        machine.retreat().unwrap();
        assert!(!stage.viewers().legend.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_questions_gate_the_walkthrough() {
        let stage = mount(Arc::new(MemoryStageStore::new()), MeasurementCollection::new()).await;
        let machine = stage.machine();
        machine.advance().unwrap();
        assert!(machine.advance().is_err());
        assert_eq!(machine.blocking_gate().as_deref(), Some("pro-dat1"));

        stage.answer("pro-dat1", 0, true, 10);
        stage.answer("pro-dat2", 1, true, 10);
        assert_eq!(machine.advance().unwrap(), ProDat2);
        assert_eq!(machine.advance().unwrap(), ProDat3);
        assert_eq!(machine.advance().unwrap(), ProDat4);

        stage.answer("pro-dat4", 2, true, 10);
        assert!(machine.advance().is_err());
        stage.respond("prodata-free-4", "They agree within the scatter.");
        assert_eq!(machine.advance().unwrap(), ProDat5);

        machine.jump(ProDat8, true).unwrap();
        stage.respond(REFLECTIONS[0], "a");
        stage.respond(REFLECTIONS[1], "b");
        stage.respond(REFLECTIONS[2], "  ");
        assert!(machine.advance().is_err());
        stage.respond(REFLECTIONS[2], "c");
        assert_eq!(machine.advance().unwrap(), ProDat9);
    }
}
