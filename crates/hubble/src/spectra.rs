//! Spectra & velocity stage.
//!
//! Students pick five galaxies, measure the example galaxy's spectrum,
//! learn the Doppler calculation, compare their velocity on a dot plot,
//! then measure and compute velocities for their own galaxies.
//!
//! Galaxy selection is one sitting: once a galaxy is in the collection the
//! back button returns to `sel_gal1` instead of stepping through the
//! selection prompts again.

use std::rc::Rc;
use std::sync::Arc;

use datastory_core::{
    Galaxy, GalaxyId, Measurement, MeasurementNumber, MeasurementSource, MultipleChoiceResponse,
    SessionContext, SlideshowState, StageState,
};
use datastory_progress::{GateError, GateTable, StageStateMachine};
use datastory_reactive::{link, ReactiveCell, SyncLink};
use datastory_storage::StageStore;
use datastory_work::{AutoAdvanceRule, ControllerConfig, StageStateController};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::measurements::{
    ExampleMeasurements, MeasurementCollection, MeasurementWatch, MAX_GALAXIES,
};
use crate::physics::{
    is_wavelength_poorly_measured, v2w, velocity_from_wavelengths, velocity_range_to_wavelength,
    w2v, wavelength_range_to_velocity, H_ALPHA_REST_LAMBDA, SPEED_OF_LIGHT, WAVELENGTH_TOLERANCE,
};
use crate::sky::{SkyViewer, GALAXY_FOV};

/// Persistence key suffix of this stage.
pub const STAGE_ID: &str = "spectra_velocity";

/// Multiple-choice question asked after the first velocity calculation.
pub const INTERPRET_VELOCITY: &str = "interpret-velocity";

/// Question on whether the class agrees on the example velocity.
pub const VEL_MEAS_CONSENSUS: &str = "vel_meas_consensus";

/// Closing reflection on the velocity values.
pub const REFLECT_VEL_VALUE: &str = "reflect_vel_value";

/// Shown when a student tries to add a sixth galaxy.
pub const GALAXIES_FULL_MESSAGE: &str = "You've already selected 5 galaxies. Continue forth!";

/// Slides in the Doppler calculation dialog.
pub const DOPPLER_SLIDES: usize = 6;

datastory_core::markers! {
    /// Checkpoints of the spectra & velocity stage.
    pub enum SpectraMarker {
        MeeGui1 = "mee_gui1",
        SelGal1 = "sel_gal1",
        SelGal2 = "sel_gal2",
        NotGal1 = "not_gal1",
        SelGal3 = "sel_gal3",
        SelGal4 = "sel_gal4",
        ChoRow1 = "cho_row1",
        MeeSpe1 = "mee_spe1",
        ResWav1 = "res_wav1",
        ObsWav1 = "obs_wav1",
        ObsWav2 = "obs_wav2",
        DopCal0 = "dop_cal0",
        DopCal2 = "dop_cal2",
        DopCal4 = "dop_cal4",
        DopCal5 = "dop_cal5",
        CheMea1 = "che_mea1",
        IntDot1 = "int_dot1",
        DotSeq1 = "dot_seq1",
        DotSeq2 = "dot_seq2",
        DotSeq3 = "dot_seq3",
        DotSeq4 = "dot_seq4",
        DotSeq4a = "dot_seq4a",
        DotSeq5 = "dot_seq5",
        DotSeq6 = "dot_seq6",
        DotSeq7 = "dot_seq7",
        DotSeq8 = "dot_seq8",
        DotSeq10 = "dot_seq10",
        DotSeq11 = "dot_seq11",
        RemVel1 = "rem_vel1",
        RefDat1 = "ref_dat1",
        RemGal1 = "rem_gal1",
        DopCal6 = "dop_cal6",
        RefVel1 = "ref_vel1",
        EndSta1 = "end_sta1",
    }
}

/// Stage-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectraFields {
    /// Galaxies in the student's collection
    pub total_galaxies: usize,
    /// Galaxy highlighted in the student's table
    pub selected_galaxy: Option<GalaxyId>,
    /// Whether a galaxy is highlighted
    pub galaxy_is_selected: bool,
    /// Example galaxy chosen from the example table
    pub selected_example_galaxy: Option<GalaxyId>,
    /// Last accepted observed wavelength
    pub obs_wave: f64,
    /// Student galaxies with an observed wavelength
    pub obs_wave_total: usize,
    /// Student galaxies with a velocity
    pub velocities_total: usize,
    /// Clicks on the velocity dot plot
    pub dotplot_click_count: u32,
    /// Whether the last wavelength was rejected
    pub has_bad_velocities: bool,
    /// Whether more than one stored wavelength looks wrong
    pub has_multiple_bad_velocities: bool,
    /// Whether the example wavelength was marked on the spectrum
    pub obs_wave_tool_used: bool,
    /// Rest-wavelength tool switched on
    pub rest_wave_tool_activated: bool,
    /// Spectrum zoom used
    pub zoom_tool_activated: bool,
    /// Dot-plot tutorial closed
    pub dotplot_tutorial_finished: bool,
    /// Velocity reflection dialog completed
    pub reflection_complete: bool,
    /// Whether the Doppler inputs were validated and shown
    pub show_dop_cal4_values: bool,
    /// Whether the last Doppler validation failed
    pub validation_4_failed: bool,
    /// First example measurement has a wavelength
    pub example_wavelength_measured: bool,
    /// First example measurement has a velocity
    pub example_velocity_measured: bool,
    /// Second example measurement has a wavelength
    pub second_example_measured: bool,
    /// Times the selection viewer background was applied
    pub background_count: u32,
    /// Doppler calculation dialog open
    pub show_doppler_dialog: bool,
    /// Doppler calculation dialog progress
    pub doppler: DopplerState,
}

/// Progress through the Doppler calculation dialog shown at `dop_cal5`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DopplerState {
    /// Slide position; `max_step_completed` never goes back
    pub slides: SlideshowState,
    /// Whether the last speed-of-light entry was wrong
    pub validation_5_failed: bool,
    /// Speed of light the student entered, in km/s
    pub student_c: Option<f64>,
    /// Whether the student computed the example velocity
    pub velocity_calculated: bool,
}

type State = StageState<SpectraMarker, SpectraFields>;

/// Gates of the stage.
pub fn gates() -> std::result::Result<GateTable<SpectraMarker, SpectraFields>, GateError> {
    use SpectraMarker::*;

    GateTable::new()
        .with_gate(SelGal2, NotGal1, "first_galaxy_selected", |s: &State| {
            s.fields.total_galaxies >= 1
        })?
        .with_gate(SelGal3, SelGal4, "all_galaxies_selected", |s: &State| {
            s.fields.total_galaxies >= MAX_GALAXIES
        })?
        .with_gate(ChoRow1, MeeSpe1, "example_galaxy_selected", |s: &State| {
            s.fields.selected_example_galaxy.is_some()
        })?
        .with_gate(ResWav1, ObsWav1, "rest_wave_tool_activated", |s: &State| {
            s.fields.rest_wave_tool_activated
        })?
        .with_gate(ObsWav1, ObsWav2, "obs_wave_tool_used", |s: &State| {
            s.fields.obs_wave_tool_used
        })?
        .with_gate(DopCal4, DopCal5, "doppler_inputs_validated", |s: &State| {
            s.fields.show_dop_cal4_values && !s.fields.validation_4_failed
        })?
        .with_gate(DopCal5, CheMea1, "example_velocity_interpreted", |s: &State| {
            s.fields.example_velocity_measured && s.question_completed(INTERPRET_VELOCITY)
        })?
        .with_gate(IntDot1, DotSeq1, "dotplot_tutorial_finished", |s: &State| {
            s.fields.dotplot_tutorial_finished
        })?
        .with_gate(DotSeq5, DotSeq6, "dotplot_clicked", |s: &State| {
            s.fields.dotplot_click_count > 0
        })?
        .with_gate(DotSeq8, DotSeq10, "velocity_consensus_answered", |s: &State| {
            s.question_completed(VEL_MEAS_CONSENSUS)
        })?
        .with_gate(RemVel1, RefDat1, "second_example_measured", |s: &State| {
            s.fields.second_example_measured
        })?
        .with_gate(RefDat1, RemGal1, "reflection_complete", |s: &State| {
            s.fields.reflection_complete
        })?
        .with_gate(RemGal1, DopCal6, "all_wavelengths_measured", |s: &State| {
            s.fields.obs_wave_total >= MAX_GALAXIES
        })?
        .with_gate(DopCal6, RefVel1, "all_velocities_calculated", |s: &State| {
            s.fields.velocities_total >= MAX_GALAXIES
        })?
        .with_gate(RefVel1, EndSta1, "velocity_reflection_answered", |s: &State| {
            s.question_completed(REFLECT_VEL_VALUE)
        })
}

fn is_bad_wavelength(m: &Measurement) -> bool {
    match (m.obs_wave_value, m.rest_wave_value) {
        (Some(obs), Some(rest)) => {
            is_wavelength_poorly_measured(obs, rest, m.galaxy.z, WAVELENGTH_TOLERANCE)
        }
        _ => false,
    }
}

fn tally(fields: &mut SpectraFields, measurements: &[Measurement]) {
    fields.total_galaxies = measurements.len();
    fields.obs_wave_total = measurements.iter().filter(|m| m.obs_wave_value.is_some()).count();
    fields.velocities_total = measurements.iter().filter(|m| m.velocity_value.is_some()).count();
    fields.has_multiple_bad_velocities =
        measurements.iter().filter(|m| is_bad_wavelength(m)).count() > 1;
}

fn tally_examples(fields: &mut SpectraFields, examples: &[Measurement]) {
    let numbered = |n: MeasurementNumber| examples.iter().find(|m| m.measurement_number == n);
    let first = numbered(MeasurementNumber::First);
    fields.example_wavelength_measured = first.is_some_and(|m| m.obs_wave_value.is_some());
    fields.example_velocity_measured = first.is_some_and(|m| m.velocity_value.is_some());
    fields.second_example_measured =
        numbered(MeasurementNumber::Second).is_some_and(|m| m.obs_wave_value.is_some());
}

/// Reactive viewer values kept in step by the stage's links.
#[derive(Clone)]
pub struct SpectraViewers {
    /// Visible wavelength range of the spectrum viewer
    pub spectrum_bounds: ReactiveCell<Vec<f64>>,
    /// Visible velocity range of the dot plot
    pub dotplot_bounds: ReactiveCell<Vec<f64>>,
    /// Marker line on the spectrum
    pub wavelength_line: ReactiveCell<f64>,
    /// Marker line on the dot plot
    pub velocity_line: ReactiveCell<f64>,
}

impl Default for SpectraViewers {
    fn default() -> Self {
        Self {
            spectrum_bounds: ReactiveCell::default(),
            dotplot_bounds: ReactiveCell::default(),
            wavelength_line: ReactiveCell::new(H_ALPHA_REST_LAMBDA),
            velocity_line: ReactiveCell::new(0.0),
        }
    }
}

/// Outcome of [`SpectraStage::add_galaxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddGalaxy {
    /// Added to the collection
    Added,
    /// Already in the collection; nothing changed
    AlreadySelected,
    /// The collection is full; the snackbar says so
    Full,
}

/// Outcome of [`SpectraStage::record_wavelength`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavelengthOutcome {
    /// Stored on the selected galaxy
    Recorded,
    /// Too far from the catalogue redshift; not stored
    PoorlyMeasured,
    /// No galaxy, or one without a rest wavelength, is selected
    NoSelection,
}

/// A mounted spectra & velocity stage.
pub struct SpectraStage {
    controller: StageStateController<SpectraMarker, SpectraFields>,
    measurements: MeasurementCollection,
    examples: ExampleMeasurements,
    viewers: SpectraViewers,
    sky: Rc<dyn SkyViewer>,
    snackbar: ReactiveCell<Option<String>>,
    candidate: ReactiveCell<Option<Galaxy>>,
    links: Vec<SyncLink>,
    watches: Vec<MeasurementWatch>,
}

impl SpectraStage {
    /// Load the stage for `context` and wire its rules, listeners and links.
    pub async fn mount(
        context: SessionContext,
        store: Arc<dyn StageStore>,
        config: ControllerConfig,
        measurements: MeasurementCollection,
        examples: ExampleMeasurements,
        sky: Rc<dyn SkyViewer>,
    ) -> Result<Self> {
        use SpectraMarker::*;

        let machine = StageStateMachine::new(State::new(STAGE_ID), gates()?);
        let mut controller = StageStateController::new(context, machine, store, config);

        controller.add_rule(AutoAdvanceRule::new(
            "first_galaxy_selected",
            SelGal2,
            NotGal1,
            |s: &State| s.fields.total_galaxies == 1,
        ));

        {
            let measurements = measurements.clone();
            let examples = examples.clone();
            controller.on_loaded(move |machine| {
                let stored = machine.with_fields(|f| f.total_galaxies);
                if stored != measurements.len() {
                    info!(stored, actual = measurements.len(), "Correcting galaxy count");
                }
                machine.update_fields(|f| {
                    tally(f, &measurements.measurements());
                    tally_examples(f, &examples.all());
                });

                let total = machine.with_fields(|f| f.total_galaxies);
                if machine.is_current(SelGal2) && total == MAX_GALAXIES {
                    if let Err(e) = machine.jump(SelGal3, true) {
                        warn!(error = %e, "Could not skip finished galaxy selection");
                    }
                }

                if machine.current_marker() > ChoRow1 {
                    if let Some(first) = examples.first() {
                        machine.update_fields(|f| {
                            f.selected_example_galaxy.get_or_insert(first.galaxy_id());
                        });
                    }
                }

                if machine.at_or_after(RemVel1) {
                    examples.ensure_second_example();
                }
            });
        }

        {
            let examples = examples.clone();
            controller.on_marker_change(move |_, change| {
                if change.new >= RemVel1 && examples.ensure_second_example() {
                    debug!(marker = %change.new, "Second example measurement ready");
                }
            });
        }

        {
            let sky = Rc::clone(&sky);
            controller.on_marker_change(move |machine, change| {
                if change.new >= MeeGui1 && change.new <= SelGal4 {
                    machine.update_fields(|f| f.background_count += 1);
                    sky.set_background();
                }
            });
        }

        controller.load().await;

        let weak = controller.machine().downgrade();
        let on_measurements = measurements.watch(move |all| {
            if let Some(machine) = weak.upgrade() {
                machine.update_fields(|f| tally(f, all));
            }
        });
        let weak = controller.machine().downgrade();
        let on_examples = examples.watch(move |all| {
            if let Some(machine) = weak.upgrade() {
                machine.update_fields(|f| tally_examples(f, all));
            }
        });

        let viewers = SpectraViewers::default();
        let links = vec![link_bounds(&viewers, &examples), link_lines(&viewers, &examples)];

        Ok(Self {
            controller,
            measurements,
            examples,
            viewers,
            sky,
            snackbar: ReactiveCell::new(None),
            candidate: ReactiveCell::new(None),
            links,
            watches: vec![on_measurements, on_examples],
        })
    }

    /// Detach listeners and links, then flush the pending write.
    pub async fn unmount(self) -> Result<()> {
        let Self {
            controller,
            links,
            watches,
            ..
        } = self;
        drop(links);
        drop(watches);
        controller.unmount().await?;
        Ok(())
    }

    // ---- accessors ----

    /// The stage's state machine.
    pub fn machine(&self) -> &StageStateMachine<SpectraMarker, SpectraFields> {
        self.controller.machine()
    }

    /// The persistence controller.
    pub fn controller(&self) -> &StageStateController<SpectraMarker, SpectraFields> {
        &self.controller
    }

    /// Current state snapshot.
    pub fn state(&self) -> State {
        self.machine().state()
    }

    /// Linked viewer values.
    pub fn viewers(&self) -> &SpectraViewers {
        &self.viewers
    }

    /// The links between viewer values.
    pub fn links(&self) -> &[SyncLink] {
        &self.links
    }

    /// Message currently shown to the student, if any.
    pub fn snackbar(&self) -> Option<String> {
        self.snackbar.get()
    }

    /// Hide the snackbar.
    pub fn dismiss_snackbar(&self) {
        self.snackbar.set(None);
    }

    /// Galaxy offered by the selection tool, not yet added.
    pub fn candidate(&self) -> Option<Galaxy> {
        self.candidate.get()
    }

    // ---- navigation ----

    /// The guideline back button.
    ///
    /// From `not_gal1` or `sel_gal3` it returns straight to `sel_gal1`;
    /// `sel_gal2` asks for a first galaxy and no longer applies. From
    /// `che_mea1` it reopens the Doppler dialog on `dop_cal5`. Anywhere
    /// else it retreats one marker.
    pub fn back(&self) -> Result<SpectraMarker> {
        use SpectraMarker::*;

        let machine = self.machine();
        match machine.current_marker() {
            NotGal1 | SelGal3 => machine.jump(SelGal1, true)?,
            CheMea1 => {
                machine.update_fields(|f| {
                    f.validation_4_failed = false;
                    f.show_dop_cal4_values = true;
                });
                machine.jump(DopCal5, false)?;
                machine.update_fields(|f| f.show_doppler_dialog = true);
            }
            _ => {
                machine.retreat()?;
            }
        }
        Ok(machine.current_marker())
    }

    // ---- galaxy selection ----

    /// Leave the selection intro, skipping ahead when galaxies were already
    /// chosen.
    pub fn leave_selection_intro(&self) -> Result<()> {
        let target = if self.measurements.is_empty() {
            SpectraMarker::SelGal2
        } else {
            SpectraMarker::SelGal3
        };
        self.machine().jump(target, true)?;
        Ok(())
    }

    /// Add a galaxy to the student's collection.
    pub fn add_galaxy(&self, galaxy: Galaxy) -> AddGalaxy {
        if self.measurements.contains(galaxy.id) {
            return AddGalaxy::AlreadySelected;
        }
        if self.measurements.len() >= MAX_GALAXIES {
            info!("Attempted to add more than {} galaxies", MAX_GALAXIES);
            self.snackbar.set(Some(GALAXIES_FULL_MESSAGE.to_string()));
            return AddGalaxy::Full;
        }
        let student_id = self.controller.context().student_id;
        info!(galaxy = galaxy.id, "Adding galaxy to measurements");
        if self.candidate.with(|c| c.as_ref().is_some_and(|c| c.id == galaxy.id)) {
            self.candidate.set(None);
        }
        self.measurements.add(student_id, galaxy);
        AddGalaxy::Added
    }

    /// Offer a random galaxy the student has not picked yet.
    ///
    /// Only while galaxies are being chosen (`sel_gal2`, `sel_gal3`) and
    /// the collection has room. The sky viewer is centred on the pick,
    /// which becomes the [`candidate`](Self::candidate).
    pub fn select_random_galaxy<R: Rng + ?Sized>(
        &self,
        galaxies: &[Galaxy],
        rng: &mut R,
    ) -> Option<Galaxy> {
        use SpectraMarker::*;

        let choosing = matches!(self.machine().current_marker(), SelGal2 | SelGal3);
        if !choosing || self.measurements.len() >= MAX_GALAXIES {
            return None;
        }
        let open: Vec<&Galaxy> = galaxies
            .iter()
            .filter(|g| !self.measurements.contains(g.id))
            .collect();
        let galaxy = open.choose(rng).map(|g| (*g).clone())?;

        info!(galaxy = galaxy.id, "Offering a random galaxy");
        self.sky.go_to_location(galaxy.ra, galaxy.decl, GALAXY_FOV);
        self.candidate.set(Some(galaxy.clone()));
        Some(galaxy)
    }

    /// Highlight a galaxy in the student's table, or clear the highlight.
    pub fn select_galaxy(&self, galaxy_id: Option<GalaxyId>) {
        self.machine().update_fields(|f| {
            f.selected_galaxy = galaxy_id;
            f.galaxy_is_selected = galaxy_id.is_some();
        });
    }

    /// Choose the example galaxy, or clear the choice.
    pub fn select_example_galaxy(&self, galaxy_id: Option<GalaxyId>) {
        self.machine()
            .update_fields(|f| f.selected_example_galaxy = galaxy_id);
    }

    // ---- wavelengths and velocities ----

    fn example_number(&self) -> MeasurementNumber {
        if self.machine().at_or_after(SpectraMarker::RemVel1) {
            MeasurementNumber::Second
        } else {
            MeasurementNumber::First
        }
    }

    /// Record an observed wavelength for the selected galaxy.
    ///
    /// A wavelength far from the catalogue redshift sets
    /// `has_bad_velocities` and is not stored.
    pub fn record_wavelength(&self, wavelength: f64) -> WavelengthOutcome {
        let Some(galaxy_id) = self.machine().with_fields(|f| f.selected_galaxy) else {
            return WavelengthOutcome::NoSelection;
        };
        let Some(measurement) = self.measurements.get_measurement(galaxy_id) else {
            return WavelengthOutcome::NoSelection;
        };
        let Some(rest) = measurement.rest_wave_value else {
            return WavelengthOutcome::NoSelection;
        };

        let bad = is_wavelength_poorly_measured(
            wavelength,
            rest,
            measurement.galaxy.z,
            WAVELENGTH_TOLERANCE,
        );
        self.machine().update_fields(|f| f.has_bad_velocities = bad);
        if bad {
            info!(galaxy = galaxy_id, wavelength, "Wavelength measurement is bad");
            return WavelengthOutcome::PoorlyMeasured;
        }

        self.machine().update_fields(|f| f.obs_wave = wavelength);
        self.measurements
            .update(galaxy_id, |m| set_wavelength(m, wavelength, rest));
        WavelengthOutcome::Recorded
    }

    /// Record the observed wavelength of the example galaxy.
    ///
    /// Goes to the second example measurement from `rem_vel1` on.
    pub fn record_example_wavelength(&self, wavelength: f64) -> bool {
        let Some(galaxy_id) = self.machine().with_fields(|f| f.selected_example_galaxy) else {
            return false;
        };
        let number = self.example_number();
        let Some(rest) = self
            .examples
            .get(galaxy_id, number)
            .and_then(|m| m.rest_wave_value)
        else {
            return false;
        };

        self.machine().update_fields(|f| {
            f.obs_wave = wavelength;
            f.obs_wave_tool_used = true;
        });
        self.examples
            .update(galaxy_id, number, |m| set_wavelength(m, wavelength, rest));
        true
    }

    /// Store the velocity the student calculated for the example galaxy.
    pub fn calculate_example_velocity(&self, velocity: f64) -> bool {
        let Some(galaxy_id) = self.machine().with_fields(|f| f.selected_example_galaxy) else {
            return false;
        };
        self.examples
            .update(galaxy_id, MeasurementNumber::First, |m| {
                m.velocity_value = Some(velocity.round());
            })
            .found()
    }

    /// Compute velocities for every student galaxy with a wavelength.
    pub fn calculate_velocities(&self) -> bool {
        self.measurements.update_all(|m| {
            if let (Some(obs), Some(rest)) = (m.obs_wave_value, m.rest_wave_value) {
                m.velocity_value = Some(velocity_from_wavelengths(obs, rest));
            }
        })
    }

    /// Check the Doppler calculation inputs and move on when they are right.
    ///
    /// Passing opens the Doppler dialog.
    pub fn validate_doppler(&self, validated: bool) -> Result<()> {
        self.machine().update_fields(|f| {
            f.validation_4_failed = !validated;
            f.show_dop_cal4_values = validated;
        });
        if !validated {
            return Ok(());
        }
        if self.machine().is_current(SpectraMarker::DopCal4) {
            self.machine().advance()?;
        }
        self.machine().update_fields(|f| f.show_doppler_dialog = true);
        Ok(())
    }

    /// Show slide `step` of the Doppler dialog.
    pub fn doppler_step(&self, step: usize) {
        self.machine()
            .update_fields(|f| f.doppler.slides.go_to(step, DOPPLER_SLIDES));
    }

    /// The student typed in the speed of light, in km/s.
    pub fn enter_speed_of_light(&self, c: f64) -> bool {
        let correct = (c - SPEED_OF_LIGHT).abs() < 0.5;
        if !correct {
            debug!(c, "Speed of light entry rejected");
        }
        self.machine().update_fields(|f| {
            f.doppler.student_c = Some(c);
            f.doppler.validation_5_failed = !correct;
        });
        correct
    }

    /// Velocity the student worked out in the Doppler dialog.
    ///
    /// Stored, rounded, on the first example measurement.
    pub fn doppler_velocity_calculated(&self, velocity: f64) -> bool {
        let stored = self.calculate_example_velocity(velocity);
        if stored {
            self.machine()
                .update_fields(|f| f.doppler.velocity_calculated = true);
        }
        stored
    }

    /// Open or close the Doppler dialog.
    pub fn set_doppler_dialog(&self, open: bool) {
        self.machine().update_fields(|f| f.show_doppler_dialog = open);
    }

    /// A click on the velocity dot plot.
    ///
    /// Moves the dot-plot line; the spectrum line follows through the link.
    pub fn dotplot_click(&self, velocity: f64) {
        self.machine().update_fields(|f| f.dotplot_click_count += 1);
        self.viewers.velocity_line.set(velocity);
    }

    // ---- tools and questions ----

    /// The rest-wavelength tool was switched on.
    pub fn activate_rest_wave_tool(&self) {
        self.machine().update_fields(|f| f.rest_wave_tool_activated = true);
    }

    /// The spectrum zoom tool was used.
    pub fn activate_zoom_tool(&self) {
        self.machine().update_fields(|f| f.zoom_tool_activated = true);
    }

    /// The dot-plot tutorial was closed on its last slide.
    pub fn finish_dotplot_tutorial(&self) {
        self.machine().update_fields(|f| f.dotplot_tutorial_finished = true);
    }

    /// The reflection dialog was completed.
    pub fn complete_reflection(&self) {
        self.machine().update_fields(|f| f.reflection_complete = true);
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

fn set_wavelength(m: &mut Measurement, wavelength: f64, rest: f64) {
    m.obs_wave_value = Some(wavelength.round());
    if m.velocity_value.is_some() {
        m.velocity_value = Some(velocity_from_wavelengths(wavelength, rest));
    }
}

fn link_bounds(viewers: &SpectraViewers, examples: &ExampleMeasurements) -> SyncLink {
    let to_velocity = examples.clone();
    let to_wavelength = examples.clone();
    link(
        &viewers.spectrum_bounds,
        &viewers.dotplot_bounds,
        move |range: &Vec<f64>| {
            to_velocity
                .rest_wavelength()
                .map(|rest| wavelength_range_to_velocity(range, rest))
        },
        move |range: &Vec<f64>| {
            to_wavelength
                .rest_wavelength()
                .map(|rest| velocity_range_to_wavelength(range, rest))
        },
    )
}

fn link_lines(viewers: &SpectraViewers, examples: &ExampleMeasurements) -> SyncLink {
    let to_velocity = examples.clone();
    let to_wavelength = examples.clone();
    link(
        &viewers.wavelength_line,
        &viewers.velocity_line,
        move |wavelength: &f64| to_velocity.rest_wavelength().map(|rest| w2v(*wavelength, rest)),
        move |velocity: &f64| to_wavelength.rest_wavelength().map(|rest| v2w(*velocity, rest)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill::{catalogue, example_galaxy};
    use crate::sky::{RecordingSkyViewer, SkyCommand};
    use datastory_core::Marker;
    use datastory_storage::MemoryStageStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    use SpectraMarker::*;

    struct Harness {
        stage: SpectraStage,
        store: Arc<MemoryStageStore>,
        sky: Rc<RecordingSkyViewer>,
        context: SessionContext,
    }

    async fn harness_with(
        store: Arc<MemoryStageStore>,
        measurements: MeasurementCollection,
    ) -> Harness {
        let context = SessionContext::new(7, "hubbles_law");
        let sky = Rc::new(RecordingSkyViewer::new());
        let stage = SpectraStage::mount(
            context.clone(),
            store.clone(),
            ControllerConfig::default(),
            measurements,
            ExampleMeasurements::for_galaxy(7, example_galaxy()),
            sky.clone(),
        )
        .await
        .unwrap();
        Harness {
            stage,
            store,
            sky,
            context,
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(MemoryStageStore::new()), MeasurementCollection::new()).await
    }

    async fn store_state(store: &MemoryStageStore, context: &SessionContext, state: &State) {
        let doc = serde_json::to_value(state).unwrap();
        store
            .put_stage_state(&context.stage_key(STAGE_ID), &doc)
            .await
            .unwrap();
    }

    #[test]
    fn test_gate_table_is_well_formed() {
        let gates = gates().unwrap();
        assert_eq!(gates.len(), 15);
        assert_eq!(
            gates.get(SelGal3, SelGal4).map(|g| g.name()),
            Some("all_galaxies_selected")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_galaxy_advances_to_notice() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.jump(SelGal2, true).unwrap();

        assert_eq!(h.stage.add_galaxy(catalogue()[0].clone()), AddGalaxy::Added);
        assert_eq!(machine.current_marker(), NotGal1);

        // Retreating does not re-fire the rule.
        machine.retreat().unwrap();
        assert_eq!(h.stage.add_galaxy(catalogue()[1].clone()), AddGalaxy::Added);
        assert_eq!(machine.current_marker(), SelGal2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_galaxy_limits_and_duplicates() {
        let h = harness().await;
        for galaxy in catalogue() {
            assert_eq!(h.stage.add_galaxy(galaxy), AddGalaxy::Added);
        }
        assert_eq!(
            h.stage.add_galaxy(catalogue()[0].clone()),
            AddGalaxy::AlreadySelected
        );
        assert!(h.stage.snackbar().is_none());

        let mut extra = example_galaxy();
        extra.id = 9999;
        assert_eq!(h.stage.add_galaxy(extra), AddGalaxy::Full);
        assert_eq!(h.stage.snackbar().as_deref(), Some(GALAXIES_FULL_MESSAGE));
        assert_eq!(h.stage.state().fields.total_galaxies, MAX_GALAXIES);

        h.stage.dismiss_snackbar();
        assert!(h.stage.snackbar().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_skips_finished_selection_and_fixes_count() {
        let store = Arc::new(MemoryStageStore::new());
        let context = SessionContext::new(7, "hubbles_law");
        let mut stored = State::new(STAGE_ID);
        stored.move_to(SelGal2);
        stored.fields.total_galaxies = 2;
        store_state(&store, &context, &stored).await;

        let measurements = MeasurementCollection::new();
        crate::fill::fill_galaxies(&measurements, 7);
        let h = harness_with(store, measurements).await;

        let state = h.stage.state();
        assert_eq!(state.current_marker(), SelGal3);
        assert_eq!(state.fields.total_galaxies, MAX_GALAXIES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_past_choice_selects_example() {
        let store = Arc::new(MemoryStageStore::new());
        let context = SessionContext::new(7, "hubbles_law");
        let mut stored = State::new(STAGE_ID);
        stored.move_to(ObsWav1);
        store_state(&store, &context, &stored).await;

        let h = harness_with(store, MeasurementCollection::new()).await;
        assert_eq!(
            h.stage.state().fields.selected_example_galaxy,
            Some(crate::fill::EXAMPLE_GALAXY_ID)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_example_seeded_once() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.jump(RemVel1, true).unwrap();
        assert_eq!(h.stage.examples.all().len(), 2);

        machine.retreat().unwrap();
        machine.jump(RefDat1, true).unwrap();
        assert_eq!(h.stage.examples.all().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_bumped_during_selection_only() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.advance().unwrap();
        machine.advance().unwrap();
        machine.jump(MeeSpe1, true).unwrap();

        assert_eq!(h.stage.state().fields.background_count, 2);
        assert_eq!(h.sky.background_calls(), 2);
        assert!(h.sky.commands().iter().all(|c| *c == SkyCommand::Background));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_wavelength_is_not_stored() {
        let h = harness().await;
        let galaxy = catalogue()[0].clone();
        let id = galaxy.id;
        h.stage.add_galaxy(galaxy);

        assert_eq!(h.stage.record_wavelength(6700.0), WavelengthOutcome::NoSelection);
        h.stage.select_galaxy(Some(id));

        assert_eq!(h.stage.record_wavelength(6570.0), WavelengthOutcome::PoorlyMeasured);
        assert!(h.stage.state().fields.has_bad_velocities);
        assert_eq!(h.stage.state().fields.obs_wave_total, 0);

        assert_eq!(h.stage.record_wavelength(6705.4), WavelengthOutcome::Recorded);
        let state = h.stage.state();
        assert!(!state.fields.has_bad_velocities);
        assert_eq!(state.fields.obs_wave_total, 1);
        assert_eq!(
            h.stage.measurements.get_measurement(id).unwrap().obs_wave_value,
            Some(6705.0)
        );

        assert!(h.stage.calculate_velocities());
        assert_eq!(h.stage.state().fields.velocities_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_doppler_validation_gate() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.jump(DopCal4, true).unwrap();
        assert!(machine.advance().is_err());

        h.stage.validate_doppler(false).unwrap();
        assert_eq!(machine.current_marker(), DopCal4);
        assert!(h.stage.state().fields.validation_4_failed);

        h.stage.validate_doppler(true).unwrap();
        assert_eq!(machine.current_marker(), DopCal5);

        // Needs the example velocity and the interpretation answer.
        assert!(machine.advance().is_err());
        h.stage.select_example_galaxy(Some(crate::fill::EXAMPLE_GALAXY_ID));
        assert!(h.stage.calculate_example_velocity(4927.4));
        h.stage.answer(INTERPRET_VELOCITY, 1, true, 10);
        assert_eq!(machine.advance().unwrap(), CheMea1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_doppler_dialog_progress() {
        let h = harness().await;
        h.stage.machine().jump(DopCal4, true).unwrap();
        h.stage.validate_doppler(true).unwrap();
        assert!(h.stage.state().fields.show_doppler_dialog);

        h.stage.doppler_step(3);
        h.stage.doppler_step(1);
        assert!(!h.stage.enter_speed_of_light(3.0e8));
        assert!(h.stage.state().fields.doppler.validation_5_failed);
        assert!(h.stage.enter_speed_of_light(300_000.0));

        assert!(!h.stage.doppler_velocity_calculated(4927.4));
        h.stage.select_example_galaxy(Some(crate::fill::EXAMPLE_GALAXY_ID));
        assert!(h.stage.doppler_velocity_calculated(4927.4));

        let doppler = h.stage.state().fields.doppler;
        assert_eq!(doppler.slides.step, 1);
        assert_eq!(doppler.slides.max_step_completed, 3);
        assert_eq!(doppler.student_c, Some(300_000.0));
        assert!(!doppler.validation_5_failed);
        assert!(doppler.velocity_calculated);
        assert_eq!(h.stage.examples.first().unwrap().velocity_value, Some(4927.0));

        h.stage.set_doppler_dialog(false);
        assert!(!h.stage.state().fields.show_doppler_dialog);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_from_selection_returns_to_first_prompt() {
        let h = harness().await;
        let machine = h.stage.machine();
        machine.jump(SelGal2, true).unwrap();
        h.stage.add_galaxy(catalogue()[0].clone());
        assert_eq!(machine.current_marker(), NotGal1);

        let entered = Rc::new(std::cell::Cell::new(0));
        let count = entered.clone();
        machine.on_enter(SelGal2, move |_, _| count.set(count.get() + 1));

        assert_eq!(h.stage.back().unwrap(), SelGal1);
        machine.jump(SelGal3, true).unwrap();
        assert_eq!(h.stage.back().unwrap(), SelGal1);
        assert_eq!(entered.get(), 0, "sel_gal2 is skipped on the way back");

        assert_eq!(h.stage.back().unwrap(), MeeGui1);
        assert!(h.stage.back().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_from_check_reopens_doppler_dialog() {
        let h = harness().await;
        h.stage.machine().jump(CheMea1, true).unwrap();
        h.stage.set_doppler_dialog(false);

        assert_eq!(h.stage.back().unwrap(), DopCal5);
        let fields = h.stage.state().fields;
        assert!(fields.show_doppler_dialog);
        assert!(fields.show_dop_cal4_values);
        assert!(!fields.validation_4_failed);

        assert_eq!(h.stage.back().unwrap(), DopCal4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_galaxy_only_while_choosing() {
        let h = harness().await;
        let mut rng = StdRng::seed_from_u64(3);
        let galaxies = catalogue();
        assert!(h.stage.select_random_galaxy(&galaxies, &mut rng).is_none());

        h.stage.machine().jump(SelGal2, true).unwrap();
        let picked = h.stage.select_random_galaxy(&galaxies, &mut rng).unwrap();
        assert_eq!(h.stage.candidate(), Some(picked.clone()));
        assert!(h.sky.commands().contains(&SkyCommand::GoTo {
            ra: picked.ra,
            dec: picked.decl,
            fov: GALAXY_FOV,
        }));

        for galaxy in &galaxies[..4] {
            h.stage.add_galaxy(galaxy.clone());
        }
        h.stage.machine().jump(SelGal3, true).unwrap();
        let last = h.stage.select_random_galaxy(&galaxies, &mut rng).unwrap();
        assert_eq!(last.id, galaxies[4].id);

        assert_eq!(h.stage.add_galaxy(last), AddGalaxy::Added);
        assert!(h.stage.candidate().is_none());
        assert!(h.stage.select_random_galaxy(&galaxies, &mut rng).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_linked_ranges_and_lines() {
        let h = harness().await;
        let viewers = h.stage.viewers();

        viewers.spectrum_bounds.set(vec![6565.0, 6630.65]);
        let velocities = viewers.dotplot_bounds.get();
        assert_eq!(velocities.len(), 2);
        assert!(velocities[0].abs() < 1e-9);
        assert!((velocities[1] - 3000.0).abs() < 1e-6);

        h.stage.dotplot_click(3000.0);
        assert!((viewers.wavelength_line.get() - 6630.65).abs() < 1e-6);
        assert_eq!(h.stage.state().fields.dotplot_click_count, 1);

        for link in h.stage.links() {
            assert_eq!(link.stats().hops(), 1);
            assert_eq!(link.stats().suppressed, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_links_skip_without_example() {
        let context = SessionContext::new(7, "hubbles_law");
        let stage = SpectraStage::mount(
            context,
            Arc::new(MemoryStageStore::new()),
            ControllerConfig::default(),
            MeasurementCollection::new(),
            ExampleMeasurements::new(),
            Rc::new(RecordingSkyViewer::new()),
        )
        .await
        .unwrap();

        stage.viewers().spectrum_bounds.set(vec![6500.0, 6700.0]);
        assert!(stage.viewers().dotplot_bounds.get().is_empty());
        assert_eq!(stage.links()[0].stats().skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_persisted_on_unmount() {
        let h = harness().await;
        h.stage.machine().jump(ChoRow1, true).unwrap();
        h.stage.select_example_galaxy(Some(crate::fill::EXAMPLE_GALAXY_ID));
        h.stage.machine().advance().unwrap();

        let key = h.context.stage_key(STAGE_ID);
        let store = h.store.clone();
        h.stage.unmount().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let doc = store.get_stage_state(&key).await.unwrap().unwrap();
        let state: State = serde_json::from_value(doc).unwrap();
        assert_eq!(state.current_marker(), MeeSpe1);
        assert_eq!(state.max_marker_reached().name(), "mee_spe1");
    }
}
