//! The Hubble's law story: one student session across every stage.

use std::rc::Rc;
use std::sync::Arc;

use datastory_core::{Marker, SessionContext};
use datastory_storage::StageStore;
use datastory_work::ControllerConfig;

use crate::distance::{self, DistanceMarker, DistanceStage};
use crate::error::Result;
use crate::fill::example_galaxy;
use crate::measurements::{ExampleMeasurements, MeasurementCollection};
use crate::prodata::{self, ProDataMarker, ProDataStage};
use crate::sky::SkyViewer;
use crate::slideshow::{self, SlideshowMarker, SlideshowSpec, SlideshowStage};
use crate::spectra::{self, SpectraMarker, SpectraStage};

/// Story name used in persistence keys.
pub const HUBBLE_STORY: &str = "hubbles_law";

/// Stage ids in story order.
pub const STAGES: [&str; 5] = [
    slideshow::INTRO.stage_id,
    spectra::STAGE_ID,
    slideshow::DISTANCE_INTRODUCTION.stage_id,
    distance::STAGE_ID,
    prodata::STAGE_ID,
];

fn names<M: Marker>() -> Vec<&'static str> {
    M::SEQUENCE.iter().map(|m| m.name()).collect()
}

/// Marker names of a stage, in order.
pub fn stage_markers(stage_id: &str) -> Option<Vec<&'static str>> {
    match stage_id {
        spectra::STAGE_ID => Some(names::<SpectraMarker>()),
        distance::STAGE_ID => Some(names::<DistanceMarker>()),
        prodata::STAGE_ID => Some(names::<ProDataMarker>()),
        id if id == slideshow::INTRO.stage_id
            || id == slideshow::DISTANCE_INTRODUCTION.stage_id =>
        {
            Some(names::<SlideshowMarker>())
        }
        _ => None,
    }
}

/// Everything the stages of one session share.
///
/// Stages are mounted one at a time against the same measurements, so a
/// galaxy picked in the spectra stage is the one measured in the distance
/// stage.
pub struct HubbleStory {
    context: SessionContext,
    store: Arc<dyn StageStore>,
    config: ControllerConfig,
    measurements: MeasurementCollection,
    examples: ExampleMeasurements,
    sky: Rc<dyn SkyViewer>,
}

impl HubbleStory {
    /// Start a session for `student_id`.
    pub fn new(
        student_id: u64,
        store: Arc<dyn StageStore>,
        config: ControllerConfig,
        sky: Rc<dyn SkyViewer>,
    ) -> Self {
        Self {
            context: SessionContext::new(student_id, HUBBLE_STORY),
            store,
            config,
            measurements: MeasurementCollection::new(),
            examples: ExampleMeasurements::for_galaxy(student_id, example_galaxy()),
            sky,
        }
    }

    /// Session context.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// The student's measurements.
    pub fn measurements(&self) -> &MeasurementCollection {
        &self.measurements
    }

    /// The example galaxy measurements.
    pub fn examples(&self) -> &ExampleMeasurements {
        &self.examples
    }

    /// The store stages persist to.
    pub fn store(&self) -> &Arc<dyn StageStore> {
        &self.store
    }

    async fn mount_slideshow(&self, spec: SlideshowSpec) -> Result<SlideshowStage> {
        SlideshowStage::mount(
            self.context.clone(),
            Arc::clone(&self.store),
            self.config.clone(),
            spec,
        )
        .await
    }

    /// Mount the intro slideshow.
    pub async fn mount_intro(&self) -> Result<SlideshowStage> {
        self.mount_slideshow(slideshow::INTRO).await
    }

    /// Mount the spectra & velocity stage.
    pub async fn mount_spectra(&self) -> Result<SpectraStage> {
        SpectraStage::mount(
            self.context.clone(),
            Arc::clone(&self.store),
            self.config.clone(),
            self.measurements.clone(),
            self.examples.clone(),
            Rc::clone(&self.sky),
        )
        .await
    }

    /// Mount the distance introduction slideshow.
    pub async fn mount_distance_introduction(&self) -> Result<SlideshowStage> {
        self.mount_slideshow(slideshow::DISTANCE_INTRODUCTION).await
    }

    /// Mount the distance measurement stage.
    pub async fn mount_distance(&self) -> Result<DistanceStage> {
        DistanceStage::mount(
            self.context.clone(),
            Arc::clone(&self.store),
            self.config.clone(),
            self.measurements.clone(),
            self.examples.clone(),
            Rc::clone(&self.sky),
        )
        .await
    }

    /// Mount the professional data stage over the class's measurements.
    pub async fn mount_prodata(&self, class: MeasurementCollection) -> Result<ProDataStage> {
        ProDataStage::mount(
            self.context.clone(),
            Arc::clone(&self.store),
            self.config.clone(),
            class,
        )
        .await
    }
}
