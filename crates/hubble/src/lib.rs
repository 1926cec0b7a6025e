//! Hubble's law stages (Layer 5)
//!
//! The concrete story built on the stage machinery: galaxy measurements,
//! the spectra & velocity stage, the distance stage, the professional
//! data stage and the slideshows around them.

#![warn(missing_docs)]

pub mod distance;
pub mod error;
pub mod fill;
pub mod measurements;
pub mod physics;
pub mod prodata;
pub mod sky;
pub mod slideshow;
pub mod spectra;
pub mod story;

pub use distance::{
    AngularSizeOutcome, DistanceFields, DistanceMarker, DistanceStage, DistanceViewers,
};
pub use error::{Result, StageError};
pub use measurements::{
    ExampleMeasurements, MeasurementCollection, MeasurementUpdate, MeasurementWatch, MAX_GALAXIES,
};
pub use prodata::{Layers, ProDataFields, ProDataMarker, ProDataStage, ProDataViewers};
pub use sky::{DetachedSkyViewer, RecordingSkyViewer, SkyCommand, SkyViewer};
pub use slideshow::{SlideshowFields, SlideshowMarker, SlideshowSpec, SlideshowStage};
pub use spectra::{
    AddGalaxy, SpectraFields, SpectraMarker, SpectraStage, SpectraViewers, WavelengthOutcome,
};
pub use story::{stage_markers, HubbleStory, HUBBLE_STORY, STAGES};
