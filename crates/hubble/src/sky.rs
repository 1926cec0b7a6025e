//! Sky viewer collaborator.
//!
//! The viewer widget itself lives outside this crate. Stages only drive
//! it through [`SkyViewer`]; its angular-size, ruler and brightness events
//! are handed back to the distance stage by whoever hosts the widget.

use std::cell::RefCell;

/// Field of view used when centring a galaxy, in degrees.
pub const GALAXY_FOV: f64 = 60.0 / 3600.0;

/// Commands a stage can send to the sky viewer.
pub trait SkyViewer {
    /// Centre the view on `(ra, dec)` with the given field of view.
    fn go_to_location(&self, ra: f64, dec: f64, fov: f64);

    /// Enable or disable the angular-size measuring tool.
    fn set_measuring(&self, measuring: bool);

    /// Re-apply the background imagery.
    fn set_background(&self);

    /// Clear any drawn measurement.
    fn reset_canvas(&self) {}

    /// Show or hide the ruler overlay.
    fn set_show_ruler(&self, _show: bool) {}

    /// Accept only measurements within `min..=max` arcseconds.
    fn set_guard(&self, _min: f64, _max: f64) {}
}

/// A viewer that ignores every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSkyViewer;

impl SkyViewer for DetachedSkyViewer {
    fn go_to_location(&self, _ra: f64, _dec: f64, _fov: f64) {}

    fn set_measuring(&self, _measuring: bool) {}

    fn set_background(&self) {}
}

/// A command received by a [`RecordingSkyViewer`].
#[derive(Debug, Clone, PartialEq)]
pub enum SkyCommand {
    /// `go_to_location`
    GoTo {
        /// Right ascension
        ra: f64,
        /// Declination
        dec: f64,
        /// Field of view
        fov: f64,
    },
    /// `set_measuring`
    Measuring(bool),
    /// `set_background`
    Background,
    /// `reset_canvas`
    ResetCanvas,
    /// `set_show_ruler`
    ShowRuler(bool),
    /// `set_guard`, in arcseconds
    Guard {
        /// Smallest accepted angle
        min: f64,
        /// Largest accepted angle
        max: f64,
    },
}

/// A viewer that records what it was told to do.
///
/// Used by the walkthrough binary to report viewer traffic.
#[derive(Debug, Default)]
pub struct RecordingSkyViewer {
    commands: RefCell<Vec<SkyCommand>>,
}

impl RecordingSkyViewer {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands received so far.
    pub fn commands(&self) -> Vec<SkyCommand> {
        self.commands.borrow().clone()
    }

    /// Take and clear the recorded commands.
    pub fn take(&self) -> Vec<SkyCommand> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }

    /// Number of `set_background` calls.
    pub fn background_calls(&self) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|c| matches!(c, SkyCommand::Background))
            .count()
    }

    fn push(&self, command: SkyCommand) {
        self.commands.borrow_mut().push(command);
    }
}

impl SkyViewer for RecordingSkyViewer {
    fn go_to_location(&self, ra: f64, dec: f64, fov: f64) {
        self.push(SkyCommand::GoTo { ra, dec, fov });
    }

    fn set_measuring(&self, measuring: bool) {
        self.push(SkyCommand::Measuring(measuring));
    }

    fn set_background(&self) {
        self.push(SkyCommand::Background);
    }

    fn reset_canvas(&self) {
        self.push(SkyCommand::ResetCanvas);
    }

    fn set_show_ruler(&self, show: bool) {
        self.push(SkyCommand::ShowRuler(show));
    }

    fn set_guard(&self, min: f64, max: f64) {
        self.push(SkyCommand::Guard { min, max });
    }
}
