//! Measurement model - one student's observation of one galaxy.

use serde::{Deserialize, Serialize};

/// Galaxy identifier, as assigned by the galaxy catalogue.
pub type GalaxyId = u64;

/// A galaxy the student can measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Galaxy {
    /// Catalogue id
    pub id: GalaxyId,

    /// Display name
    pub name: String,

    /// Right ascension in degrees
    pub ra: f64,

    /// Declination in degrees
    pub decl: f64,

    /// Catalogue redshift
    pub z: f64,

    /// Spectral line used for the measurement (e.g. `H-α`)
    pub element: String,
}

/// Which of the two example measurements a record is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementNumber {
    /// First pass
    #[default]
    First,
    /// Repeat pass, unlocked later in the stage
    Second,
}

/// One student's observation of one galaxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measured galaxy
    pub galaxy: Galaxy,

    /// Student who made the measurement
    pub student_id: u64,

    /// First or second measurement of the same galaxy
    #[serde(default)]
    pub measurement_number: MeasurementNumber,

    /// Rest wavelength of the spectral line in Å
    pub rest_wave_value: Option<f64>,

    /// Observed wavelength in Å
    pub obs_wave_value: Option<f64>,

    /// Recession velocity in km/s
    pub velocity_value: Option<f64>,

    /// Angular size in arcseconds
    pub ang_size_value: Option<f64>,

    /// Estimated distance in Mpc
    pub est_dist_value: Option<f64>,

    /// Viewer brightness when the angular size was measured
    pub brightness: Option<f64>,
}

impl Measurement {
    /// Create an empty measurement of `galaxy`.
    pub fn new(student_id: u64, galaxy: Galaxy) -> Self {
        Self {
            galaxy,
            student_id,
            measurement_number: MeasurementNumber::First,
            rest_wave_value: None,
            obs_wave_value: None,
            velocity_value: None,
            ang_size_value: None,
            est_dist_value: None,
            brightness: None,
        }
    }

    /// Set the measurement number.
    pub fn with_number(mut self, number: MeasurementNumber) -> Self {
        self.measurement_number = number;
        self
    }

    /// Galaxy id shortcut.
    pub fn galaxy_id(&self) -> GalaxyId {
        self.galaxy.id
    }
}

/// Read-only access to the current measurements of a student.
pub trait MeasurementSource {
    /// All measurements, in selection order.
    fn measurements(&self) -> Vec<Measurement>;

    /// The measurement of a galaxy.
    fn get_measurement(&self, galaxy_id: GalaxyId) -> Option<Measurement> {
        self.measurements()
            .into_iter()
            .find(|m| m.galaxy_id() == galaxy_id)
    }

    /// Position of a galaxy's measurement.
    fn get_measurement_index(&self, galaxy_id: GalaxyId) -> Option<usize> {
        self.measurements()
            .iter()
            .position(|m| m.galaxy_id() == galaxy_id)
    }

    /// Number of measurements for which `filled` holds.
    fn count_where(&self, filled: impl Fn(&Measurement) -> bool) -> usize
    where
        Self: Sized,
    {
        self.measurements().iter().filter(|m| filled(m)).count()
    }
}
