//! Demo shortcuts that fill a student's measurements from seed data.
//!
//! Every helper is idempotent: applying it twice leaves the collection
//! exactly as after the first call, and returns `false` the second time.

use datastory_core::{Galaxy, GalaxyId, Measurement};
use tracing::info;

use crate::measurements::{MeasurementCollection, MAX_GALAXIES};
use crate::physics::{distance_from_angular_size, rest_wavelength, velocity_from_wavelengths};

/// Catalogue id of the example galaxy.
pub const EXAMPLE_GALAXY_ID: GalaxyId = 1576;

/// One seeded observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedMeasurement {
    /// Observed galaxy
    pub galaxy: Galaxy,
    /// Observed wavelength in Å
    pub obs_wave_value: f64,
    /// Angular size in arcseconds
    pub ang_size_value: f64,
}

fn galaxy(id: GalaxyId, name: &str, ra: f64, decl: f64, z: f64, element: &str) -> Galaxy {
    Galaxy {
        id,
        name: name.to_string(),
        ra,
        decl,
        z,
        element: element.to_string(),
    }
}

/// The example galaxy every student measures first.
pub fn example_galaxy() -> Galaxy {
    galaxy(EXAMPLE_GALAXY_ID, "J085545.31+064542.3", 133.9388, 6.7618, 0.0217, "H-α")
}

/// Seed observations, one per galaxy a student measures.
pub fn seed_data() -> Vec<SeedMeasurement> {
    let seed = |galaxy: Galaxy, obs_wave_value: f64, ang_size_value: f64| SeedMeasurement {
        galaxy,
        obs_wave_value,
        ang_size_value,
    };
    vec![
        seed(galaxy(1001, "J100325.38+021151.2", 150.8558, 2.1976, 0.0213, "H-α"), 6705.0, 48.0),
        seed(galaxy(1002, "J114218.47+142413.8", 175.5770, 14.4038, 0.0327, "H-α"), 6780.0, 29.0),
        seed(galaxy(1003, "J121708.08+051402.8", 184.2837, 5.2341, 0.0071, "H-α"), 6612.0, 122.0),
        seed(galaxy(1004, "J133023.56+104310.4", 202.5982, 10.7196, 0.0486, "Mg-I"), 5423.0, 21.0),
        seed(galaxy(1005, "J151244.13+033806.1", 228.1839, 3.6350, 0.0162, "H-α"), 6671.0, 66.0),
    ]
}

/// Galaxies available for selection.
pub fn catalogue() -> Vec<Galaxy> {
    seed_data().into_iter().map(|s| s.galaxy).collect()
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    wavelength: bool,
    velocity: bool,
    angular_size: bool,
    distance: bool,
}

fn seeded(student_id: u64, columns: Columns) -> Vec<Measurement> {
    seed_data()
        .into_iter()
        .map(|seed| {
            let rest = rest_wavelength(&seed.galaxy.element);
            let mut m = Measurement::new(student_id, seed.galaxy);
            m.rest_wave_value = rest;
            if columns.wavelength {
                m.obs_wave_value = Some(seed.obs_wave_value);
            }
            if columns.velocity {
                m.velocity_value =
                    rest.map(|rest| velocity_from_wavelengths(seed.obs_wave_value, rest));
            }
            if columns.angular_size {
                m.ang_size_value = Some(seed.ang_size_value);
            }
            if columns.distance {
                m.est_dist_value = distance_from_angular_size(seed.ang_size_value);
            }
            m
        })
        .collect()
}

fn replace(
    measurements: &MeasurementCollection,
    student_id: u64,
    what: &str,
    columns: Columns,
) -> bool {
    let changed = measurements.replace(seeded(student_id, columns));
    if changed {
        info!(student_id, fill = what, "Filled measurements from seed data");
    }
    changed
}

/// Top the collection up to [`MAX_GALAXIES`] from the catalogue.
pub fn fill_galaxies(measurements: &MeasurementCollection, student_id: u64) -> bool {
    let mut changed = false;
    for galaxy in catalogue() {
        if measurements.len() >= MAX_GALAXIES {
            break;
        }
        changed |= measurements.add(student_id, galaxy);
    }
    changed
}

/// Seed galaxies with observed wavelengths.
pub fn fill_wavelengths(measurements: &MeasurementCollection, student_id: u64) -> bool {
    let columns = Columns {
        wavelength: true,
        velocity: false,
        angular_size: false,
        distance: false,
    };
    replace(measurements, student_id, "wavelengths", columns)
}

/// Seed galaxies with wavelengths and velocities.
pub fn fill_wavelengths_and_velocities(
    measurements: &MeasurementCollection,
    student_id: u64,
) -> bool {
    let columns = Columns {
        wavelength: true,
        velocity: true,
        angular_size: false,
        distance: false,
    };
    replace(measurements, student_id, "wavelengths_and_velocities", columns)
}

/// Seed galaxies with wavelengths, velocities and angular sizes.
pub fn fill_wave_vel_ang(measurements: &MeasurementCollection, student_id: u64) -> bool {
    let columns = Columns {
        wavelength: true,
        velocity: true,
        angular_size: true,
        distance: false,
    };
    replace(measurements, student_id, "wave_vel_ang", columns)
}

/// Seed galaxies with angular sizes and distances only.
pub fn fill_angular_sizes_and_distances(
    measurements: &MeasurementCollection,
    student_id: u64,
) -> bool {
    let columns = Columns {
        wavelength: false,
        velocity: false,
        angular_size: true,
        distance: true,
    };
    replace(measurements, student_id, "angular_sizes_and_distances", columns)
}

/// Seed every measured value.
pub fn fill_all_measurements(measurements: &MeasurementCollection, student_id: u64) -> bool {
    let columns = Columns {
        wavelength: true,
        velocity: true,
        angular_size: true,
        distance: true,
    };
    replace(measurements, student_id, "all", columns)
}
