//! Astronomy transforms used by the linked viewers and the seeding code.

/// Speed of light in km/s, as used throughout the story.
pub const SPEED_OF_LIGHT: f64 = 3.0e5;

/// Rest wavelength of H-α in Å.
pub const H_ALPHA_REST_LAMBDA: f64 = 6565.0;

/// Rest wavelength of the Mg-I triplet in Å.
pub const MG_REST_LAMBDA: f64 = 5172.0;

/// Milky Way diameter (0.03 Mpc) expressed as the constant relating
/// distance in Mpc to angular size in arcseconds, rounded to 10.
pub const DISTANCE_CONSTANT: f64 = 6190.0;

/// Fractional redshift error above which a wavelength counts as a bad
/// measurement.
pub const WAVELENGTH_TOLERANCE: f64 = 0.5;

/// Rest wavelength of a spectral line, by element label.
pub fn rest_wavelength(element: &str) -> Option<f64> {
    match element {
        "H-α" | "H-alpha" => Some(H_ALPHA_REST_LAMBDA),
        "Mg-I" => Some(MG_REST_LAMBDA),
        _ => None,
    }
}

/// Recession velocity in km/s, rounded to whole km/s.
pub fn velocity_from_wavelengths(observed: f64, rest: f64) -> f64 {
    (SPEED_OF_LIGHT * (observed / rest - 1.0)).round()
}

/// Wavelength to velocity, unrounded.
pub fn w2v(wavelength: f64, rest: f64) -> f64 {
    SPEED_OF_LIGHT * (wavelength / rest - 1.0)
}

/// Velocity to wavelength.
pub fn v2w(velocity: f64, rest: f64) -> f64 {
    rest * (velocity / SPEED_OF_LIGHT + 1.0)
}

/// Distance in Mpc from an angular size in arcseconds, rounded.
///
/// `None` for a non-positive size.
pub fn distance_from_angular_size(theta: f64) -> Option<f64> {
    (theta > 0.0).then(|| (DISTANCE_CONSTANT / theta).round())
}

/// Angular size in arcseconds from a distance in Mpc, rounded.
pub fn angular_size_from_distance(distance: f64) -> Option<f64> {
    (distance > 0.0).then(|| (DISTANCE_CONSTANT / distance).round())
}

/// Whether an observed wavelength is more than `tolerance` (fractional)
/// away from the redshift the catalogue gives.
pub fn is_wavelength_poorly_measured(observed: f64, rest: f64, z: f64, tolerance: f64) -> bool {
    let z_measured = (observed - rest) / rest;
    ((z_measured - z) / z).abs() > tolerance
}

/// Map a wavelength range onto a velocity range.
pub fn wavelength_range_to_velocity(range: &[f64], rest: f64) -> Vec<f64> {
    range.iter().map(|w| w2v(*w, rest)).collect()
}

/// Map a velocity range onto a wavelength range.
pub fn velocity_range_to_wavelength(range: &[f64], rest: f64) -> Vec<f64> {
    range.iter().map(|v| v2w(*v, rest)).collect()
}

/// Map an angular-size range onto a distance range or back.
///
/// The map is its own inverse and reverses the order, since larger
/// angles mean smaller distances. Values below 1 are treated as 1.
pub fn reciprocal_range(range: &[f64]) -> Vec<f64> {
    range
        .iter()
        .rev()
        .map(|x| DISTANCE_CONSTANT / x.max(1.0))
        .collect()
}
