//! Small numeric helpers shared by the statistics code.

/// Round `value` up to the nearest human-friendly number: 1, 2 or 5 times
/// a power of ten. Used for histogram bucket widths.
///
/// Non-positive (and NaN) input yields `0.0`.
pub fn closest_rounded_number_of_log10(value: f64) -> f64 {
    if value.is_nan() || value <= 0.0 {
        return 0.0;
    }
    let magnitude = 10f64.powf(value.log10().floor());
    for step in [1.0, 2.0, 5.0, 10.0] {
        let candidate = step * magnitude;
        if candidate >= value {
            return candidate;
        }
    }
    10.0 * magnitude
}

/// `part / (total + ε) × 100`. The epsilon keeps `0 / 0` at zero.
pub fn percentage(part: u64, total: u64) -> f64 {
    part as f64 / (total as f64 + f64::MIN_POSITIVE) * 100.0
}
