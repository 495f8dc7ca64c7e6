use std::f64::consts::{PI, TAU};

/// Wraps an angle in radians into the half-open interval `(-π, π]`.
pub fn wrap_phase(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let wrapped = angle - TAU * ((angle + PI) / TAU).floor();
    // `wrapped` lies in [-π, π); fold the lower edge onto +π.
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angles_inside_range_are_untouched() {
        assert!((wrap_phase(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_phase(-3.0) + 3.0).abs() < 1e-12);
    }

    #[test]
    fn angles_fold_across_the_boundary() {
        assert!((wrap_phase(PI + 0.1) - (-PI + 0.1)).abs() < 1e-12);
        assert!((wrap_phase(-PI - 0.1) - (PI - 0.1)).abs() < 1e-12);
        assert!((wrap_phase(5.0 * TAU + 1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn minus_pi_maps_to_plus_pi() {
        assert!((wrap_phase(-PI) - PI).abs() < 1e-12);
        assert!((wrap_phase(PI) - PI).abs() < 1e-12);
    }
}
