//! Easing curves used to interpolate between profile samples.

use std::f64::consts::FRAC_PI_2;

/// Linearly maps `x` from `[in_min, in_max]` onto `[out_min, out_max]`.
///
/// No clamping is applied; values outside the input range extrapolate.
///
/// # Examples
///
/// ```
/// use prosumer_sim::sim::curve::remap;
///
/// assert_eq!(remap(5.0, 0.0, 10.0, 0.0, 100.0), 50.0);
/// assert_eq!(remap(0.0, 0.0, 1.0, 3.0, 7.0), 3.0);
/// ```
pub fn remap(x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Shape applied to a `[0, 1]` fraction before remapping it between two samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// No shaping.
    Linear,
    /// Quarter sine wave: steep start, flat finish.
    Sine,
    /// Mirror of [`Curve::Sine`]: `sine(1 - x)`.
    ISine,
}

impl Curve {
    /// Evaluates the curve at `x`.
    ///
    /// # Examples
    ///
    /// ```
    /// use prosumer_sim::sim::curve::Curve;
    ///
    /// assert_eq!(Curve::Sine.apply(0.0), 0.0);
    /// assert!((Curve::Sine.apply(1.0) - 1.0).abs() < 1e-12);
    /// assert_eq!(Curve::ISine.apply(0.25), Curve::Sine.apply(0.75));
    /// ```
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Curve::Linear => x,
            Curve::Sine => remap(x, 0.0, 1.0, 0.0, FRAC_PI_2).sin(),
            Curve::ISine => Curve::Sine.apply(1.0 - x),
        }
    }

    /// Picks the curve for a transition from `lower` to `upper`:
    /// [`Curve::Sine`] when rising, [`Curve::ISine`] otherwise.
    pub fn between(lower: f64, upper: f64) -> Self {
        if upper > lower {
            Curve::Sine
        } else {
            Curve::ISine
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn remap_hits_both_ends() {
        assert_eq!(remap(2.0, 2.0, 6.0, -1.0, 9.0), -1.0);
        assert!((remap(6.0, 2.0, 6.0, -1.0, 9.0) - 9.0).abs() < EPS);
    }

    #[test]
    fn remap_supports_inverted_output_range() {
        assert_eq!(remap(0.25, 0.0, 1.0, 8.0, 4.0), 7.0);
    }

    #[test]
    fn linear_is_identity() {
        for x in [0.0, 0.3, 0.5, 1.0] {
            assert_eq!(Curve::Linear.apply(x), x);
        }
    }

    #[test]
    fn sine_endpoints() {
        assert_eq!(Curve::Sine.apply(0.0), 0.0);
        assert!((Curve::Sine.apply(1.0) - 1.0).abs() < EPS);
    }

    #[test]
    fn sine_is_monotonic_on_unit_interval() {
        let mut prev = Curve::Sine.apply(0.0);
        for i in 1..=100 {
            let next = Curve::Sine.apply(i as f64 / 100.0);
            assert!(next >= prev, "sine decreased at step {i}");
            prev = next;
        }
    }

    #[test]
    fn isine_mirrors_sine() {
        for i in 0..=20 {
            let x = i as f64 / 20.0;
            assert_eq!(Curve::ISine.apply(x), Curve::Sine.apply(1.0 - x));
        }
    }

    #[test]
    fn between_selects_by_direction() {
        assert_eq!(Curve::between(1.0, 2.0), Curve::Sine);
        assert_eq!(Curve::between(2.0, 1.0), Curve::ISine);
        assert_eq!(Curve::between(1.5, 1.5), Curve::ISine);
    }
}
