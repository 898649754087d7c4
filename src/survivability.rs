//! Crew survivability: a score in (0, 1] that flight intensity can only wear down.

use log::info;

use crate::config::SurvivabilityConfig;

pub struct SurvivabilityScorer {
    config: SurvivabilityConfig,
    crew_survivability: f64,
    active: bool,
}

impl SurvivabilityScorer {
    pub fn new(config: &SurvivabilityConfig) -> Self {
        SurvivabilityScorer {
            config: config.clone(),
            crew_survivability: 1.0,
            active: false,
        }
    }

    pub fn crew_survivability(&self) -> f64 {
        self.crew_survivability
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Starts scoring. Called once the motor burns out.
    pub fn start(&mut self) {
        self.active = true;
    }

    /// Scores one tick. `pitch` is in radians; missing readings contribute nothing.
    pub fn update(
        &mut self,
        vertical_acceleration: f64,
        angular_rate_y: Option<f64>,
        pitch: Option<f64>,
    ) {
        if !self.active {
            return;
        }
        let c = &self.config;
        let intensity = (vertical_acceleration.abs() * c.accel_weight
            + angular_rate_y.map_or(0.0, f64::abs) * c.gyro_weight
            + pitch.map_or(0.0, |p| (p / 2.0).sin()) * c.pitch_weight)
            / c.intensity_scale;

        if intensity.is_finite() && intensity > c.intensity_threshold {
            let intensity = intensity.min(c.max_intensity);
            self.crew_survivability *= 1.0 - intensity / 100.0;
        }
    }

    /// Stops scoring and applies the landing penalty. Only the first call has any effect.
    pub fn stop(&mut self, landing_velocity: f64) {
        if !self.active {
            return;
        }
        self.active = false;
        if landing_velocity < self.config.landing_velocity_threshold_meters_per_second {
            info!(
                "Hard landing at {:.2} m/s, applying survivability penalty",
                landing_velocity
            );
            self.crew_survivability *= self.config.landing_penalty_factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scorer() -> SurvivabilityScorer {
        SurvivabilityScorer::new(&SurvivabilityConfig::default())
    }

    #[test]
    fn inactive_scorer_ignores_intensity() {
        let mut scorer = scorer();
        scorer.update(200.0, Some(10.0), Some(1.0));
        assert_eq!(scorer.crew_survivability(), 1.0);
    }

    #[test]
    fn calm_flight_keeps_full_score() {
        let mut scorer = scorer();
        scorer.start();
        for _ in 0..100 {
            // Free fall: about -g of vertical acceleration and no spin.
            scorer.update(-9.8, Some(0.0), Some(0.0));
        }
        assert_eq!(scorer.crew_survivability(), 1.0);
    }

    #[test]
    fn intense_flight_decays_monotonically() {
        let mut scorer = scorer();
        scorer.start();
        let mut previous = scorer.crew_survivability();
        for i in 0..200 {
            scorer.update(60.0 + i as f64, Some(3.0), Some(0.4));
            let current = scorer.crew_survivability();
            assert!(current <= previous);
            assert!(current > 0.0);
            previous = current;
        }
        assert!(previous < 1.0);
    }

    #[test]
    fn one_tick_is_capped() {
        let mut scorer = scorer();
        scorer.start();
        scorer.update(1.0e9, None, None);
        assert_relative_eq!(
            scorer.crew_survivability(),
            1.0 - SurvivabilityConfig::default().max_intensity / 100.0
        );
    }

    #[test]
    fn hard_landing_penalty_applies_once() {
        let mut scorer = scorer();
        scorer.start();
        scorer.stop(-20.0);
        assert_relative_eq!(scorer.crew_survivability(), 0.5);
        assert!(!scorer.is_active());

        scorer.stop(-20.0);
        assert_relative_eq!(scorer.crew_survivability(), 0.5);
    }

    #[test]
    fn soft_landing_has_no_penalty() {
        let mut scorer = scorer();
        scorer.start();
        scorer.stop(-3.0);
        assert_eq!(scorer.crew_survivability(), 1.0);
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut scorer = scorer();
        scorer.stop(-50.0);
        assert_eq!(scorer.crew_survivability(), 1.0);
    }
}
