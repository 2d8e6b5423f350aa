use rand::Rng;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Synthesizes plausible power-consumption readings: a meter-specific
/// base load, a sinusoidal daily cycle, and bounded uniform noise.
#[derive(Debug, Clone, Copy)]
pub struct PowerProfile {
    pub base_load_watts: f64,
    pub variance_watts: f64,
    pub periodic_amplitude_watts: f64,
}

impl PowerProfile {
    pub fn sample<R: Rng>(&self, rng: &mut R, unix_seconds: f64) -> f64 {
        let day_fraction = (unix_seconds.rem_euclid(SECONDS_PER_DAY)) / SECONDS_PER_DAY;
        let periodic =
            self.periodic_amplitude_watts * (2.0 * std::f64::consts::PI * day_fraction).sin();
        let noise = rng.gen_range(-self.variance_watts..=self.variance_watts);
        // A meter never reports negative consumption.
        (self.base_load_watts + periodic + noise).max(0.0)
    }
}
