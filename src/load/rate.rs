// Open-loop arrival generation: exponentially distributed inter-arrival
// intervals targeting a configured rate, with an optional linear ramp.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use tokio::time::Instant;

/// Produces Poisson-arrival intervals for the scheduler.
///
/// With a ramp, the effective rate grows linearly from 0 to the target
/// over the ramp window; a small floor keeps the first intervals finite.
pub struct ArrivalGenerator {
    rate: f64,
    ramp: Duration,
    started: Instant,
    rng: StdRng,
}

impl ArrivalGenerator {
    pub fn new(rate: f64, ramp: Duration) -> ArrivalGenerator {
        ArrivalGenerator {
            rate,
            ramp,
            started: Instant::now(),
            rng: StdRng::from_entropy(),
        }
    }

    /// The rate currently in effect, honouring the ramp.
    pub fn effective_rate(&self) -> f64 {
        if self.ramp.is_zero() {
            return self.rate;
        }
        let elapsed = self.started.elapsed();
        if elapsed >= self.ramp {
            return self.rate;
        }
        let fraction = elapsed.as_secs_f64() / self.ramp.as_secs_f64();
        (self.rate * fraction).max(self.rate / 100.0)
    }

    /// Next inter-arrival delay, exponentially distributed around the
    /// effective rate.
    pub fn next_interval(&mut self) -> Duration {
        let exp = Exp::new(self.effective_rate()).expect("effective rate is positive");
        Duration::from_secs_f64(exp.sample(&mut self.rng))
    }
}

/// Pause between worker-start attempts when a pool comes up empty.
pub fn gracetime(rate: f64) -> Duration {
    Duration::from_secs_f64(1.0 / (5.0 * rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_interval_tracks_rate() {
        let mut gen = ArrivalGenerator::new(100.0, Duration::ZERO);
        let n = 20_000;
        let total: f64 = (0..n).map(|_| gen.next_interval().as_secs_f64()).sum();
        let mean = total / n as f64;
        // Expected mean 10ms; a 20k sample keeps the estimate tight.
        assert!(mean > 0.008 && mean < 0.012, "mean interval {}s", mean);
    }

    #[test]
    fn test_ramp_starts_slow() {
        let gen = ArrivalGenerator::new(50.0, Duration::from_secs(10));
        // Immediately after start, the effective rate sits near the floor.
        assert!(gen.effective_rate() < 5.0);
    }

    #[test]
    fn test_no_ramp_uses_target_rate() {
        let gen = ArrivalGenerator::new(50.0, Duration::ZERO);
        assert_eq!(gen.effective_rate(), 50.0);
    }

    #[test]
    fn test_gracetime_scales_inversely_with_rate() {
        assert_eq!(gracetime(50.0), Duration::from_secs_f64(0.004));
        assert!(gracetime(1.0) > gracetime(100.0));
    }
}
