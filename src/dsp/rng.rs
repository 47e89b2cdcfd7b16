//! Deterministic, allocation-free noise source
//!
//! xorshift64* for uniform draws plus Box-Muller for Gaussian ones. Safe to use
//! on the render thread: no allocation, no locking, no syscalls.

/// Small PRNG used for noise injection, granular masks and perturbation
#[derive(Debug, Clone)]
pub struct NoiseRng {
    state: u64,
    spare: Option<f32>,
}

impl NoiseRng {
    /// Create a generator from a seed (0 is remapped, xorshift has no zero state)
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
            spare: None,
        }
    }

    /// Seed from the wall clock; only for the async side
    pub fn from_entropy() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x2545_F491_4F6C_DD1D);
        Self::new(nanos ^ 0xD1B5_4A32_D192_ED03)
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in [0, 1)
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform in [-1, 1)
    #[inline]
    pub fn bipolar(&mut self) -> f32 {
        self.next_f32() * 2.0 - 1.0
    }

    /// Standard normal draw (mean 0, variance 1)
    pub fn gaussian(&mut self) -> f32 {
        if let Some(spare) = self.spare.take() {
            return spare;
        }
        let u1 = self.next_f32().max(f32::MIN_POSITIVE);
        let u2 = self.next_f32();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = std::f32::consts::TAU * u2;
        self.spare = Some(radius * angle.sin());
        radius * angle.cos()
    }
}

impl Default for NoiseRng {
    fn default() -> Self {
        Self::new(0x5EED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = NoiseRng::new(42);
        let mut b = NoiseRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_zero_seed_is_usable() {
        let mut rng = NoiseRng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn test_uniform_range() {
        let mut rng = NoiseRng::new(7);
        for _ in 0..10_000 {
            let u = rng.next_f32();
            assert!((0.0..1.0).contains(&u));
            let b = rng.bipolar();
            assert!((-1.0..1.0).contains(&b));
        }
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = NoiseRng::new(1234);
        let n = 50_000;
        let draws: Vec<f32> = (0..n).map(|_| rng.gaussian()).collect();
        let mean = draws.iter().sum::<f32>() / n as f32;
        let var = draws.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n as f32;
        assert!(mean.abs() < 0.03, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.05, "variance {}", var);
        assert!(draws.iter().all(|x| x.is_finite()));
    }
}
