//! Auto-drift: per-cycle linear glide of parameters toward their targets

use super::params::ChannelParams;

/// Cycles a full glide takes
pub const DRIFT_ITERATIONS: u32 = 12;

#[derive(Debug, Clone, PartialEq)]
struct Glide {
    name: &'static str,
    start: f32,
    target: f32,
    step: u32,
}

#[derive(Debug, Default)]
pub struct AutoDrift {
    glides: Vec<Glide>,
}

impl AutoDrift {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance every active glide by one cycle
    ///
    /// Returns the `(parameter, value)` writes to apply. A changed target
    /// restarts that glide from the parameter's current value.
    pub fn step(&mut self, params: &ChannelParams) -> Vec<(&'static str, f32)> {
        if !params.auto_drift {
            self.glides.clear();
            return Vec::new();
        }

        self.glides
            .retain(|g| params.drift.iter().any(|(name, _)| name == g.name));

        for (name, target) in params.drift.iter() {
            let current = params.get_named(name).unwrap_or(target);
            match self.glides.iter_mut().find(|g| g.name == name) {
                Some(glide) if glide.target == target => {}
                Some(glide) => {
                    *glide = Glide {
                        name,
                        start: current,
                        target,
                        step: 0,
                    }
                }
                None => self.glides.push(Glide {
                    name,
                    start: current,
                    target,
                    step: 0,
                }),
            }
        }

        let mut writes = Vec::new();
        for glide in self.glides.iter_mut().filter(|g| g.step < DRIFT_ITERATIONS) {
            glide.step += 1;
            let t = glide.step as f32 / DRIFT_ITERATIONS as f32;
            writes.push((glide.name, glide.start + (glide.target - glide.start) * t));
        }
        writes
    }

    /// Whether any glide still has steps left
    pub fn is_active(&self) -> bool {
        self.glides.iter().any(|g| g.step < DRIFT_ITERATIONS)
    }

    pub fn reset(&mut self) {
        self.glides.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::params::DriftTargets;
    use approx::assert_relative_eq;

    fn drifting(entropy: f32, target: f32) -> ChannelParams {
        ChannelParams {
            entropy,
            auto_drift: true,
            drift: DriftTargets {
                entropy: Some(target),
                ..DriftTargets::default()
            },
            ..ChannelParams::default()
        }
    }

    #[test]
    fn test_reaches_target_in_budget() {
        let mut drift = AutoDrift::new();
        let mut params = drifting(0.0, 0.6);
        for i in 1..=DRIFT_ITERATIONS {
            let writes = drift.step(&params);
            assert_eq!(writes.len(), 1);
            params.set_named(writes[0].0, writes[0].1).unwrap();
            assert_relative_eq!(params.entropy, 0.6 * i as f32 / 12.0, epsilon = 1e-6);
        }
        assert_relative_eq!(params.entropy, 0.6, epsilon = 1e-6);
        assert!(!drift.is_active());
        assert!(drift.step(&params).is_empty());
    }

    #[test]
    fn test_target_change_restarts() {
        let mut drift = AutoDrift::new();
        let mut params = drifting(0.0, 1.0);
        for _ in 0..6 {
            let writes = drift.step(&params);
            params.set_named(writes[0].0, writes[0].1).unwrap();
        }
        assert_relative_eq!(params.entropy, 0.5, epsilon = 1e-6);

        params.drift.entropy = Some(0.0);
        let writes = drift.step(&params);
        assert_relative_eq!(writes[0].1, 0.5 - 0.5 / 12.0, epsilon = 1e-6);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let mut drift = AutoDrift::new();
        let mut params = drifting(0.0, 1.0);
        params.auto_drift = false;
        assert!(drift.step(&params).is_empty());
        assert!(!drift.is_active());
    }
}
