//! Ready-made item-type catalogs: named kinds with radial interaction kernels.
//!
//! The core only sees the [`ItemType`] trait; this crate supplies a concrete,
//! serde-friendly catalog entry for worlds that do not need bespoke energy
//! functions.

use patchworld_core::ItemType;
use serde::{Deserialize, Serialize};

/// Shape of the pairwise coupling between two kinds, evaluated on the
/// Chebyshev distance between their cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Kernel {
    /// Constant energy anywhere within `radius`. Positive energies repel,
    /// negative attract.
    Plateau { radius: u32, energy: f64 },
    /// Energy fading linearly from `peak` at distance zero to zero just past
    /// `radius`.
    Ramp { radius: u32, peak: f64 },
}

impl Kernel {
    #[must_use]
    pub const fn radius(self) -> u32 {
        match self {
            Self::Plateau { radius, .. } | Self::Ramp { radius, .. } => radius,
        }
    }

    #[must_use]
    pub fn energy(self, dx: i64, dy: i64) -> f64 {
        let distance = dx.abs().max(dy.abs());
        if distance > i64::from(self.radius()) {
            return 0.0;
        }
        match self {
            Self::Plateau { energy, .. } => energy,
            Self::Ramp { radius, peak } => {
                peak * (1.0 - distance as f64 / (f64::from(radius) + 1.0))
            }
        }
    }
}

/// One catalog entry: a named kind, its placement intensity, and its
/// couplings with other kinds (looked up by name).
///
/// The sampler consults couplings directionally; declare a coupling on both
/// partners (or on a kind with itself) to keep the field symmetric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kind {
    name: String,
    intensity: f64,
    couplings: Vec<(String, Kernel)>,
}

impl Kind {
    #[must_use]
    pub fn new(name: impl Into<String>, intensity: f64) -> Self {
        Self {
            name: name.into(),
            intensity,
            couplings: Vec::new(),
        }
    }

    /// Adds or replaces the coupling consulted when an item of this kind is
    /// placed near an item of `other`.
    #[must_use]
    pub fn with_coupling(mut self, other: impl Into<String>, kernel: Kernel) -> Self {
        let other = other.into();
        if let Some(slot) = self
            .couplings
            .iter_mut()
            .find(|(name, _)| *name == other)
        {
            slot.1 = kernel;
        } else {
            self.couplings.push((other, kernel));
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn coupling_with(&self, other: &str) -> Option<Kernel> {
        self.couplings
            .iter()
            .find(|(name, _)| name == other)
            .map(|(_, kernel)| *kernel)
    }
}

impl ItemType for Kind {
    fn intensity(&self) -> f64 {
        self.intensity
    }

    fn interaction_radius(&self, other: &Self) -> u32 {
        self.coupling_with(&other.name).map_or(0, Kernel::radius)
    }

    fn interaction_energy(&self, other: &Self, dx: i64, dy: i64) -> f64 {
        self.coupling_with(&other.name)
            .map_or(0.0, |kernel| kernel.energy(dx, dy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_vanish_past_their_radius() {
        let plateau = Kernel::Plateau {
            radius: 2,
            energy: 3.0,
        };
        assert_eq!(plateau.energy(0, 0), 3.0);
        assert_eq!(plateau.energy(2, -2), 3.0);
        assert_eq!(plateau.energy(3, 0), 0.0);
        assert_eq!(plateau.energy(0, -3), 0.0);

        let ramp = Kernel::Ramp {
            radius: 2,
            peak: 3.0,
        };
        assert_eq!(ramp.energy(0, 0), 3.0);
        assert!(ramp.energy(1, 0) > ramp.energy(2, 0));
        assert!(ramp.energy(2, 2) > 0.0);
        assert_eq!(ramp.energy(0, 3), 0.0);
    }

    #[test]
    fn couplings_resolve_by_name() {
        let rock = Kind::new("rock", 0.5).with_coupling(
            "rock",
            Kernel::Plateau {
                radius: 1,
                energy: 2.0,
            },
        );
        let moss = Kind::new("moss", 0.25);

        assert_eq!(rock.interaction_radius(&rock), 1);
        assert_eq!(rock.interaction_energy(&rock, 1, 0), 2.0);
        assert_eq!(rock.interaction_radius(&moss), 0);
        assert_eq!(rock.interaction_energy(&moss, 0, 0), 0.0);
    }

    #[test]
    fn replacing_a_coupling_keeps_one_entry() {
        let kind = Kind::new("fern", 1.0)
            .with_coupling(
                "fern",
                Kernel::Plateau {
                    radius: 1,
                    energy: 1.0,
                },
            )
            .with_coupling(
                "fern",
                Kernel::Ramp {
                    radius: 2,
                    peak: -0.5,
                },
            );
        assert_eq!(kind.couplings.len(), 1);
        assert_eq!(kind.interaction_radius(&kind), 2);
    }
}
