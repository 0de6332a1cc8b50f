//! # Particle Styles
//!
//! A particle style decides which optional per-particle arrays the store
//! carries. The physics behind each style lives elsewhere; here a style is
//! only a name and a [`FieldSet`].

use crate::arrays::{Field, FieldSet};

/// Capability declaring the optional arrays a particle model needs.
pub trait ParticleStyle: Send + Sync {
    /// Style name.
    fn name(&self) -> &str;

    /// Optional fields this style requires.
    fn fields(&self) -> FieldSet;
}

/// Point particles with no extra state.
#[derive(Clone, Copy, Debug, Default)]
pub struct Atomic;

impl ParticleStyle for Atomic {
    fn name(&self) -> &str {
        "atomic"
    }

    fn fields(&self) -> FieldSet {
        FieldSet::EMPTY
    }
}

/// Point charges.
#[derive(Clone, Copy, Debug, Default)]
pub struct Charge;

impl ParticleStyle for Charge {
    fn name(&self) -> &str {
        "charge"
    }

    fn fields(&self) -> FieldSet {
        FieldSet::EMPTY.with(Field::Charge)
    }
}

/// Finite-size spheres with rotational state.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sphere;

impl ParticleStyle for Sphere {
    fn name(&self) -> &str {
        "sphere"
    }

    fn fields(&self) -> FieldSet {
        [Field::Radius, Field::Mass, Field::Omega, Field::Torque]
            .into_iter()
            .collect()
    }
}

/// Bonded particles grouped into molecules.
#[derive(Clone, Copy, Debug, Default)]
pub struct Molecular;

impl ParticleStyle for Molecular {
    fn name(&self) -> &str {
        "molecular"
    }

    fn fields(&self) -> FieldSet {
        [Field::Charge, Field::Molecule].into_iter().collect()
    }
}

/// Charged point dipoles.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dipole;

impl ParticleStyle for Dipole {
    fn name(&self) -> &str {
        "dipole"
    }

    fn fields(&self) -> FieldSet {
        [Field::Charge, Field::Dipole].into_iter().collect()
    }
}

/// Aspherical particles with orientation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ellipsoid;

impl ParticleStyle for Ellipsoid {
    fn name(&self) -> &str {
        "ellipsoid"
    }

    fn fields(&self) -> FieldSet {
        [
            Field::Mass,
            Field::AngularMomentum,
            Field::Torque,
            Field::Quaternion,
        ]
        .into_iter()
        .collect()
    }
}

/// Smoothed-particle hydrodynamics.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sph;

impl ParticleStyle for Sph {
    fn name(&self) -> &str {
        "sph"
    }

    fn fields(&self) -> FieldSet {
        [Field::Mass, Field::Density, Field::Energy].into_iter().collect()
    }
}

/// Looks up a stock style by name.
#[must_use]
pub fn style_from_name(name: &str) -> Option<Box<dyn ParticleStyle>> {
    let style: Box<dyn ParticleStyle> = match name {
        "atomic" => Box::new(Atomic),
        "charge" => Box::new(Charge),
        "sphere" => Box::new(Sphere),
        "molecular" => Box::new(Molecular),
        "dipole" => Box::new(Dipole),
        "ellipsoid" => Box::new(Ellipsoid),
        "sph" => Box::new(Sph),
        _ => return None,
    };
    Some(style)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_lookup() {
        for name in ["atomic", "charge", "sphere", "molecular", "dipole", "ellipsoid", "sph"] {
            let style = style_from_name(name).unwrap();
            assert_eq!(style.name(), name);
        }
        assert!(style_from_name("granular").is_none());
    }

    #[test]
    fn test_style_fields() {
        assert!(Atomic.fields().is_empty());
        assert!(Sphere.fields().contains(Field::Radius));
        assert!(Dipole.fields().contains(Field::Dipole));
        assert_eq!(Sph.fields().len(), 3);
    }
}
