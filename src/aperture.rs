// SPDX-License-Identifier: GPL-3.0-or-later

use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{ Serialize, Deserialize };

use crate::error::{ DiffractionError, Result };
use crate::image::{ Image, ImageFormat };

/// Base wavelength of the spectral sweep, in nanometres. By convention the
/// shortest wavelength of a definition, so every term resamples an
/// equal-or-smaller extent of the reference power spectrum.
pub const REFERENCE_WAVELENGTH: f32 = 450.0;

/// One (wavelength, color weight) sample of the approximated spectrum.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct SpectralTerm {
    pub wavelength: f32,
    pub rgb: Vector3<f32>,
}

impl SpectralTerm {
    pub fn new(wavelength: f32, r: f32, g: f32, b: f32) -> Self {
        Self { wavelength, rgb: Vector3::new(r, g, b) }
    }
}

/// Immutable-by-value aperture description: replacing it regenerates the
/// entire diffraction filter.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ApertureDefinition {
    pub terms: Vec<SpectralTerm>,
    pub observation_distance: f32,
}

impl ApertureDefinition {
    pub fn new(terms: Vec<SpectralTerm>, observation_distance: f32) -> Self {
        Self { terms, observation_distance }
    }

    pub fn validate(&self) -> Result<()> {
        if self.terms.is_empty() {
            return Err(DiffractionError::Argument("aperture definition has no spectral terms".into()));
        }
        if !(self.observation_distance > 0.0) {
            return Err(DiffractionError::Argument(format!("observation distance must be positive, got {}", self.observation_distance)));
        }
        for term in &self.terms {
            if !(term.wavelength > 0.0) {
                return Err(DiffractionError::Argument(format!("wavelength must be positive, got {}", term.wavelength)));
            }
            if term.rgb.iter().any(|v| *v < 0.0 || !v.is_finite()) {
                return Err(DiffractionError::Argument(format!("color weight must be non-negative, got {:?}", term.rgb)));
            }
        }
        Ok(())
    }
}

impl Default for ApertureDefinition {
    fn default() -> Self {
        // Coarse visible-spectrum sweep, 450-650nm, all three channels covered
        Self {
            terms: vec![
                SpectralTerm::new(450.0, 0.00, 0.10, 1.00),
                SpectralTerm::new(475.0, 0.00, 0.30, 0.80),
                SpectralTerm::new(500.0, 0.00, 0.60, 0.40),
                SpectralTerm::new(525.0, 0.10, 0.90, 0.10),
                SpectralTerm::new(550.0, 0.30, 1.00, 0.00),
                SpectralTerm::new(575.0, 0.60, 0.70, 0.00),
                SpectralTerm::new(600.0, 0.90, 0.30, 0.00),
                SpectralTerm::new(625.0, 1.00, 0.10, 0.00),
                SpectralTerm::new(650.0, 0.80, 0.00, 0.00),
            ],
            observation_distance: 1.0,
        }
    }
}

#[inline]
fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    if e1 <= e0 {
        return if x < e0 { 0.0 } else { 1.0 };
    }
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// One element of an aperture transmittance stack. Layers blend
/// multiplicatively, so composition order does not matter.
///
/// Coordinates are normalized to [-1, 1] across the image, radii are in the
/// same units.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum ApertureLayer {
    /// Circular opening
    Disk { radius: f32, softness: f32 },
    /// Regular bladed iris polygon
    Iris { blades: u32, radius: f32, rotation: f32, softness: f32 },
    /// Central blocker (secondary mirror, sensor stack shadow)
    Obstruction { radius: f32, softness: f32 },
    /// Seeded random dark specks
    Dust { count: u32, size: f32, seed: u64 },
}

impl ApertureLayer {
    /// Multiplies this layer's transmittance onto `image`.
    pub fn apply_layer(&self, image: &mut Image) -> Result<()> {
        if image.format() != ImageFormat::R32f {
            return Err(DiffractionError::Argument("aperture layers compose onto single-channel images".into()));
        }
        let (w, h) = (image.width(), image.height());

        // Dust speck positions are fixed up front so the per-pixel loop stays pure
        let specks: Vec<(f32, f32, f32)> = match *self {
            ApertureLayer::Dust { count, size, seed } => {
                let mut rng = fastrand::Rng::with_seed(seed);
                (0..count).map(|_| {
                    (rng.f32() * 2.0 - 1.0, rng.f32() * 2.0 - 1.0, size * (0.5 + rng.f32() * 0.5))
                }).collect()
            }
            _ => Vec::new(),
        };

        let layer = *self;
        image.data.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / h as f32 * 2.0 - 1.0;
            for (x, px) in row.iter_mut().enumerate() {
                let u = (x as f32 + 0.5) / w as f32 * 2.0 - 1.0;
                let t = match layer {
                    ApertureLayer::Disk { radius, softness } => {
                        1.0 - smoothstep(radius - softness, radius + softness, (u * u + v * v).sqrt())
                    }
                    ApertureLayer::Iris { blades, radius, rotation, softness } => {
                        let blades = blades.max(3) as f32;
                        let sector = std::f32::consts::TAU / blades;
                        let theta = v.atan2(u) - rotation;
                        let local = theta.rem_euclid(sector) - sector * 0.5;
                        // Distance along the blade normal
                        let d = (u * u + v * v).sqrt() * local.cos();
                        let edge = radius * (sector * 0.5).cos();
                        1.0 - smoothstep(edge - softness, edge + softness, d)
                    }
                    ApertureLayer::Obstruction { radius, softness } => {
                        smoothstep(radius - softness, radius + softness, (u * u + v * v).sqrt())
                    }
                    ApertureLayer::Dust { .. } => {
                        let mut t = 1.0;
                        for &(sx, sy, sr) in &specks {
                            let d = ((u - sx).powi(2) + (v - sy).powi(2)).sqrt();
                            t *= 1.0 - 0.85 * (1.0 - smoothstep(0.0, sr, d));
                        }
                        t
                    }
                };
                *px *= t;
            }
        });
        Ok(())
    }
}

/// Builds a transmittance image from an all-pass base and a layer stack.
pub fn compose_aperture(size: usize, layers: &[ApertureLayer]) -> Result<Image> {
    let mut image = Image::new(size, size, ImageFormat::R32f, false);
    image.fill(1.0);
    for layer in layers {
        layer.apply_layer(&mut image)?;
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_validation() {
        assert!(ApertureDefinition::default().validate().is_ok());
        assert!(ApertureDefinition::new(Vec::new(), 1.0).validate().is_err());
        assert!(ApertureDefinition::new(vec![SpectralTerm::new(-1.0, 0.0, 1.0, 0.0)], 1.0).validate().is_err());
        assert!(ApertureDefinition::new(vec![SpectralTerm::new(550.0, 0.0, -0.5, 0.0)], 1.0).validate().is_err());
        assert!(ApertureDefinition::new(vec![SpectralTerm::new(550.0, 0.0, 1.0, 0.0)], 0.0).validate().is_err());
    }

    #[test]
    fn reference_wavelength_is_the_shortest_default_term() {
        let def = ApertureDefinition::default();
        let min = def.terms.iter().map(|t| t.wavelength).fold(f32::INFINITY, f32::min);
        assert_eq!(min, REFERENCE_WAVELENGTH);
    }

    #[test]
    fn disk_passes_center_and_blocks_corners() {
        let img = compose_aperture(64, &[ApertureLayer::Disk { radius: 0.5, softness: 0.02 }]).unwrap();
        assert!((img.texel(32, 32, [0.0; 4])[0] - 1.0).abs() < 1e-6);
        assert!(img.texel(0, 0, [0.0; 4])[0] < 1e-6);
    }

    #[test]
    fn obstruction_blocks_center() {
        let img = compose_aperture(64, &[
            ApertureLayer::Disk { radius: 0.8, softness: 0.02 },
            ApertureLayer::Obstruction { radius: 0.2, softness: 0.02 },
        ]).unwrap();
        assert!(img.texel(32, 32, [0.0; 4])[0] < 1e-6);
        assert!((img.texel(48, 32, [0.0; 4])[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn layer_composition_is_order_independent() {
        let layers_a = [
            ApertureLayer::Iris { blades: 6, radius: 0.7, rotation: 0.3, softness: 0.01 },
            ApertureLayer::Obstruction { radius: 0.15, softness: 0.01 },
            ApertureLayer::Dust { count: 12, size: 0.08, seed: 42 },
        ];
        let layers_b = [layers_a[2], layers_a[0], layers_a[1]];

        let a = compose_aperture(32, &layers_a).unwrap();
        let b = compose_aperture(32, &layers_b).unwrap();
        for (va, vb) in a.data.iter().zip(b.data.iter()) {
            assert!((va - vb).abs() < 1e-6);
        }
    }

    #[test]
    fn definition_round_trips_through_serde() {
        let def = ApertureDefinition::default();
        let json = serde_json::to_string(&def).unwrap();
        let back: ApertureDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(def, back);
    }
}
