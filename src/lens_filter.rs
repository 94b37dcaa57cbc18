// SPDX-License-Identifier: GPL-3.0-or-later

use serde::{ Serialize, Deserialize };

use crate::aperture::{ compose_aperture, ApertureDefinition, ApertureLayer };
use crate::convolution::ConvolutionEngine;
use crate::diffraction::DiffractionEngine;
use crate::error::{ DiffractionError, Result };
use crate::image::{ Image, ImageFormat };
use crate::pass::{ PassBlend, PassExecutor, KERNEL_RESAMPLE };

/// Render-quality tier. Each tier maps to a fixed (diffraction, convolution)
/// resolution pair; changing it tears down and rebuilds every sized resource.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Quality {
    Low,
    Medium,
    High,
    Optimal,
}

impl Quality {
    pub fn diffraction_resolution(self) -> usize {
        match self {
            Quality::Low     => 256,
            Quality::Medium  => 512,
            Quality::High    => 1024,
            Quality::Optimal => 2048,
        }
    }

    /// Twice the diffraction resolution: power-of-two, and large enough that
    /// zero-padded convolution of the staged filter never wraps around.
    pub fn convolution_resolution(self) -> usize {
        self.diffraction_resolution() * 2
    }
}

/// Owns one diffraction and one convolution engine sized to a quality tier and
/// feeds one into the other every frame.
pub struct LensFilter {
    quality: Quality,
    f_number: f32,
    definition: ApertureDefinition,

    // Some while the transmittance is layer-driven, None once a custom image was set
    layers: Option<Vec<ApertureLayer>>,
    aperture: Image,

    diffraction: DiffractionEngine,
    convolution: ConvolutionEngine,

    elapsed_s: f64,
}

impl LensFilter {
    pub fn new(quality: Quality, definition: ApertureDefinition) -> Result<Self> {
        definition.validate()?;
        let _time = std::time::Instant::now();

        let (diffraction, convolution) = Self::build_engines(quality)?;
        let layers = vec![ApertureLayer::Disk { radius: 0.9, softness: 0.01 }];
        let aperture = compose_aperture(quality.diffraction_resolution(), &layers)?;

        let mut filter = Self {
            quality,
            f_number: 1.0,
            definition,
            layers: Some(layers),
            aperture,
            diffraction,
            convolution,
            elapsed_s: 0.0,
        };
        filter.regenerate()?;
        log::debug!("Lens filter ready at {:?} in {:.3}ms", quality, _time.elapsed().as_micros() as f64 / 1000.0);
        Ok(filter)
    }

    fn build_engines(quality: Quality) -> Result<(DiffractionEngine, ConvolutionEngine)> {
        let d = quality.diffraction_resolution();
        Ok((DiffractionEngine::new(d, d)?, ConvolutionEngine::new(quality.convolution_resolution())?))
    }

    #[inline] pub fn quality(&self) -> Quality { self.quality }
    #[inline] pub fn f_number(&self) -> f32 { self.f_number }
    #[inline] pub fn aperture_definition(&self) -> &ApertureDefinition { &self.definition }
    #[inline] pub fn elapsed(&self) -> f64 { self.elapsed_s }

    /// The current normalized diffraction filter.
    pub fn filter(&self) -> &Image {
        self.diffraction.filter()
    }

    fn regenerate(&mut self) -> Result<()> {
        let _time = std::time::Instant::now();
        self.diffraction.diffract(&self.aperture, &self.definition, self.f_number)?;
        log::debug!("Regenerated diffraction filter in {:.3}ms", _time.elapsed().as_micros() as f64 / 1000.0);
        Ok(())
    }

    /// Rebuilds every sized resource for the new tier. Nothing is swapped in
    /// until the whole rebuild succeeded, so a failure leaves the old state intact.
    pub fn set_quality(&mut self, quality: Quality) -> Result<()> {
        if quality == self.quality {
            return Ok(());
        }
        let (mut diffraction, convolution) = Self::build_engines(quality)?;

        let d = quality.diffraction_resolution();
        let aperture = match &self.layers {
            Some(layers) => compose_aperture(d, layers)?,
            None => {
                let mut resized = Image::new(d, d, ImageFormat::R32f, false);
                PassExecutor::new().pass(KERNEL_RESAMPLE, (d, d), Some(&mut resized), &[&self.aperture], &[], None, None, PassBlend::Overwrite)?;
                resized
            }
        };
        diffraction.diffract(&aperture, &self.definition, self.f_number)?;

        self.quality = quality;
        self.aperture = aperture;
        self.diffraction = diffraction;
        self.convolution = convolution;
        Ok(())
    }

    /// Replaces the transmittance image and regenerates the filter.
    pub fn set_aperture(&mut self, image: Image) -> Result<()> {
        let d = self.quality.diffraction_resolution();
        if image.width() != d || image.height() != d {
            return Err(DiffractionError::Argument(format!("aperture is {}x{}, the {:?} tier expects {}x{}", image.width(), image.height(), self.quality, d, d)));
        }
        if image.format() != ImageFormat::R32f {
            return Err(DiffractionError::Argument("aperture transmittance must be a single-channel image".into()));
        }
        self.aperture = image;
        self.layers = None;
        self.regenerate()
    }

    /// Rebuilds the transmittance from a layer stack and regenerates the filter.
    pub fn set_aperture_layers(&mut self, layers: Vec<ApertureLayer>) -> Result<()> {
        self.aperture = compose_aperture(self.quality.diffraction_resolution(), &layers)?;
        self.layers = Some(layers);
        self.regenerate()
    }

    /// Replacing the definition regenerates the entire filter, which is why
    /// this is a command rather than a plain field write.
    pub fn set_aperture_definition(&mut self, definition: ApertureDefinition) -> Result<()> {
        definition.validate()?;
        self.definition = definition;
        self.regenerate()
    }

    pub fn set_f_number(&mut self, f_number: f32) -> Result<()> {
        if !(f_number > 0.0) {
            return Err(DiffractionError::Argument(format!("f-number must be positive, got {}", f_number)));
        }
        self.f_number = f_number;
        self.regenerate()
    }

    /// Per-frame entry point: accumulates elapsed time, recomputes the filter
    /// and convolves the frame with it.
    pub fn render(&mut self, dt: f64, frame: &Image, destination: &mut Image) -> Result<()> {
        self.elapsed_s += dt;
        self.diffraction.diffract(&self.aperture, &self.definition, self.f_number)?;
        self.convolution.convolve(frame, self.diffraction.filter(), destination, false)
    }

    /// Convolves a frame against the current filter without recomputing it.
    pub fn convolve(&mut self, frame: &Image, destination: &mut Image, apply_scale_correction: bool) -> Result<()> {
        self.convolution.convolve(frame, self.diffraction.filter(), destination, apply_scale_correction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Quality::Low     => (256,  512))]
    #[test_case(Quality::Medium  => (512,  1024))]
    #[test_case(Quality::High    => (1024, 2048))]
    #[test_case(Quality::Optimal => (2048, 4096))]
    fn tier_resolutions(quality: Quality) -> (usize, usize) {
        let d = quality.diffraction_resolution();
        let c = quality.convolution_resolution();
        assert!(c >= d);
        assert!(d.is_power_of_two() && c.is_power_of_two());
        (d, c)
    }

    #[test]
    fn invalid_definition_fails_construction() {
        let def = ApertureDefinition::new(Vec::new(), 1.0);
        assert!(LensFilter::new(Quality::Low, def).is_err());
    }

    #[test]
    fn render_produces_a_diffracted_frame() {
        let mut lens = LensFilter::new(Quality::Low, ApertureDefinition::default()).unwrap();
        assert_eq!(lens.filter().width(), 256);

        let mut frame = Image::new(32, 32, ImageFormat::Rgba32f, false);
        frame.set_texel(16, 16, [50.0, 50.0, 50.0, 1.0]);
        let mut dst = Image::new(32, 32, ImageFormat::Rgba32f, false);

        lens.render(1.0 / 60.0, &frame, &mut dst).unwrap();
        assert!((lens.elapsed() - 1.0 / 60.0).abs() < 1e-9);

        // The bright pixel bleeds energy into its surroundings
        let center = dst.texel(16, 16, [0.0; 4]);
        let neighbor = dst.texel(20, 16, [0.0; 4]);
        assert!(center[1] > 0.0);
        assert!(neighbor[1] > 0.0);
        assert!(center[1] > neighbor[1]);
        assert!(dst.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn quality_change_rebuilds_all_sized_resources() {
        let mut lens = LensFilter::new(Quality::Low, ApertureDefinition::default()).unwrap();
        lens.set_quality(Quality::Medium).unwrap();
        assert_eq!(lens.quality(), Quality::Medium);
        assert_eq!(lens.filter().width(), 512);
        assert_eq!(lens.filter().height(), 512);
    }

    #[test]
    fn custom_aperture_must_match_the_tier_resolution() {
        let mut lens = LensFilter::new(Quality::Low, ApertureDefinition::default()).unwrap();
        let wrong = Image::new(64, 64, ImageFormat::R32f, false);
        assert!(matches!(lens.set_aperture(wrong), Err(DiffractionError::Argument(_))));
    }
}
