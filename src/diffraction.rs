// SPDX-License-Identifier: GPL-3.0-or-later

use crate::aperture::{ ApertureDefinition, REFERENCE_WAVELENGTH };
use crate::error::{ DiffractionError, Result };
use crate::fft::{ attach_fresh_buffers, FftEngine };
use crate::image::{ Image, ImageFormat };
use crate::pass::*;

/// Guards the normalization division against landing exactly on the saturation boundary.
const NORMALIZATION_EPSILON: f32 = 1e-8;

/// Turns an aperture transmittance image into a normalized RGB filter:
/// the aperture's power spectrum, accumulated over the spectral terms and
/// scaled so it integrates to unity per contributed channel.
pub struct DiffractionEngine {
    width: usize,
    height: usize,

    executor: PassExecutor,
    fft: FftEngine,

    working: Vec<f32>,   // 2*W*H interleaved complex
    transform: Image,    // single-channel power spectrum, DC at center
    spectrum: Image,     // accumulated RGB spectrum, mip-enabled
    filter: Image,       // normalized output
}

impl DiffractionEngine {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        let _time = std::time::Instant::now();

        let mut fft = FftEngine::new(width, height)?;
        attach_fresh_buffers(&mut fft)?;
        fft.set_forward_scale(1.0 / (width * height) as f32);

        let engine = Self {
            width, height,
            executor: PassExecutor::new(),
            fft,
            working: vec![0.0; 2 * width * height],
            transform: Image::new(width, height, ImageFormat::R32f, false),
            spectrum: Image::new(width, height, ImageFormat::Rgba32f, true),
            filter: Image::new(width, height, ImageFormat::Rgba32f, false),
        };
        log::debug!("Diffraction engine {}x{} ready in {:.3}ms", width, height, _time.elapsed().as_micros() as f64 / 1000.0);
        Ok(engine)
    }

    #[inline] pub fn width(&self)  -> usize { self.width }
    #[inline] pub fn height(&self) -> usize { self.height }

    /// The most recently computed filter.
    pub fn filter(&self) -> &Image {
        &self.filter
    }

    pub fn diffract(&mut self, aperture: &Image, definition: &ApertureDefinition, f_number: f32) -> Result<&Image> {
        if aperture.width() != self.width || aperture.height() != self.height {
            return Err(DiffractionError::Argument(format!("aperture is {}x{}, engine expects {}x{}", aperture.width(), aperture.height(), self.width, self.height)));
        }
        if aperture.format() != ImageFormat::R32f {
            return Err(DiffractionError::Argument("aperture transmittance must be a single-channel image".into()));
        }
        if !(f_number > 0.0) {
            return Err(DiffractionError::Argument(format!("f-number must be positive, got {}", f_number)));
        }
        definition.validate()?;

        let dims = (self.width, self.height);
        let n = (self.width * self.height) as f32;

        // Aperture into the complex working buffer, zero imaginary part
        self.executor.pass(KERNEL_TRANSCODE_COMPLEX, dims, None, &[aperture], &[], Some(&mut self.working),
            Some(PassParams { channel: 0, ..Default::default() }), PassBlend::Overwrite)?;

        // Forward transform with the 1/(W*H) convention folded into the scale
        self.fft.forward(&mut self.working)?;

        // Power spectrum, recentered so DC sits at the image center
        self.executor.pass(KERNEL_POWER_SPECTRUM, dims, Some(&mut self.transform), &[], &[&self.working], None,
            None, PassBlend::Overwrite)?;

        // Wavelength-weighted accumulation across the spectral terms
        self.spectrum.clear();
        for term in &definition.terms {
            let scale = REFERENCE_WAVELENGTH / (term.wavelength * definition.observation_distance * f_number);
            let params = PassParams {
                scale,
                weight: [term.rgb.x, term.rgb.y, term.rgb.z, 0.0],
                ..Default::default()
            };
            self.executor.pass(KERNEL_SPECTRAL_ACCUM, dims, Some(&mut self.spectrum), &[&self.transform], &[], None,
                Some(params), PassBlend::Additive)?;
        }

        // Mip reduction gives the whole-image average; dividing by average*W*H
        // makes each contributed channel integrate to one.
        self.spectrum.generate_mips()?;
        let avg = self.spectrum.coarsest_mip().unwrap_or_default();
        let mut recip = [0.0f32; 4];
        for c in 0..3 {
            if avg[c] == 0.0 {
                // Channel carries no energy at all, nothing to normalize
                log::warn!("diffraction spectrum channel {} is completely dark, filter channel stays zero", c);
            } else {
                if avg[c] <= NORMALIZATION_EPSILON {
                    log::warn!("diffraction spectrum channel {} average {} is degenerate, normalization may saturate", c, avg[c]);
                }
                recip[c] = 1.0 / (avg[c] * n);
            }
        }
        self.executor.pass(KERNEL_SCALE_CHANNELS, dims, Some(&mut self.filter), &[&self.spectrum], &[], None,
            Some(PassParams { scale: NORMALIZATION_EPSILON, weight: recip, ..Default::default() }), PassBlend::Overwrite)?;

        Ok(&self.filter)
    }
}
