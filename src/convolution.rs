// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{ DiffractionError, Result };
use crate::fft::{ attach_fresh_buffers, FftEngine };
use crate::image::{ Image, ImageFormat };
use crate::pass::*;

/// Convolves a live frame with the diffraction filter, channel by channel,
/// through zero-padded frequency-domain multiplication.
///
/// The convolution resolution must cover filter + frame - 1 so the circular
/// convolution never wraps around into visible pixels.
pub struct ConvolutionEngine {
    resolution: usize,

    executor: PassExecutor,
    fft: FftEngine,

    left: Vec<f32>,
    right: Vec<f32>,
    temp: Vec<f32>,

    channels: [Image; 3],  // convolved R, G, B
    staging: Image,        // half-resolution filter staging
}

impl ConvolutionEngine {
    pub fn new(resolution: usize) -> Result<Self> {
        let _time = std::time::Instant::now();

        let mut fft = FftEngine::new(resolution, resolution)?;
        attach_fresh_buffers(&mut fft)?;
        fft.set_inverse_scale(1.0 / (resolution * resolution) as f32);

        let n = 2 * resolution * resolution;
        let engine = Self {
            resolution,
            executor: PassExecutor::new(),
            fft,
            left: vec![0.0; n],
            right: vec![0.0; n],
            temp: vec![0.0; n],
            channels: [
                Image::new(resolution, resolution, ImageFormat::R32f, false),
                Image::new(resolution, resolution, ImageFormat::R32f, false),
                Image::new(resolution, resolution, ImageFormat::R32f, false),
            ],
            staging: Image::new(resolution / 2, resolution / 2, ImageFormat::Rgba32f, false),
        };
        log::debug!("Convolution engine {}x{} ready in {:.3}ms", resolution, resolution, _time.elapsed().as_micros() as f64 / 1000.0);
        Ok(engine)
    }

    #[inline] pub fn resolution(&self) -> usize { self.resolution }

    pub fn convolve(&mut self, frame: &Image, filter: &Image, destination: &mut Image, apply_scale_correction: bool) -> Result<()> {
        if frame.format() != ImageFormat::Rgba32f || filter.format() != ImageFormat::Rgba32f || destination.format() != ImageFormat::Rgba32f {
            return Err(DiffractionError::Argument("convolution frames, filters and destinations are RGBA float images".into()));
        }
        let staging_size = self.resolution / 2;
        if frame.width() + staging_size > self.resolution + 1 || frame.height() + staging_size > self.resolution + 1 {
            return Err(DiffractionError::Argument(format!(
                "frame {}x{} plus filter staging {} exceeds the convolution resolution {}",
                frame.width(), frame.height(), staging_size, self.resolution)));
        }

        // Filter into the half-resolution staging image
        self.executor.pass(KERNEL_RESAMPLE, (staging_size, staging_size), Some(&mut self.staging), &[filter], &[], None,
            None, PassBlend::Overwrite)?;

        for channel in 0..3u32 {
            self.convolve_channel(frame, channel)?;
        }

        // One pass samples all three convolved channels into the destination,
        // shifted back by the filter's center reference. Scale correction
        // accumulates on top of what the destination already holds.
        let params = PassParams {
            src_width: frame.width() as u32,
            src_height: frame.height() as u32,
            offset: [(self.resolution / 4) as f32, (self.resolution / 4) as f32],
            ..Default::default()
        };
        let blend = if apply_scale_correction { PassBlend::Additive } else { PassBlend::Overwrite };
        let inputs = [&self.channels[0], &self.channels[1], &self.channels[2]];
        self.executor.pass(KERNEL_COMPOSITE_RGB, (destination.width(), destination.height()), Some(destination), &inputs, &[], None,
            Some(params), blend)?;
        Ok(())
    }

    fn convolve_channel(&mut self, frame: &Image, channel: u32) -> Result<()> {
        let dims = (self.resolution, self.resolution);

        // Zero-pad both signals into the corner of the convolution resolution.
        // The padding corners must match or the result is spatially misaligned.
        self.executor.pass(KERNEL_TRANSCODE_COMPLEX, dims, None, &[frame], &[], Some(&mut self.left),
            Some(PassParams { channel, ..Default::default() }), PassBlend::Overwrite)?;
        self.executor.pass(KERNEL_TRANSCODE_COMPLEX, dims, None, &[&self.staging], &[], Some(&mut self.right),
            Some(PassParams { channel, ..Default::default() }), PassBlend::Overwrite)?;

        // Two forward transforms; the second reuses `left` as its destination
        self.fft.forward_into(&self.left, &mut self.temp)?;
        self.fft.forward_into(&self.right, &mut self.left)?;

        // Frequency-domain product, then back to the spatial domain
        self.executor.pass(KERNEL_COMPLEX_MULTIPLY, dims, None, &[], &[&self.temp, &self.left], Some(&mut self.right),
            None, PassBlend::Overwrite)?;
        self.fft.inverse(&mut self.right)?;

        self.executor.pass(KERNEL_COMPLEX_REAL, dims, Some(&mut self.channels[channel as usize]), &[], &[&self.right], None,
            Some(PassParams { scale: 1.0, ..Default::default() }), PassBlend::Overwrite)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 16x16 convolution resolution: the 8x8 staging matches an 8x8 filter
    // exactly, so the identity and alignment checks avoid resampling error.
    const RES: usize = 16;

    fn impulse_filter() -> Image {
        let mut filter = Image::new(RES / 2, RES / 2, ImageFormat::Rgba32f, false);
        filter.set_texel(RES / 4, RES / 4, [1.0, 1.0, 1.0, 0.0]);
        filter
    }

    fn test_frame() -> Image {
        let mut frame = Image::new(8, 8, ImageFormat::Rgba32f, false);
        for y in 0..8 {
            for x in 0..8 {
                frame.set_texel(x, y, [
                    (x + y) as f32 * 0.1,
                    (x * y) as f32 * 0.05,
                    (7 - x as i32).max(0) as f32 * 0.2,
                    1.0,
                ]);
            }
        }
        frame
    }

    #[test]
    fn impulse_filter_reproduces_the_frame() {
        let mut engine = ConvolutionEngine::new(RES).unwrap();
        let frame = test_frame();
        let mut dst = Image::new(8, 8, ImageFormat::Rgba32f, false);

        engine.convolve(&frame, &impulse_filter(), &mut dst, false).unwrap();

        for y in 0..8 {
            for x in 0..8 {
                let a = frame.texel(x as i64, y as i64, [0.0; 4]);
                let b = dst.texel(x as i64, y as i64, [0.0; 4]);
                for c in 0..3 {
                    assert!((a[c] - b[c]).abs() < 1e-3, "({},{})[{}]: {} vs {}", x, y, c, a[c], b[c]);
                }
            }
        }
    }

    #[test]
    fn convolution_is_linear() {
        let mut engine = ConvolutionEngine::new(RES).unwrap();

        let mut filter = Image::new(RES / 2, RES / 2, ImageFormat::Rgba32f, false);
        // Small asymmetric blob
        filter.set_texel(RES / 4, RES / 4, [0.5, 0.5, 0.5, 0.0]);
        filter.set_texel(RES / 4 + 1, RES / 4, [0.3, 0.3, 0.3, 0.0]);
        filter.set_texel(RES / 4, RES / 4 + 1, [0.2, 0.2, 0.2, 0.0]);

        let a = test_frame();
        let mut b = Image::new(8, 8, ImageFormat::Rgba32f, false);
        for y in 0..8 {
            for x in 0..8 {
                b.set_texel(x, y, [(x as f32) * 0.07, 0.3, (y as f32) * 0.04, 1.0]);
            }
        }
        let mut sum = Image::new(8, 8, ImageFormat::Rgba32f, false);
        for i in 0..sum.data.len() {
            sum.data[i] = a.data[i] + b.data[i];
        }

        let mut out_a = Image::new(8, 8, ImageFormat::Rgba32f, false);
        let mut out_b = Image::new(8, 8, ImageFormat::Rgba32f, false);
        let mut out_sum = Image::new(8, 8, ImageFormat::Rgba32f, false);
        engine.convolve(&a, &filter, &mut out_a, false).unwrap();
        engine.convolve(&b, &filter, &mut out_b, false).unwrap();
        engine.convolve(&sum, &filter, &mut out_sum, false).unwrap();

        for i in 0..out_sum.data.len() {
            assert!((out_sum.data[i] - (out_a.data[i] + out_b.data[i])).abs() < 1e-3);
        }
    }

    #[test]
    fn padding_alignment_keeps_the_peak_in_place() {
        let mut engine = ConvolutionEngine::new(RES).unwrap();

        let mut frame = Image::new(8, 8, ImageFormat::Rgba32f, false);
        frame.set_texel(2, 5, [0.0, 10.0, 0.0, 1.0]);

        let mut dst = Image::new(8, 8, ImageFormat::Rgba32f, false);
        engine.convolve(&frame, &impulse_filter(), &mut dst, false).unwrap();

        let mut peak = (0usize, 0usize);
        let mut peak_v = f32::MIN;
        for y in 0..8 {
            for x in 0..8 {
                let v = dst.texel(x as i64, y as i64, [0.0; 4])[1];
                if v > peak_v {
                    peak_v = v;
                    peak = (x, y);
                }
            }
        }
        assert_eq!(peak, (2, 5), "peak energy moved, padding corners are misaligned");
        assert!((peak_v - 10.0).abs() < 1e-2);
    }

    #[test]
    fn scale_correction_accumulates_composites() {
        let mut engine = ConvolutionEngine::new(RES).unwrap();
        let frame = test_frame();

        let mut once = Image::new(8, 8, ImageFormat::Rgba32f, false);
        engine.convolve(&frame, &impulse_filter(), &mut once, false).unwrap();

        let mut twice = Image::new(8, 8, ImageFormat::Rgba32f, false);
        engine.convolve(&frame, &impulse_filter(), &mut twice, true).unwrap();
        engine.convolve(&frame, &impulse_filter(), &mut twice, true).unwrap();

        for y in 0..8 {
            for x in 0..8 {
                let a = once.texel(x as i64, y as i64, [0.0; 4]);
                let b = twice.texel(x as i64, y as i64, [0.0; 4]);
                for c in 0..3 {
                    assert!((b[c] - 2.0 * a[c]).abs() < 2e-3, "({},{})[{}]", x, y, c);
                }
            }
        }
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut engine = ConvolutionEngine::new(RES).unwrap();
        let frame = Image::new(RES, RES, ImageFormat::Rgba32f, false);
        let mut dst = Image::new(RES, RES, ImageFormat::Rgba32f, false);
        assert!(matches!(engine.convolve(&frame, &impulse_filter(), &mut dst, false), Err(DiffractionError::Argument(_))));
    }
}
