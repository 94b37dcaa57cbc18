// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{ Fft, FftPlanner };

use crate::error::{ DiffractionError, Result };

/// Ordered scalar-float counts for the buffers a transform needs.
///
/// Precompute buffers are written once at attach time and read-only afterwards.
/// Temporaries are scratch, overwritten by every transform call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferRequirements {
    pub precompute: Vec<usize>,
    pub temporary: Vec<usize>,
}

/// 2D complex-to-complex FFT over interleaved (re, im) f32 buffers of length `2*W*H`.
///
/// Transforms run rows first, then columns through a single gather/scatter
/// column buffer. `forward`/`inverse` are in place: the caller's buffer is the
/// output and its previous contents are gone. `forward_into`/`inverse_into`
/// are the explicit out-of-place variants.
pub struct FftEngine {
    width: usize,
    height: usize,

    fwd_row: Arc<dyn Fft<f32>>,
    inv_row: Arc<dyn Fft<f32>>,
    fwd_col: Arc<dyn Fft<f32>>,
    inv_col: Arc<dyn Fft<f32>>,

    forward_scale: f32,
    inverse_scale: f32,

    // Filled by attach_buffers_and_precompute
    temporaries: Vec<Vec<f32>>,
    attached: bool,
}

enum Direction { Forward, Inverse }

impl FftEngine {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width < 2 || height < 2 || !width.is_power_of_two() || !height.is_power_of_two() {
            return Err(DiffractionError::Configuration(format!("FFT resolution must be a power of two, got {}x{}", width, height)));
        }
        let mut planner = FftPlanner::new();
        Ok(Self {
            width, height,
            fwd_row: planner.plan_fft_forward(width),
            inv_row: planner.plan_fft_inverse(width),
            fwd_col: planner.plan_fft_forward(height),
            inv_col: planner.plan_fft_inverse(height),
            forward_scale: 1.0,
            inverse_scale: 1.0,
            temporaries: Vec::new(),
            attached: false,
        })
    }

    #[inline] pub fn width(&self)  -> usize { self.width }
    #[inline] pub fn height(&self) -> usize { self.height }
    #[inline] pub fn signal_len(&self) -> usize { 2 * self.width * self.height }

    pub fn set_forward_scale(&mut self, scale: f32) { self.forward_scale = scale; }
    pub fn set_inverse_scale(&mut self, scale: f32) { self.inverse_scale = scale; }
    #[inline] pub fn forward_scale(&self) -> f32 { self.forward_scale }
    #[inline] pub fn inverse_scale(&self) -> f32 { self.inverse_scale }

    /// Buffer sizes this engine requires, in scalar floats.
    ///
    /// The rustfft plans keep their twiddle tables internally, so the
    /// precompute list is empty for this backend. Temporaries are:
    /// row scratch, column gather buffer, column scratch.
    pub fn buffer_requirements(&self) -> BufferRequirements {
        let row_scratch = self.fwd_row.get_inplace_scratch_len().max(self.inv_row.get_inplace_scratch_len());
        let col_scratch = self.fwd_col.get_inplace_scratch_len().max(self.inv_col.get_inplace_scratch_len());
        BufferRequirements {
            precompute: Vec::new(),
            temporary: vec![2 * row_scratch, 2 * self.height, 2 * col_scratch],
        }
    }

    /// Binds caller-allocated buffers matching `buffer_requirements` exactly.
    /// Must be called exactly once before any transform.
    pub fn attach_buffers_and_precompute(&mut self, temporaries: Vec<Vec<f32>>, precomputed: Vec<Vec<f32>>) -> Result<()> {
        if self.attached {
            return Err(DiffractionError::Configuration("FFT buffers already attached".into()));
        }
        let req = self.buffer_requirements();
        if precomputed.len() != req.precompute.len() {
            return Err(DiffractionError::Configuration(format!("expected {} precompute buffers, got {}", req.precompute.len(), precomputed.len())));
        }
        if temporaries.len() != req.temporary.len() {
            return Err(DiffractionError::Configuration(format!("expected {} temporary buffers, got {}", req.temporary.len(), temporaries.len())));
        }
        for (i, (buf, want)) in temporaries.iter().zip(req.temporary.iter()).enumerate() {
            if buf.len() != *want {
                return Err(DiffractionError::Configuration(format!("temporary buffer {} has {} floats, expected {}", i, buf.len(), want)));
            }
        }
        self.temporaries = temporaries;
        self.attached = true;
        Ok(())
    }

    /// In-place forward transform. The buffer is both input and output.
    pub fn forward(&mut self, signal: &mut [f32]) -> Result<()> {
        self.transform(signal, Direction::Forward)
    }

    /// In-place inverse transform.
    pub fn inverse(&mut self, signal: &mut [f32]) -> Result<()> {
        self.transform(signal, Direction::Inverse)
    }

    /// Out-of-place forward transform; `input` is left untouched.
    pub fn forward_into(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != output.len() {
            return Err(DiffractionError::Argument(format!("input/output length mismatch: {} vs {}", input.len(), output.len())));
        }
        output.copy_from_slice(input);
        self.transform(output, Direction::Forward)
    }

    /// Out-of-place inverse transform; `input` is left untouched.
    pub fn inverse_into(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != output.len() {
            return Err(DiffractionError::Argument(format!("input/output length mismatch: {} vs {}", input.len(), output.len())));
        }
        output.copy_from_slice(input);
        self.transform(output, Direction::Inverse)
    }

    fn transform(&mut self, signal: &mut [f32], direction: Direction) -> Result<()> {
        if !self.attached {
            return Err(DiffractionError::Configuration("transform called before attach_buffers_and_precompute".into()));
        }
        if signal.len() != self.signal_len() {
            return Err(DiffractionError::Argument(format!("signal has {} floats, expected {}", signal.len(), self.signal_len())));
        }

        let (row_fft, col_fft, scale) = match direction {
            Direction::Forward => (&self.fwd_row, &self.fwd_col, self.forward_scale),
            Direction::Inverse => (&self.inv_row, &self.inv_col, self.inverse_scale),
        };

        let data: &mut [Complex<f32>] = bytemuck::cast_slice_mut(signal);

        // All rows in one call, rustfft chunks the buffer by row length
        {
            let scratch: &mut [Complex<f32>] = bytemuck::cast_slice_mut(&mut self.temporaries[0]);
            row_fft.process_with_scratch(data, scratch);
        }

        // Columns through the gather buffer
        let (gather_raw, col_scratch_raw) = {
            let (a, b) = self.temporaries.split_at_mut(2);
            (&mut a[1], &mut b[0])
        };
        let gather: &mut [Complex<f32>] = bytemuck::cast_slice_mut(gather_raw);
        let col_scratch: &mut [Complex<f32>] = bytemuck::cast_slice_mut(col_scratch_raw);
        for col in 0..self.width {
            for row in 0..self.height {
                gather[row] = data[row * self.width + col];
            }
            col_fft.process_with_scratch(gather, col_scratch);
            for row in 0..self.height {
                data[row * self.width + col] = gather[row];
            }
        }

        if scale != 1.0 {
            for v in data.iter_mut() {
                *v *= scale;
            }
        }
        Ok(())
    }
}

/// Allocates and attaches the buffers an engine declared. The engines own
/// their FFT through this path so the attach step can never mismatch.
pub fn attach_fresh_buffers(fft: &mut FftEngine) -> Result<()> {
    let req = fft.buffer_requirements();
    let temporaries = req.temporary.iter().map(|&n| vec![0.0f32; n]).collect();
    let precomputed = req.precompute.iter().map(|&n| vec![0.0f32; n]).collect();
    fft.attach_buffers_and_precompute(temporaries, precomputed)
}
