// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;

use parking_lot::RwLock;
use rayon::prelude::*;

use crate::error::{ DiffractionError, Result };
use crate::image::Image;

pub const KERNEL_TRANSCODE_COMPLEX: &str = "transcode_complex";
pub const KERNEL_POWER_SPECTRUM:    &str = "power_spectrum";
pub const KERNEL_SPECTRAL_ACCUM:    &str = "spectral_accumulate";
pub const KERNEL_SCALE_CHANNELS:    &str = "scale_channels";
pub const KERNEL_COMPLEX_MULTIPLY:  &str = "complex_multiply";
pub const KERNEL_COMPLEX_REAL:      &str = "complex_real";
pub const KERNEL_COMPOSITE_RGB:     &str = "composite_rgb";
pub const KERNEL_RESAMPLE:          &str = "resample_bilinear";

// Must be kept in sync with the kernels that read it
#[repr(C)]
#[derive(Default, Copy, Clone, Debug)]
pub struct PassParams {
    pub src_width:  u32,
    pub src_height: u32,
    pub channel:    u32,
    pub scale:      f32,
    pub offset:     [f32; 2],
    pub weight:     [f32; 4],
}
unsafe impl bytemuck::Zeroable for PassParams {}
unsafe impl bytemuck::Pod for PassParams {}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PassBlend {
    #[default]
    Overwrite,
    Additive,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum OutputBinding {
    Target,
    RawBuffer,
}

pub struct PassCtx<'a> {
    pub inputs: &'a [&'a Image],
    pub raw_inputs: &'a [&'a [f32]],
    pub params: PassParams,
    pub out_width: usize,
    pub out_height: usize,
}

type KernelFn = fn(&PassCtx, usize, usize) -> [f32; 4];

struct KernelDesc {
    image_inputs: usize,
    raw_inputs: usize,
    output: OutputBinding,
    needs_params: bool,
    eval: KernelFn,
}

/// Image channel (or zero beyond the image extent) into an interleaved complex
/// buffer with zero imaginary part. Doubles as the zero-padding transcode when
/// the output is larger than the input image.
fn kernel_transcode_complex(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let v = ctx.inputs[0].texel(x as i64, y as i64, [0.0; 4])[ctx.params.channel as usize];
    [v, 0.0, 0.0, 0.0]
}

/// `re^2 + im^2` with a W/2,H/2 wraparound shift so DC lands at the image center.
fn kernel_power_spectrum(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let (w, h) = (ctx.out_width, ctx.out_height);
    let sx = (x + w / 2) % w;
    let sy = (y + h / 2) % h;
    let idx = 2 * (sy * w + sx);
    let re = ctx.raw_inputs[0][idx];
    let im = ctx.raw_inputs[0][idx + 1];
    [re * re + im * im, 0.0, 0.0, 0.0]
}

/// Samples the power spectrum around its center at the per-wavelength UV scale
/// and weights it by the term color. Meant to run with additive blending.
fn kernel_spectral_accumulate(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let cx = (ctx.out_width / 2) as f32;
    let cy = (ctx.out_height / 2) as f32;
    let sx = cx + (x as f32 - cx) * ctx.params.scale;
    let sy = cy + (y as f32 - cy) * ctx.params.scale;
    let p = ctx.inputs[0].sample_bilinear(sx, sy, [0.0; 4])[0];
    let w = ctx.params.weight;
    [p * w[0], p * w[1], p * w[2], p * w[3]]
}

/// Per-channel multiply with an epsilon pull-down, used by filter normalization.
fn kernel_scale_channels(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let v = ctx.inputs[0].texel(x as i64, y as i64, [0.0; 4]);
    let w = ctx.params.weight;
    [
        v[0] * w[0] - ctx.params.scale,
        v[1] * w[1] - ctx.params.scale,
        v[2] * w[2] - ctx.params.scale,
        v[3] * w[3] - ctx.params.scale,
    ]
}

/// Element-wise complex product, the frequency-domain equivalent of convolution.
fn kernel_complex_multiply(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let idx = 2 * (y * ctx.out_width + x);
    let (ar, ai) = (ctx.raw_inputs[0][idx], ctx.raw_inputs[0][idx + 1]);
    let (br, bi) = (ctx.raw_inputs[1][idx], ctx.raw_inputs[1][idx + 1]);
    [ar * br - ai * bi, ar * bi + ai * br, 0.0, 0.0]
}

/// Real part of a complex buffer into a single-channel image.
fn kernel_complex_real(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let idx = 2 * (y * ctx.out_width + x);
    [ctx.raw_inputs[0][idx] * ctx.params.scale, 0.0, 0.0, 0.0]
}

/// Samples the three single-channel convolved images at frame coordinates plus
/// the filter-center offset and emits one RGB pixel.
fn kernel_composite_rgb(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let fx = (x as f32 + 0.5) * ctx.params.src_width  as f32 / ctx.out_width  as f32 - 0.5 + ctx.params.offset[0];
    let fy = (y as f32 + 0.5) * ctx.params.src_height as f32 / ctx.out_height as f32 - 0.5 + ctx.params.offset[1];
    [
        ctx.inputs[0].sample_bilinear(fx, fy, [0.0; 4])[0],
        ctx.inputs[1].sample_bilinear(fx, fy, [0.0; 4])[0],
        ctx.inputs[2].sample_bilinear(fx, fy, [0.0; 4])[0],
        1.0,
    ]
}

fn kernel_resample_bilinear(ctx: &PassCtx, x: usize, y: usize) -> [f32; 4] {
    let src = ctx.inputs[0];
    let fx = (x as f32 + 0.5) * src.width()  as f32 / ctx.out_width  as f32 - 0.5;
    let fy = (y as f32 + 0.5) * src.height() as f32 / ctx.out_height as f32 - 0.5;
    src.sample_bilinear(fx, fy, [0.0; 4])
}

lazy_static::lazy_static! {
    static ref BUILTIN_KERNELS: HashMap<&'static str, KernelDesc> = {
        let mut m = HashMap::new();
        m.insert(KERNEL_TRANSCODE_COMPLEX, KernelDesc { image_inputs: 1, raw_inputs: 0, output: OutputBinding::RawBuffer, needs_params: true,  eval: kernel_transcode_complex });
        m.insert(KERNEL_POWER_SPECTRUM,    KernelDesc { image_inputs: 0, raw_inputs: 1, output: OutputBinding::Target,    needs_params: false, eval: kernel_power_spectrum });
        m.insert(KERNEL_SPECTRAL_ACCUM,    KernelDesc { image_inputs: 1, raw_inputs: 0, output: OutputBinding::Target,    needs_params: true,  eval: kernel_spectral_accumulate });
        m.insert(KERNEL_SCALE_CHANNELS,    KernelDesc { image_inputs: 1, raw_inputs: 0, output: OutputBinding::Target,    needs_params: true,  eval: kernel_scale_channels });
        m.insert(KERNEL_COMPLEX_MULTIPLY,  KernelDesc { image_inputs: 0, raw_inputs: 2, output: OutputBinding::RawBuffer, needs_params: false, eval: kernel_complex_multiply });
        m.insert(KERNEL_COMPLEX_REAL,      KernelDesc { image_inputs: 0, raw_inputs: 1, output: OutputBinding::Target,    needs_params: true,  eval: kernel_complex_real });
        m.insert(KERNEL_COMPOSITE_RGB,     KernelDesc { image_inputs: 3, raw_inputs: 0, output: OutputBinding::Target,    needs_params: true,  eval: kernel_composite_rgb });
        m.insert(KERNEL_RESAMPLE,          KernelDesc { image_inputs: 1, raw_inputs: 0, output: OutputBinding::Target,    needs_params: false, eval: kernel_resample_bilinear });
        m
    };
}

/// Runs a single point-sampled kernel over every pixel of the output region.
///
/// Kernels are addressed by source name and compiled handles are cached per
/// executor, keyed by that name.
pub struct PassExecutor {
    cache: RwLock<HashMap<String, &'static KernelDesc>>,
}

impl PassExecutor {
    pub fn new() -> Self {
        Self { cache: RwLock::new(HashMap::new()) }
    }

    pub fn cached_kernels(&self) -> usize {
        self.cache.read().len()
    }

    fn compile(&self, source: &str) -> Result<&'static KernelDesc> {
        if let Some(&desc) = self.cache.read().get(source) {
            return Ok(desc);
        }
        let registry: &'static HashMap<&'static str, KernelDesc> = &BUILTIN_KERNELS;
        let desc = registry.get(source)
            .ok_or_else(|| DiffractionError::KernelCompilation(format!("unknown kernel source {:?}", source)))?;
        self.cache.write().insert(source.to_string(), desc);
        Ok(desc)
    }

    /// Executes `kernel_source` once per pixel of `output_dims`, writing either
    /// to `target` or to `raw_output`. The whole output region is overwritten
    /// (or accumulated with `PassBlend::Additive`).
    #[allow(clippy::too_many_arguments)]
    pub fn pass(
        &self,
        kernel_source: &str,
        output_dims: (usize, usize),
        target: Option<&mut Image>,
        inputs: &[&Image],
        raw_inputs: &[&[f32]],
        raw_output: Option<&mut [f32]>,
        params: Option<PassParams>,
        blend: PassBlend,
    ) -> Result<()> {
        let desc = self.compile(kernel_source)?;
        let (w, h) = output_dims;

        if target.is_none() && raw_output.is_none() {
            return Err(DiffractionError::Argument("neither a render target nor a raw buffer output was supplied".into()));
        }
        if inputs.len() != desc.image_inputs {
            return Err(DiffractionError::Argument(format!("kernel {:?} expects {} image inputs, got {}", kernel_source, desc.image_inputs, inputs.len())));
        }
        if raw_inputs.len() != desc.raw_inputs {
            return Err(DiffractionError::Argument(format!("kernel {:?} expects {} raw inputs, got {}", kernel_source, desc.raw_inputs, raw_inputs.len())));
        }
        if desc.needs_params && params.is_none() {
            return Err(DiffractionError::Argument(format!("kernel {:?} requires a constant parameter block", kernel_source)));
        }

        let ctx = PassCtx {
            inputs,
            raw_inputs,
            params: params.unwrap_or_default(),
            out_width: w,
            out_height: h,
        };

        match desc.output {
            OutputBinding::Target => {
                let target = target.ok_or_else(|| DiffractionError::Argument(format!("kernel {:?} writes to a render target, none was bound", kernel_source)))?;
                if target.width() != w || target.height() != h {
                    return Err(DiffractionError::Argument(format!("render target is {}x{}, pass covers {}x{}", target.width(), target.height(), w, h)));
                }
                let c = target.format().channels();
                let eval = desc.eval;
                target.data.par_chunks_mut(w * c).take(h).enumerate().for_each(|(y, row)| {
                    for x in 0..w {
                        let v = eval(&ctx, x, y);
                        let px = &mut row[x * c..(x + 1) * c];
                        match blend {
                            PassBlend::Overwrite => px.copy_from_slice(&v[..c]),
                            PassBlend::Additive  => { for i in 0..c { px[i] += v[i]; } }
                        }
                    }
                });
            }
            OutputBinding::RawBuffer => {
                let out = raw_output.ok_or_else(|| DiffractionError::Argument(format!("kernel {:?} writes to a raw buffer, none was bound", kernel_source)))?;
                if out.len() != 2 * w * h {
                    return Err(DiffractionError::Argument(format!("raw output has {} floats, pass requires {}", out.len(), 2 * w * h)));
                }
                let eval = desc.eval;
                out.par_chunks_mut(2 * w).enumerate().for_each(|(y, row)| {
                    for x in 0..w {
                        let v = eval(&ctx, x, y);
                        match blend {
                            PassBlend::Overwrite => { row[2 * x] = v[0]; row[2 * x + 1] = v[1]; }
                            PassBlend::Additive  => { row[2 * x] += v[0]; row[2 * x + 1] += v[1]; }
                        }
                    }
                });
            }
        }
        Ok(())
    }
}

impl Default for PassExecutor {
    fn default() -> Self { Self::new() }
}
