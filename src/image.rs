// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{ DiffractionError, Result };

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImageFormat {
    R32f,
    Rgba32f,
}

impl ImageFormat {
    #[inline] pub fn channels(self) -> usize {
        match self {
            ImageFormat::R32f    => 1,
            ImageFormat::Rgba32f => 4,
        }
    }
}

/// 2D float image, row-major, exclusively owned by the engine that allocated it.
///
/// Mip levels are plain box reductions, used as a parallel-reduction mechanism
/// to get a whole-image average out of the coarsest level.
#[derive(Clone)]
pub struct Image {
    width: usize,
    height: usize,
    format: ImageFormat,
    mip: bool,
    pub data: Vec<f32>,
    mips: Vec<Vec<f32>>,
}

impl Image {
    pub fn new(width: usize, height: usize, format: ImageFormat, mip: bool) -> Self {
        Self {
            width, height, format, mip,
            data: vec![0.0; width * height * format.channels()],
            mips: Vec::new(),
        }
    }

    #[inline] pub fn width(&self)  -> usize { self.width }
    #[inline] pub fn height(&self) -> usize { self.height }
    #[inline] pub fn format(&self) -> ImageFormat { self.format }
    #[inline] pub fn has_mip_chain(&self) -> bool { self.mip }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.mips.clear();
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
        self.mips.clear();
    }

    /// Texel fetch with border addressing: out-of-range coordinates return `border`.
    #[inline]
    pub fn texel(&self, x: i64, y: i64, border: [f32; 4]) -> [f32; 4] {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return border;
        }
        let c = self.format.channels();
        let idx = (y as usize * self.width + x as usize) * c;
        let mut out = [0.0; 4];
        out[..c].copy_from_slice(&self.data[idx..idx + c]);
        out
    }

    #[inline]
    pub fn set_texel(&mut self, x: usize, y: usize, value: [f32; 4]) {
        let c = self.format.channels();
        let idx = (y * self.width + x) * c;
        self.data[idx..idx + c].copy_from_slice(&value[..c]);
    }

    /// Bilinear sample at pixel-space coordinates, border-addressed.
    pub fn sample_bilinear(&self, x: f32, y: f32, border: [f32; 4]) -> [f32; 4] {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let p00 = self.texel(x0,     y0,     border);
        let p10 = self.texel(x0 + 1, y0,     border);
        let p01 = self.texel(x0,     y0 + 1, border);
        let p11 = self.texel(x0 + 1, y0 + 1, border);

        let mut out = [0.0; 4];
        for c in 0..4 {
            let top = p00[c] * (1.0 - fx) + p10[c] * fx;
            let bot = p01[c] * (1.0 - fx) + p11[c] * fx;
            out[c] = top * (1.0 - fy) + bot * fy;
        }
        out
    }

    /// Rebuilds the full mip chain down to 1x1 with successive 2x box reductions.
    pub fn generate_mips(&mut self) -> Result<()> {
        if !self.mip {
            return Err(DiffractionError::Argument("image was not created with a mip chain".into()));
        }
        self.mips.clear();

        let c = self.format.channels();
        let (mut w, mut h) = (self.width, self.height);
        while w > 1 || h > 1 {
            let nw = (w / 2).max(1);
            let nh = (h / 2).max(1);
            let level = {
                let src: &[f32] = self.mips.last().map(|v| v.as_slice()).unwrap_or(&self.data);
                let mut level = vec![0.0f32; nw * nh * c];
                for y in 0..nh {
                    for x in 0..nw {
                        // 2x2 box, clamped at odd edges
                        let x1 = (2 * x + 1).min(w - 1);
                        let y1 = (2 * y + 1).min(h - 1);
                        for ch in 0..c {
                            let s = src[(2 * y * w + 2 * x) * c + ch]
                                  + src[(2 * y * w + x1)    * c + ch]
                                  + src[(y1 * w + 2 * x)    * c + ch]
                                  + src[(y1 * w + x1)       * c + ch];
                            level[(y * nw + x) * c + ch] = s * 0.25;
                        }
                    }
                }
                level
            };
            self.mips.push(level);
            w = nw;
            h = nh;
        }
        Ok(())
    }

    /// Coarsest mip texel, i.e. the whole-image average. `None` until `generate_mips` ran.
    pub fn coarsest_mip(&self) -> Option<[f32; 4]> {
        let last = self.mips.last()?;
        let c = self.format.channels();
        let mut out = [0.0; 4];
        out[..c].copy_from_slice(&last[..c]);
        Some(out)
    }
}
