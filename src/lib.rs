// SPDX-License-Identifier: GPL-3.0-or-later

//! Real-time lens diffraction.
//!
//! The aperture's power spectrum is computed with a 2D FFT, accumulated over a
//! set of (wavelength, color) spectral terms into a normalized RGB filter, and
//! convolved against incoming HDR frames through zero-padded frequency-domain
//! multiplication.
//!
//! All per-pixel work runs as named kernels through the [`pass::PassExecutor`];
//! transforms go through the [`fft::FftEngine`] with caller-declared scratch
//! buffers. [`lens_filter::LensFilter`] ties one diffraction engine and one
//! convolution engine together per quality tier.

pub mod aperture;
pub mod convolution;
pub mod diffraction;
pub mod error;
pub mod fft;
pub mod image;
pub mod lens_filter;
pub mod pass;

pub use aperture::{ compose_aperture, ApertureDefinition, ApertureLayer, SpectralTerm, REFERENCE_WAVELENGTH };
pub use convolution::ConvolutionEngine;
pub use diffraction::DiffractionEngine;
pub use error::{ DiffractionError, Result };
pub use fft::{ BufferRequirements, FftEngine };
pub use image::{ Image, ImageFormat };
pub use lens_filter::{ LensFilter, Quality };
pub use pass::{ PassBlend, PassExecutor, PassParams };
