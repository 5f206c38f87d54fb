//! Immutable, reference-counted raster buffers.
//!
//! Buffers are written once while being produced and shared afterwards by
//! every cache entry and consumer that holds them. Pixel storage lives behind
//! an `Arc<[T]>`, so cloning an [`ImageBuffer`] never copies pixels; anything
//! that needs different pixels builds a new buffer.

use crate::core::error::{FilterError, FilterResult};
use crate::core::geometry::{Rect, Size};
use image::{DynamicImage, Rgb, Rgba};
use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A single channel sample type.
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Maximum representable value (full white).
    const MAX: Self;

    /// Map the sample to `0.0..=1.0`.
    fn to_unit(self) -> f32;

    /// Map `0.0..=1.0` back to the sample range, clamping.
    fn from_unit(value: f32) -> Self;
}

impl Sample for u16 {
    const MAX: Self = u16::MAX;

    fn to_unit(self) -> f32 {
        self as f32 / 65535.0
    }

    fn from_unit(value: f32) -> Self {
        (value.clamp(0.0, 1.0) * 65535.0).round() as u16
    }
}

impl Sample for u8 {
    const MAX: Self = u8::MAX;

    fn to_unit(self) -> f32 {
        self as f32 / 255.0
    }

    fn from_unit(value: f32) -> Self {
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

/// A multi-channel raster.
///
/// Invariant: `stride >= width * channels` and the storage holds at least
/// `stride * height` samples.
#[derive(Clone)]
pub struct ImageBuffer<T: Sample> {
    id: u64,
    width: u32,
    height: u32,
    channels: u8,
    stride: usize,
    data: Arc<[T]>,
}

/// 16-bit linear image, the working format of the pipeline.
pub type Image16 = ImageBuffer<u16>;

/// 8-bit display-encoded image, what surfaces paint.
pub type Image8 = ImageBuffer<u8>;

impl<T: Sample> fmt::Debug for ImageBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("stride", &self.stride)
            .finish()
    }
}

impl<T: Sample> ImageBuffer<T> {
    /// Build a tightly packed buffer from raw samples.
    pub fn from_vec(width: u32, height: u32, channels: u8, data: Vec<T>) -> FilterResult<Self> {
        let stride = width as usize * channels as usize;
        Self::with_stride(width, height, channels, stride, data)
    }

    /// Build a buffer whose rows are `stride` samples apart.
    pub fn with_stride(
        width: u32,
        height: u32,
        channels: u8,
        stride: usize,
        data: Vec<T>,
    ) -> FilterResult<Self> {
        if channels != 3 && channels != 4 {
            return Err(FilterError::Buffer(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let row = width as usize * channels as usize;
        if stride < row {
            return Err(FilterError::Buffer(format!(
                "stride {} shorter than row of {} samples",
                stride, row
            )));
        }
        if data.len() < stride * height as usize {
            return Err(FilterError::Buffer(format!(
                "{} samples cannot hold {}x{} with stride {}",
                data.len(),
                width,
                height,
                stride
            )));
        }
        Ok(Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            channels,
            stride,
            data: data.into(),
        })
    }

    /// Build a buffer by evaluating `f` for every pixel.
    pub fn from_fn<F>(width: u32, height: u32, channels: u8, f: F) -> Self
    where
        F: Fn(u32, u32, &mut [T]) + Sync,
    {
        let ch = channels.clamp(3, 4);
        let stride = width as usize * ch as usize;
        let mut data = vec![T::default(); stride * height as usize];
        if stride > 0 {
            data.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
                for (x, px) in row.chunks_mut(ch as usize).enumerate() {
                    f(x as u32, y as u32, px);
                }
            });
        }
        Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            channels: ch,
            stride,
            data: data.into(),
        }
    }

    /// Process-unique identity of this buffer's pixels.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn bounds(&self) -> Rect {
        self.size().bounds()
    }

    /// Samples of one row, without stride padding.
    pub fn row(&self, y: u32) -> &[T] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.channels as usize]
    }

    /// Samples of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> &[T] {
        let start = y as usize * self.stride + x as usize * self.channels as usize;
        &self.data[start..start + self.channels as usize]
    }

    /// Pixel lookup with coordinates clamped to the image.
    pub fn pixel_clamped(&self, x: i64, y: i64) -> &[T] {
        let x = x.clamp(0, self.width.saturating_sub(1) as i64) as u32;
        let y = y.clamp(0, self.height.saturating_sub(1) as i64) as u32;
        self.pixel(x, y)
    }

    /// Whether both buffers share the same pixel storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Copy out the samples as a tightly packed vector.
    pub fn to_packed(&self) -> Vec<T> {
        let row = self.width as usize * self.channels as usize;
        if row == self.stride {
            return self.data[..row * self.height as usize].to_vec();
        }
        let mut out = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    /// Copy of the pixels inside `rect`.
    ///
    /// Returns `None` when `rect` does not intersect the image. Asking for
    /// the whole frame returns a shared clone instead of a copy.
    pub fn region(&self, rect: Rect) -> Option<Self> {
        let clipped = rect.intersect(&self.bounds())?;
        if clipped == self.bounds() {
            return Some(self.clone());
        }
        let ch = self.channels as usize;
        let row = clipped.width as usize * ch;
        let mut data = Vec::with_capacity(row * clipped.height as usize);
        for y in clipped.y..clipped.y + clipped.height as i32 {
            let start = y as usize * self.stride + clipped.x as usize * ch;
            data.extend_from_slice(&self.data[start..start + row]);
        }
        Self::from_vec(clipped.width, clipped.height, self.channels, data).ok()
    }

    /// New buffer with `f` applied to every pixel, rows in parallel.
    pub fn map_pixels<F>(&self, f: F) -> Self
    where
        F: Fn(&[T], &mut [T]) + Sync,
    {
        let ch = self.channels as usize;
        let row_len = self.width as usize * ch;
        let mut data = vec![T::default(); row_len * self.height as usize];
        if row_len > 0 {
            data.par_chunks_mut(row_len).enumerate().for_each(|(y, out_row)| {
                let in_row = self.row(y as u32);
                for (src, dst) in in_row.chunks(ch).zip(out_row.chunks_mut(ch)) {
                    f(src, dst);
                }
            });
        }
        Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            width: self.width,
            height: self.height,
            channels: self.channels,
            stride: row_len,
            data: data.into(),
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn estimated_memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }
}

impl Image16 {
    /// Convert into an `image` crate buffer for resampling and geometry.
    pub fn to_dynamic(&self) -> DynamicImage {
        let packed = self.to_packed();
        let converted = if self.channels == 4 {
            image::ImageBuffer::<Rgba<u16>, Vec<u16>>::from_raw(self.width, self.height, packed)
                .map(DynamicImage::ImageRgba16)
        } else {
            image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(self.width, self.height, packed)
                .map(DynamicImage::ImageRgb16)
        };
        converted.unwrap_or_else(|| DynamicImage::new_rgb16(self.width, self.height))
    }

    /// Build from an `image` crate buffer, keeping alpha when present.
    pub fn from_dynamic(img: DynamicImage) -> FilterResult<Self> {
        let (w, h) = (img.width(), img.height());
        if img.color().has_alpha() {
            Self::from_vec(w, h, 4, img.into_rgba16().into_raw())
        } else {
            Self::from_vec(w, h, 3, img.into_rgb16().into_raw())
        }
    }
}

impl Image8 {
    /// Build from an `image` crate buffer, keeping alpha when present.
    pub fn from_dynamic(img: DynamicImage) -> FilterResult<Self> {
        let (w, h) = (img.width(), img.height());
        if img.color().has_alpha() {
            Self::from_vec(w, h, 4, img.into_rgba8().into_raw())
        } else {
            Self::from_vec(w, h, 3, img.into_rgb8().into_raw())
        }
    }
}
