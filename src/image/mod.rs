//! Image loading and sampling.
//!
//! This module provides:
//!
//! - The [`Image`] type, an owned RGBA image decoded from a file.
//! - [`ImageView`], a borrowed, possibly rotated rectangular view into an [`Image`].
//! - The [`AsImageView`] trait to abstract over images and views.
//! - [`Resolution`], the size of an image or network input.
//! - [`JpegBackend`], the selectable JPEG decoder.

mod jpeg;
mod resolution;


use std::{fmt, path::Path};

use anyhow::Context;
use image::{ImageBuffer, Rgba, RgbaImage};

pub use jpeg::JpegBackend;
pub use resolution::Resolution;

use crate::rect::{vec2, Rect, RotatedRect};

/// An 8-bit sRGB image with alpha channel.
#[derive(Clone)]
pub struct Image {
    pub(crate) buf: RgbaImage,
}

impl Image {
    /// Loads an image from the filesystem.
    ///
    /// The image format is detected from the file contents, so the file extension does not
    /// matter. JPEG files are decoded with `jpeg_backend`, everything else goes through the
    /// [`image`] crate.
    pub fn load<A: AsRef<Path>>(path: A, jpeg_backend: JpegBackend) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref(), jpeg_backend)
    }

    fn load_impl(path: &Path, jpeg_backend: JpegBackend) -> anyhow::Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        Self::decode(&data, jpeg_backend)
    }

    /// Decodes an in-memory image file.
    pub fn decode(data: &[u8], jpeg_backend: JpegBackend) -> anyhow::Result<Self> {
        let format = image::guess_format(data).context("unrecognized image format")?;
        log::trace!("decoding {} byte {:?} image", data.len(), format);

        let image = match format {
            image::ImageFormat::Jpeg => jpeg::decode_jpeg(data, jpeg_backend)?,
            format => Self {
                buf: image::load_from_memory_with_format(data, format)?.to_rgba8(),
            },
        };

        if image.width() == 0 || image.height() == 0 {
            anyhow::bail!("image has zero size ({})", image.resolution());
        }

        Ok(image)
    }

    /// Creates an image of the given size by calling `f` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Color) -> Self {
        Self {
            buf: ImageBuffer::from_fn(width, height, |x, y| Rgba(f(x, y).0)),
        }
    }

    /// Returns the width of this image, in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    /// Returns the height of this image, in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns a [`Rect`] covering this image.
    ///
    /// The rectangle will be positioned at `(0, 0)` and have the width and height of the image.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width() as f32, self.height() as f32)
    }

    /// Gets the image color at the given pixel coordinates, or [`Color::NULL`] if they are out of
    /// bounds.
    pub fn get(&self, x: u32, y: u32) -> Color {
        if x < self.width() && y < self.height() {
            Color(self.buf.get_pixel(x, y).0)
        } else {
            Color::NULL
        }
    }

    /// Creates an immutable view into an area of this image, specified by `rect`.
    ///
    /// If `rect` lies partially outside of `self`, the pixels that are outside of `self` will have
    /// the value [`Color::NULL`]. The returned view always has the size of `rect`.
    pub fn view(&self, rect: impl Into<RotatedRect>) -> ImageView<'_> {
        ImageView {
            image: self,
            rect: self.rect().into(),
        }
        .into_view(rect.into())
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} Image", self.width(), self.height())
    }
}

/// An immutable view of a (possibly rotated) rectangular section of an [`Image`].
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    image: &'a Image,
    /// Rectangle in the root image's coordinates.
    rect: RotatedRect,
}

impl<'a> ImageView<'a> {
    fn into_view(self, rect: RotatedRect) -> ImageView<'a> {
        let radians = self.rect.rotation_radians() + rect.rotation_radians();
        let center = self.rect.transform_out(rect.center());
        let size = rect.rect().size();

        ImageView {
            image: self.image,
            rect: RotatedRect::new(
                Rect::from_center(center.x, center.y, size.x, size.y),
                radians,
            ),
        }
    }

    /// Returns the width of this view, in pixels.
    pub fn width(&self) -> f32 {
        self.rect.rect().width()
    }

    /// Returns the height of this view, in pixels.
    pub fn height(&self) -> f32 {
        self.rect.rect().height()
    }

    /// Returns a [`Rect`] of the size of this view, positioned at `(0, 0)`.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width(), self.height())
    }

    /// Samples the color at view coordinates `(x, y)` using nearest-neighbor filtering.
    ///
    /// Coordinates are continuous: `(0.0, 0.0)` is the top left corner of the view, and pixel
    /// centers lie at `.5` offsets. Positions outside of the underlying image read as
    /// [`Color::NULL`].
    pub fn sample(&self, x: f32, y: f32) -> Color {
        let pt = self.rect.transform_out(vec2(x, y));
        let [x, y] = [pt.x.floor(), pt.y.floor()];
        if x < 0.0 || y < 0.0 || x >= self.image.width() as f32 || y >= self.image.height() as f32
        {
            return Color::NULL;
        }

        self.image.get(x as u32, y as u32)
    }

    /// Creates an immutable subview into an area of this view, specified by `rect`.
    ///
    /// `rect` may extend past the edges of `self`, in which case the subview will read the
    /// surrounding pixels of the underlying [`Image`] (or [`Color::NULL`] outside of it).
    pub fn view(&self, rect: impl Into<RotatedRect>) -> ImageView<'a> {
        self.into_view(rect.into())
    }
}

impl fmt::Debug for ImageView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} ImageView", self.width(), self.height())
    }
}

/// An 8-bit RGBA color.
///
/// Colors are always in the sRGB color space and use non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    /// Fully transparent black (all components are 0).
    pub const NULL: Self = Self([0, 0, 0, 0]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r(),
            self.g(),
            self.b(),
            self.a(),
        )
    }
}

/// Trait for types that can be treated as read-only views of image data.
///
/// This allows abstracting over [`Image`] and [`ImageView`].
pub trait AsImageView {
    /// Returns an [`ImageView`] covering `self`.
    fn as_view(&self) -> ImageView<'_>;
}

impl AsImageView for Image {
    fn as_view(&self) -> ImageView<'_> {
        self.view(self.rect())
    }
}

impl<'a> AsImageView for ImageView<'a> {
    fn as_view(&self) -> ImageView<'_> {
        *self
    }
}

impl<'a, V: AsImageView> AsImageView for &'a V {
    fn as_view(&self) -> ImageView<'_> {
        (*self).as_view()
    }
}
