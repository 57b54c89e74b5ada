//! Axis-aligned and rotated rectangles.
//!
//! Detection boxes, the letterbox around the detector input, and the region of interest handed to
//! the landmark network are all expressed with these. Coordinates are `f32` pixels, Y points down.

use std::fmt;

use nalgebra::{Rotation2, Vector2};

pub type Vec2f = Vector2<f32>;

#[inline]
pub fn vec2(x: f32, y: f32) -> Vec2f {
    Vec2f::new(x, y)
}

/// An axis-aligned rectangle, stored as center and size.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Vec2f,
    size: Vec2f,
}

impl Rect {
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: vec2(x_center, y_center),
            size: vec2(width, height),
        }
    }

    #[inline]
    pub fn from_top_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_center(x + width * 0.5, y + height * 0.5, width, height)
    }

    /// Widens or heightens `self` around its center until `width / height == aspect`.
    ///
    /// The rectangle never shrinks, so the result always contains `self`.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, aspect: f32) -> Self {
        let mut res = *self;
        let target_width = self.height() * aspect;
        if target_width >= self.width() {
            res.size.x = target_width;
        } else {
            res.size.y = self.width() / aspect;
        }
        res
    }

    #[inline]
    pub fn top_left(&self) -> Vec2f {
        self.center - self.size * 0.5
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.top_left().x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.top_left().y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn center(&self) -> Vec2f {
        self.center
    }

    #[inline]
    pub fn size(&self) -> Vec2f {
        self.size
    }

    #[must_use]
    pub fn move_by(&self, offset: Vec2f) -> Rect {
        Rect {
            center: self.center + offset,
            ..*self
        }
    }

    fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    fn intersection_area(&self, other: &Rect) -> f32 {
        let min = self.top_left().sup(&other.top_left());
        let max = (self.top_left() + self.size).inf(&(other.top_left() + other.size));
        let overlap = (max - min).sup(&Vec2f::zeros());
        overlap.x * overlap.y
    }

    /// Intersection over union of `self` and `other`, between 0.0 and 1.0.
    pub fn iou(&self, other: &Rect) -> f32 {
        let intersection = self.intersection_area(other);
        intersection / (self.area() + other.area() - intersection)
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.center.x, self.center.y, self.size.x, self.size.y
        )
    }
}

/// A [`Rect`] rotated clockwise (as seen on screen) around its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    /// The rectangle before rotation.
    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Replaces the unrotated rectangle with `f(rect)`, keeping the rotation.
    #[must_use]
    pub fn map(mut self, f: impl FnOnce(Rect) -> Rect) -> Self {
        self.rect = f(self.rect);
        self
    }

    #[inline]
    pub fn center(&self) -> Vec2f {
        self.rect.center()
    }

    /// Maps a point from the rectangle's own coordinates (origin at its top left corner, axes
    /// along its edges) to the surrounding coordinate system.
    pub fn transform_out(&self, pt: impl Into<Vec2f>) -> Vec2f {
        let half = self.rect.size() * 0.5;
        Rotation2::new(self.radians) * (pt.into() - half) + self.rect.center()
    }
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}
