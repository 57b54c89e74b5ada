//! Common code for visual landmark estimation.

use crate::image::{AsImageView, ImageView, Resolution};
use crate::nn::{Cnn, Outputs};
use crate::rect::{vec2, Rect, RotatedRect};
use crate::timer::Timer;

type Position = [f32; 3];

/// A fixed-size list of estimated landmarks.
///
/// Visibility and presence scores are only stored if the network estimates them.
#[derive(Debug, Clone)]
pub struct Landmarks {
    positions: Box<[Position]>,
    visibility: Option<Box<[f32]>>,
    presence: Option<Box<[f32]>>,
}

impl Landmarks {
    /// Creates a new [`Landmarks`] collection containing `len` preallocated landmarks.
    ///
    /// All landmarks will start with all coordinates at `0.0`.
    pub fn new(len: usize) -> Self {
        Self {
            positions: vec![[0.0, 0.0, 0.0]; len].into_boxed_slice(),
            visibility: None,
            presence: None,
        }
    }

    pub fn get(&self, index: usize) -> Landmark {
        Landmark {
            pos: self.positions[index],
            visibility: self.visibility.as_ref().map(|vis| vis[index]),
            presence: self.presence.as_ref().map(|pres| pres[index]),
        }
    }

    pub fn set(&mut self, index: usize, landmark: Landmark) {
        let len = self.positions.len();
        self.positions[index] = landmark.pos;
        if let Some(vis) = landmark.visibility {
            self.visibility.get_or_insert_with(|| vec![0.0; len].into())[index] = vis;
        }
        if let Some(pres) = landmark.presence {
            self.presence.get_or_insert_with(|| vec![0.0; len].into())[index] = pres;
        }
    }

    pub fn map_positions(&mut self, mut f: impl FnMut(Position) -> Position) {
        for pos in self.positions.iter_mut() {
            *pos = f(*pos);
        }
    }
}

/// A landmark in 3D space.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Landmark {
    pos: Position,
    visibility: Option<f32>,
    presence: Option<f32>,
}

impl Landmark {
    pub fn new(position: Position) -> Self {
        Self {
            pos: position,
            visibility: None,
            presence: None,
        }
    }

    pub fn with_visibility(self, visibility: f32) -> Self {
        Self {
            visibility: Some(visibility),
            ..self
        }
    }

    pub fn with_presence(self, presence: f32) -> Self {
        Self {
            presence: Some(presence),
            ..self
        }
    }

    /// Replaces the position of this landmark, keeping its scores.
    pub fn with_position(self, position: Position) -> Self {
        Self {
            pos: position,
            ..self
        }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos[2]
    }

    /// Returns the estimated probability that the landmark is visible (not occluded), if the
    /// network computes one.
    #[inline]
    pub fn visibility(&self) -> Option<f32> {
        self.visibility
    }

    /// Returns the estimated probability that the landmark is inside the image, if the network
    /// computes one.
    #[inline]
    pub fn presence(&self) -> Option<f32> {
        self.presence
    }
}

/// Trait for landmark estimation results returned by [`Estimator::estimate_roi`].
pub trait Estimate {
    /// Returns the predicted [`Landmarks`] mutably.
    fn landmarks_mut(&mut self) -> &mut Landmarks;
}

/// Trait implemented by wrapper types around neural networks that estimate landmarks.
pub trait Network {
    /// Type representing the predicted landmarks.
    type Output: Estimate;

    /// Returns the [`Cnn`] to use for landmark estimation.
    fn cnn(&self) -> &Cnn;

    /// Extracts the network outputs and writes them to `estimate`.
    ///
    /// The landmark positions are expected to be in the coordinate system of the network's input.
    fn extract(&self, outputs: &Outputs, estimate: &mut Self::Output) -> anyhow::Result<()>;
}

/// Neural-network based landmark estimator.
///
/// This estimator processes an input image and yields an [`Estimate`] of type `E`, containing the
/// derived [`Landmarks`] and other data (depending on the network).
pub struct Estimator<E: Estimate> {
    network: Box<dyn Network<Output = E>>,
    estimate: E,
    t_infer: Timer,
    t_extract: Timer,
}

impl<E: Estimate + Default> Estimator<E> {
    pub fn new<N: Network<Output = E> + 'static>(network: N) -> Self {
        Self {
            network: Box::new(network),
            estimate: E::default(),
            t_infer: Timer::new("landmark/infer"),
            t_extract: Timer::new("landmark/extract"),
        }
    }
}

impl<E: Estimate> Estimator<E> {
    /// Returns profiling timers for this landmark estimator.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract].into_iter()
    }

    /// Performs landmark estimation on the (rotated) region `roi` of `image`.
    ///
    /// If the aspect ratio of `roi` does not match the network's input, it is enlarged to match.
    /// Pixels outside of `image` read as [`Color::NULL`][crate::image::Color::NULL].
    ///
    /// Landmark X/Y coordinates are returned in `image`'s coordinate system. Z coordinates use the
    /// same scale as X.
    pub fn estimate_roi<V: AsImageView>(
        &mut self,
        image: &V,
        roi: RotatedRect,
    ) -> anyhow::Result<&mut E> {
        let aspect = self.aspect_ratio()?;
        let view_rect = roi.map(|rect| rect.grow_to_fit_aspect(aspect));
        let view = image.as_view().view(view_rect);

        let estimate = self.estimate_impl(view)?;
        map_from_roi(estimate.landmarks_mut(), &view_rect);

        Ok(estimate)
    }

    fn aspect_ratio(&self) -> anyhow::Result<f32> {
        let input_res = self.network.cnn().input_resolution();
        input_res
            .aspect_ratio()
            .ok_or_else(|| anyhow::anyhow!("landmark network has zero-sized input {input_res}"))
    }

    fn estimate_impl(&mut self, image: ImageView<'_>) -> anyhow::Result<&mut E> {
        let aspect = self.aspect_ratio()?;
        let cnn = self.network.cnn();
        let input_res = cnn.input_resolution();

        // If the input image's aspect ratio doesn't match the CNN's input, create an oversized view
        // that does.
        let rect = image.rect().grow_to_fit_aspect(aspect);
        let view = image.view(rect);
        let outputs = self.t_infer.time(|| cnn.estimate(&view))?;
        log::trace!("inference result: {:?}", outputs);

        self.t_extract
            .time(|| self.network.extract(&outputs, &mut self.estimate))?;

        map_from_input(self.estimate.landmarks_mut(), rect, input_res);

        Ok(&mut self.estimate)
    }
}

/// Maps landmarks from network input coordinates into the coordinate system of `rect`'s parent.
///
/// Z is scaled like X.
fn map_from_input(landmarks: &mut Landmarks, rect: Rect, input_res: Resolution) {
    let scale = rect.width() / input_res.width() as f32;
    landmarks.map_positions(|pos| {
        let [x, y, z] = pos.map(|t| t * scale);
        [x + rect.x(), y + rect.y(), z]
    });
}

/// Maps landmarks from the coordinates of a rotated view into the coordinates of its parent.
fn map_from_roi(landmarks: &mut Landmarks, roi: &RotatedRect) {
    landmarks.map_positions(|[x, y, z]| {
        let out = roi.transform_out(vec2(x, y));
        [out.x, out.y, z]
    });
}
