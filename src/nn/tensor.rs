//! Tensor API.
//!
//! Tensors are the inputs and outputs of the pose networks: an image goes in as a `[1, 3, H, W]`
//! (or `[1, H, W, 3]`) tensor, and landmarks and scores come out as flat `[1, N]` tensors.

use std::fmt;

use itertools::zip_eq;
use tinyvec::TinyVec;

type Dims = TinyVec<[usize; 4]>;

#[derive(Clone)]
struct Layout {
    shape: Dims,
    strides: Dims,
}

impl Layout {
    fn from_shape(shape: &[usize]) -> Self {
        let mut strides: Dims = shape.iter().map(|_| 0).collect();

        let mut stride = 1;
        for (out, size) in zip_eq(strides.iter_mut().rev(), shape.iter().rev()) {
            *out = stride;
            stride *= size;
        }

        Self {
            shape: shape.into(),
            strides,
        }
    }

    fn elements(&self) -> usize {
        self.shape.iter().product()
    }

    fn remove_prefix(&self, num: usize) -> Layout {
        assert!(num <= self.shape.len());

        Layout {
            shape: self.shape[num..].into(),
            strides: self.strides[num..].into(),
        }
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.shape.iter()).finish()
    }
}

/// Advances `index` to the next position in row-major order.
///
/// Returns `false` once all positions of `shape` have been visited.
fn advance(index: &mut [usize], shape: &[usize]) -> bool {
    for (i, &size) in zip_eq(index.iter_mut().rev(), shape.iter().rev()) {
        if *i + 1 < size {
            *i += 1;
            return true;
        }
        *i = 0;
    }

    false
}

/// A dynamically sized tensor of `f32` elements.
///
/// # Data Access
///
/// [`Tensor::index`] creates a [`TensorView`] that refers to a suffix of the tensor's dimensions.
/// The data in one-dimensional views can be accessed with [`TensorView::as_slice`]. The network
/// output decoders mostly read [`Tensor::as_raw_data`] after checking the shape.
#[derive(Clone)]
pub struct Tensor {
    layout: Layout,
    data: Box<[f32]>,
}

/// A borrowed view into a [`Tensor`].
#[derive(Clone)]
pub struct TensorView<'a> {
    layout: Layout,
    data: &'a [f32],
}

impl Tensor {
    /// Creates an `N`-dimensional tensor of the given shape by calling `f` for each element.
    ///
    /// This will invoke `f` with successive indices to fill, starting with `[0, ..., 0, 0]`, then
    /// `[0, ..., 0, 1]` and so on.
    pub fn from_array_shape_fn<const N: usize, F: FnMut([usize; N]) -> f32>(
        shape: [usize; N],
        mut f: F,
    ) -> Self {
        let layout = Layout::from_shape(&shape);
        let mut data = Vec::with_capacity(layout.elements());
        if layout.elements() != 0 {
            let mut index = [0; N];
            loop {
                data.push(f(index));
                if !advance(&mut index, &shape) {
                    break;
                }
            }
        }

        Self {
            layout,
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor of the given shape by pulling elements from an iterator.
    ///
    /// # Panics
    ///
    /// `iter` must yield exactly as many elements as specified by `shape`, otherwise this method
    /// will panic.
    pub fn from_iter<I: IntoIterator<Item = f32>>(shape: &[usize], iter: I) -> Self {
        let layout = Layout::from_shape(shape);
        let data: Box<[f32]> = iter.into_iter().collect();
        assert_eq!(data.len(), layout.elements());
        Self { layout, data }
    }

    pub(super) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        let data = tract.as_slice::<f32>()?;
        Ok(Self {
            layout: Layout::from_shape(tract.shape()),
            data: data.into(),
        })
    }

    pub(super) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        Ok(tract_onnx::prelude::Tensor::from_shape(
            self.shape(),
            &self.data[..],
        )?)
    }

    /// Returns the shape of this tensor.
    pub fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    /// Returns a view of the whole tensor.
    pub fn as_view(&self) -> TensorView<'_> {
        TensorView {
            layout: self.layout.clone(),
            data: &self.data,
        }
    }

    /// Indexes a prefix of the tensor's dimensions with `indices`.
    ///
    /// For a tensor of shape `[2, 3, 4, 5]`, indexing with `[a, b]` returns a view of shape
    /// `[4, 5]`, and indexing with `[a, b, c, d]` a view of shape `[]` (a single value).
    ///
    /// # Panics
    ///
    /// This method will panic if `indices` has more entries than `self` has dimensions, or if any
    /// index is out of bounds.
    #[track_caller]
    pub fn index<const N: usize>(&self, indices: [usize; N]) -> TensorView<'_> {
        self.as_view().index(indices)
    }

    /// Returns all elements of the tensor in row-major order, regardless of its shape.
    pub fn as_raw_data(&self) -> &[f32] {
        &self.data
    }
}

impl<'d> TensorView<'d> {
    /// Returns the shape of this tensor view.
    pub fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    /// Returns the number of dimensions of this tensor view.
    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Indexes a prefix of the view's dimensions with `indices`.
    ///
    /// See [`Tensor::index`].
    #[track_caller]
    pub fn index<const N: usize>(&self, indices: [usize; N]) -> TensorView<'d> {
        assert!(
            N <= self.rank(),
            "attempted to index tensor of shape {:?} with {:?}",
            self.shape(),
            indices
        );

        let mut data = self.data;
        for ((&length, &stride), &index) in self
            .layout
            .shape
            .iter()
            .zip(self.layout.strides.iter())
            .zip(&indices)
        {
            assert!(
                index < length,
                "attempted to index tensor of shape {:?} with {:?}",
                self.shape(),
                indices
            );
            data = &data[index * stride..(index + 1) * stride];
        }

        TensorView {
            layout: self.layout.remove_prefix(N),
            data,
        }
    }

    /// Iterates over the outermost dimension of this view.
    ///
    /// # Panics
    ///
    /// `self` must have at least one dimension, otherwise this method will panic.
    #[track_caller]
    pub fn iter(&self) -> impl Iterator<Item = TensorView<'d>> + '_ {
        assert!(
            self.rank() > 0,
            "attempted to iterate over 0-dimensional tensor view"
        );
        (0..self.shape()[0]).map(|index| self.index([index]))
    }

    /// Returns the values stored in a 1-dimensional view as a slice.
    ///
    /// # Panics
    ///
    /// `self` must have exactly 1 dimension, otherwise this method panics.
    #[track_caller]
    pub fn as_slice(&self) -> &'d [f32] {
        assert_eq!(
            self.rank(),
            1,
            "attempted to access tensor view of shape {:?} as slice",
            self.shape()
        );
        self.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.layout)
            .finish()
    }
}

impl fmt::Debug for TensorView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorView")
            .field("shape", &self.layout)
            .finish()
    }
}
