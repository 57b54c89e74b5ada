//! Neural Network inference.

pub mod tensor;

use crate::image::{AsImageView, Color, ImageView, Resolution};
use anyhow::{anyhow, bail, Context};
use tensor::Tensor;
use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, TypedFact, TypedOp,
};

use std::{
    ops::{Index, RangeInclusive},
    path::Path,
    sync::Arc,
};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A convolutional neural network (CNN) that operates on image data.
///
/// Like the underlying [`NeuralNetwork`], this is a cheaply [`Clone`]able handle to the underlying
/// data.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    shape: CnnInputShape,
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one input of shape `[1, 3, H, W]` or `[1, H, W, 3]`. Which of
    /// the two layouts is used is detected from the input shape.
    pub fn new(nn: NeuralNetwork, color_mapper: ColorMapper) -> anyhow::Result<Self> {
        if nn.num_inputs() != 1 {
            bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }

        let input = &nn.0.inputs[0];
        let (shape, input_res) = CnnInputShape::detect(&input.shape)?;
        log::debug!(
            "CNN input '{}' has shape {:?} ({:?}, {})",
            input.name,
            input.shape,
            shape,
            input_res,
        );

        Ok(Self {
            nn,
            shape,
            input_res,
            color_mapper,
        })
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on an input image, returning the estimated outputs.
    ///
    /// The input image will be sampled to create the network's input tensor. If the image's aspect
    /// ratio does not match the network's input aspect ratio, the image will be stretched.
    pub fn estimate<V: AsImageView>(&self, image: &V) -> anyhow::Result<Outputs> {
        let tensor = self.image_to_tensor(image.as_view());
        self.nn.estimate(&Inputs::from(tensor))
    }

    fn image_to_tensor(&self, view: ImageView<'_>) -> Tensor {
        let (w, h) = (
            self.input_res.width() as usize,
            self.input_res.height() as usize,
        );
        let scale_x = view.width() / w as f32;
        let scale_y = view.height() / h as f32;

        let pixels = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| {
                let color = view.sample((x as f32 + 0.5) * scale_x, (y as f32 + 0.5) * scale_y);
                self.color_mapper.map(color)
            })
            .collect::<Vec<_>>();

        match self.shape {
            CnnInputShape::NCHW => {
                Tensor::from_array_shape_fn([1, 3, h, w], |[_, c, y, x]| pixels[y * w + x][c])
            }
            CnnInputShape::NHWC => {
                Tensor::from_array_shape_fn([1, h, w, 3], |[_, y, x, c]| pixels[y * w + x][c])
            }
        }
    }
}

/// Maps 8-bit RGBA image colors to RGB network input values.
///
/// The alpha channel is dropped.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    target_range: RangeInclusive<f32>,
}

impl ColorMapper {
    /// Creates a simple color mapper that uniformly maps sRGB values to `target_range`.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());

        Self { target_range }
    }

    fn map(&self, color: Color) -> [f32; 3] {
        let start = *self.target_range.start();
        let end = *self.target_range.end();

        let adjust_range = (end - start) / 255.0;
        [color.r(), color.g(), color.b()].map(|col| col as f32 * adjust_range + start)
    }
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

impl CnnInputShape {
    fn detect(tensor_shape: &[usize]) -> anyhow::Result<(Self, Resolution)> {
        let (shape, w, h) = match *tensor_shape {
            [1, 3, h, w] => (Self::NCHW, w, h),
            [1, h, w, 3] => (Self::NHWC, w, h),
            _ => bail!("invalid CNN input shape {:?}", tensor_shape),
        };

        let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
        Ok((shape, Resolution::new(w, h)))
    }
}

/// Neural network loader.
pub struct Loader {
    model_data: Vec<u8>,
    outputs: Option<Vec<usize>>,
}

impl Loader {
    /// Only compute the specified outputs during inference.
    ///
    /// This takes a list of network output indices. When called, the [`Outputs`] returned from
    /// [`NeuralNetwork::estimate`] will only contain the chosen output tensors, in the given
    /// order. Outputs that aren't selected are pruned from the graph and never computed.
    pub fn with_output_selection<O>(mut self, outputs: O) -> Self
    where
        O: Into<Vec<usize>>,
    {
        self.outputs = Some(outputs.into());
        self
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, or if
    /// the network uses unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*self.model_data)?
            .into_optimized()?;
        let outputs = graph.output_outlets()?;
        let selected_outputs = match &self.outputs {
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    outputs.get(i).copied().ok_or_else(|| {
                        anyhow!(
                            "output index {i} out of range (network has {} outputs)",
                            outputs.len()
                        )
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => outputs.to_vec(),
        };
        let plan = SimplePlan::new_for_outputs(graph, &selected_outputs)?;

        let model = plan.model();
        let inputs = model
            .input_outlets()?
            .iter()
            .enumerate()
            .map(|(id, outlet)| {
                let fact = model.input_fact(id)?;
                let shape = fact.shape.as_concrete().ok_or_else(|| {
                    anyhow!("network input {id} has symbolic shape {:?}", fact.shape)
                })?;
                Ok(InputInfo {
                    name: model.node(outlet.node).name.clone(),
                    shape: shape.to_vec(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(NeuralNetwork(Arc::new(NeuralNetworkImpl {
            inner: plan,
            inputs,
        })))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<NeuralNetworkImpl>);

struct NeuralNetworkImpl {
    inner: Model,
    inputs: Vec<InputInfo>,
}

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Loader> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl(path: &Path) -> anyhow::Result<Loader> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .with_context(|| format!("failed to read network '{}'", path.display()))?;
        Ok(Self::from_onnx(model_data))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: Vec<u8>) -> Loader {
        Loader {
            model_data: raw,
            outputs: None,
        }
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.0.inputs.len()
    }

    /// Runs the network on a set of [`Inputs`], returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let inputs = inputs
            .iter()
            .map(|t| Ok(TValue::from_const(Arc::new(t.to_tract()?))))
            .collect::<anyhow::Result<TVec<_>>>()?;
        let outputs = self.0.inner.run(inputs)?;
        let inner = outputs
            .iter()
            .map(|tract| Tensor::from_tract(tract))
            .collect::<anyhow::Result<TVec<_>>>()?;
        Ok(Outputs { inner })
    }
}

/// Name and concrete shape of a network input, read when the network is loaded.
#[derive(Debug, Clone)]
struct InputInfo {
    name: String,
    shape: Vec<usize>,
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: TVec<Tensor>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}

impl FromIterator<Tensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// List of input tensors for neural network inference.
#[derive(Debug)]
pub struct Inputs {
    inner: TVec<Tensor>,
}

impl Inputs {
    fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.inner.iter()
    }
}

impl From<Tensor> for Inputs {
    fn from(t: Tensor) -> Self {
        Self { inner: tvec![t] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.map(Color::from_rgb8(0, 0, 0)), [-1.0, -1.0, -1.0]);
        assert_eq!(mapper.map(Color::from_rgb8(255, 255, 255)), [1.0, 1.0, 1.0]);

        let mapper = ColorMapper::linear(0.0..=1.0);
        assert_eq!(mapper.map(Color::from_rgb8(255, 0, 0)), [1.0, 0.0, 0.0]);
        assert_eq!(mapper.map(Color::NULL), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn color_mapper_keeps_rgb_order() {
        let mapper = ColorMapper::linear(0.0..=1.0);
        assert_eq!(mapper.map(Color::from_rgb8(0, 0, 255)), [0.0, 0.0, 1.0]);
        assert_eq!(mapper.map(Color::from_rgb8(0, 255, 0)), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn input_shape_detection() {
        let (shape, res) = CnnInputShape::detect(&[1, 3, 256, 128]).unwrap();
        assert_eq!(shape, CnnInputShape::NCHW);
        assert_eq!(res, Resolution::new(128, 256));

        let (shape, res) = CnnInputShape::detect(&[1, 224, 224, 3]).unwrap();
        assert_eq!(shape, CnnInputShape::NHWC);
        assert_eq!(res, Resolution::new(224, 224));

        assert!(CnnInputShape::detect(&[1, 1, 224, 224]).is_err());
        assert!(CnnInputShape::detect(&[224, 224]).is_err());
    }

    #[test]
    fn loader_rejects_bad_files() {
        assert!(NeuralNetwork::from_path("model.tflite").is_err());
        assert!(NeuralNetwork::from_path("/nonexistent/model.onnx").is_err());
        assert!(NeuralNetwork::from_onnx(b"not a protobuf".to_vec())
            .load()
            .is_err());
    }
}
