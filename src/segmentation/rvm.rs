use super::preprocess::Preprocessor;
use super::types::{Polarity, RawMask, Segmenter};
use crate::error::ClassifierError;
use anyhow::{bail, Context, Result};
use image::RgbaImage;
use ndarray::Array4;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
/// The matte it returns is a confidence mask at model resolution; scaling
/// to frame size happens in the mask post-processor.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,

    // Recurrent hidden states
    // These are updated after each inference and fed back in the next frame
    recurrent: [Array4<f32>; 4],

    // Downsample ratio for hidden states
    downsample_ratio: f32,
}

const STATE_INPUTS: [&str; 4] = ["r1i", "r2i", "r3i", "r4i"];
const STATE_OUTPUTS: [&str; 4] = ["r1o", "r2o", "r3o", "r4o"];

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    ///
    /// # Default Configuration
    /// - Input size: 512x512 (can be adjusted for performance/quality tradeoff)
    /// - Downsample ratio: 0.25 (hidden states are 1/4 of input resolution)
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()
            .context("failed to create ORT session builder")?
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .context("failed to register execution providers")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set optimization level")?
            .with_intra_threads(4)
            .context("failed to set intra-op threads")?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        Ok(Self {
            session,
            // 512x512 input: good balance of quality and performance
            preprocessor: Preprocessor::new(512, 512),
            recurrent: initial_states(),
            downsample_ratio: 0.25,
        })
    }

    /// Returns the raw `pha` shape and values.
    fn run(&mut self, frame: &RgbaImage) -> Result<(Vec<i64>, Vec<f32>)> {
        let input = self.preprocessor.preprocess(frame);

        let [r1, r2, r3, r4] = &self.recurrent;
        let inputs = ort::inputs![
            "src" => to_tensor(&input)?,
            STATE_INPUTS[0] => to_tensor(r1)?,
            STATE_INPUTS[1] => to_tensor(r2)?,
            STATE_INPUTS[2] => to_tensor(r3)?,
            STATE_INPUTS[3] => to_tensor(r4)?,
            "downsample_ratio" => Tensor::from_array(([1usize], vec![self.downsample_ratio].into_boxed_slice()))?.into_dyn(),
        ];

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(inputs)
            .context("Failed to run inference")?;
        drop(_infer_span);

        // Outputs: fgr (foreground), pha (alpha), r1o..r4o.
        // Only the matte and the updated hidden states are needed.
        let mut next = initial_states();
        for (slot, name) in next.iter_mut().zip(STATE_OUTPUTS) {
            let (shape, data) = outputs[name]
                .try_extract_tensor::<f32>()
                .with_context(|| format!("failed to extract {name}"))?;
            let dims = dims4(shape.iter().copied())?;
            *slot = Array4::from_shape_vec(dims, data.to_vec())?;
        }

        let (shape, data) = outputs["pha"]
            .try_extract_tensor::<f32>()
            .context("failed to extract pha")?;
        let matte = (shape.iter().copied().collect(), data.to_vec());

        self.recurrent = next;
        Ok(matte)
    }
}

/// Interpret the `pha` output as a single-channel confidence matte.
fn matte_from_output(shape: &[i64], data: Vec<f32>) -> Result<RawMask, ClassifierError> {
    let (n, c, height, width) = dims4(shape.iter().copied())
        .map_err(|err| ClassifierError::MalformedOutput(err.to_string()))?;
    if n != 1 || c != 1 {
        return Err(ClassifierError::MalformedOutput(format!(
            "expected a single matte, got shape {shape:?}"
        )));
    }
    if data.len() != width * height {
        return Err(ClassifierError::MalformedOutput(format!(
            "matte is {width}x{height} but holds {} values",
            data.len()
        )));
    }
    Ok(RawMask::confidence(
        width as u32,
        height as u32,
        data,
        Polarity::SubjectHigh,
    ))
}

/// Zero hidden states; RVM accepts [1, 1, 1, 1] placeholders on the first frame.
fn initial_states() -> [Array4<f32>; 4] {
    std::array::from_fn(|_| Array4::zeros((1, 1, 1, 1)))
}

fn to_tensor(array: &Array4<f32>) -> Result<DynValue> {
    let (n, c, h, w) = array.dim();
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Tensor::from_array(([n, c, h, w], data.into_boxed_slice()))
        .context("failed to create input tensor")?
        .into_dyn())
}

fn dims4(shape: impl Iterator<Item = i64>) -> Result<(usize, usize, usize, usize)> {
    let dims: Vec<usize> = shape.map(|d| d.max(0) as usize).collect();
    match dims.as_slice() {
        [n, c, h, w] => Ok((*n, *c, *h, *w)),
        other => bail!("expected a rank-4 tensor, got shape {other:?}"),
    }
}

impl Segmenter for RobustVideoMatting {
    fn segment(
        &mut self,
        frame: &RgbaImage,
        _timestamp_ms: u64,
    ) -> Result<Option<RawMask>, ClassifierError> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let (shape, data) = self.run(frame).map_err(ClassifierError::Invocation)?;
        let mask = matte_from_output(&shape, data)?;
        if mask.is_empty() {
            return Ok(None);
        }
        Ok(Some(mask))
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.recurrent = initial_states();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matte_output_becomes_a_confidence_mask() {
        let mask = matte_from_output(&[1, 1, 2, 3], vec![0.5; 6]).unwrap();
        assert_eq!((mask.width, mask.height), (3, 2));
        assert_eq!(mask.len(), 6);
    }

    #[test]
    fn empty_matte_is_not_malformed() {
        let mask = matte_from_output(&[1, 1, 0, 0], Vec::new()).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn malformed_mattes_are_reported() {
        for (shape, len) in [
            (vec![1, 2, 2], 4),
            (vec![1, 1, 2, 2], 3),
            (vec![1, 3, 2, 2], 12),
        ] {
            let err = matte_from_output(&shape, vec![0.0; len]).unwrap_err();
            assert!(
                matches!(err, ClassifierError::MalformedOutput(_)),
                "{shape:?}: {err}"
            );
        }
    }
}
