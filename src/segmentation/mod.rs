mod preprocess;
mod rvm;
mod slot;
pub mod types;

pub use preprocess::Preprocessor;
pub use rvm::RobustVideoMatting;
pub use slot::ClassifierSlot;
pub use types::{Polarity, RawMask, RawMaskData, Segmenter};

use std::path::Path;

use crate::error::InitError;

/// Create the default segmentation model (RVM) from an ONNX asset.
///
/// The asset must already be provisioned; a missing file fails fast
/// before ONNX Runtime is touched.
pub fn create_default_model(model_path: &Path) -> Result<Box<dyn Segmenter>, InitError> {
    if !model_path.is_file() {
        return Err(InitError::ModelNotFound(model_path.to_path_buf()));
    }
    let model = RobustVideoMatting::new(model_path).map_err(|reason| InitError::Classifier {
        path: model_path.to_path_buf(),
        reason,
    })?;
    Ok(Box::new(model))
}
