pub mod capture;
pub mod composite;
pub mod config;
pub mod convert;
pub mod error;
pub mod frame;
pub mod mask;
pub mod output;
pub mod pipeline;
pub mod segmentation;

pub use config::PipelineConfig;
pub use error::{ClassifierError, ConversionError, FrameError, InitError, ResourceExhaustionError};
pub use frame::{I420Frame, Plane, Rotation};
pub use pipeline::{ControlHandle, FramePipeline, FrameProcessor, ProcessingMode};
