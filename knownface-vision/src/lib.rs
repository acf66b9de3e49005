//! Face extraction backend: YuNet detection, landmark alignment and SFace
//! encoding over ONNX Runtime, plus a V4L2 camera source.

pub mod face;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

pub use face::{euclidean_distance, Detection, Embedding, FaceEmbedding};
pub use model::ModelPaths;
pub use pipeline::{FaceExtractor, Pipeline};
pub use video::Camera;
