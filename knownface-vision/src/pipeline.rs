use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, FaceEmbedding, ALIGNED_SIZE};
use crate::model::{self, ModelPaths};

/// Anything that turns an image into zero or more face embeddings.
///
/// Faces are returned in a stable order (best detection first); callers that
/// need a single face take the first element.
pub trait FaceExtractor {
    fn extract(&mut self, img: &DynamicImage) -> Result<Vec<FaceEmbedding>>;
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    detector: Session,
    encoder: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            score_threshold,
            nms_threshold,
        })
    }
}

impl FaceExtractor for Pipeline {
    fn extract(&mut self, img: &DynamicImage) -> Result<Vec<FaceEmbedding>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let aligned =
                face::align_face(img, &detection, ALIGNED_SIZE).context("aligning face")?;
            let embedding =
                face::encode_face(&mut self.encoder, &aligned).context("encoding face")?;
            faces.push(FaceEmbedding {
                detection,
                embedding,
            });
        }
        Ok(faces)
    }
}
