use anyhow::Result;
use knownface_vision::{FaceEmbedding, FaceExtractor, ModelPaths, Pipeline};
use std::path::PathBuf;

#[test]
fn test_pipeline_reports_missing_models() {
    env_logger::try_init().ok();
    let paths = ModelPaths {
        detector: PathBuf::from("does/not/exist/yunet.onnx"),
        recognizer: PathBuf::from("does/not/exist/sface.onnx"),
    };

    let err = match Pipeline::new(&paths, 0.6, 0.3) {
        Ok(_) => panic!("pipeline should not load without models"),
        Err(e) => e,
    };
    let message = format!("{:#}", err);
    assert!(message.contains("detector model not found"), "{}", message);
}

#[test]
fn test_pipeline_with_models() -> Result<()> {
    // Runs only when the ONNX models have been placed under models/.
    let paths = ModelPaths {
        detector: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
        recognizer: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
    };
    if !paths.detector.exists() || !paths.recognizer.exists() {
        eprintln!("Skipping: models not found");
        return Ok(());
    }

    let mut pipeline = Pipeline::new(&paths, 0.6, 0.3)?;
    // an all-black frame has no faces in it
    let blank = image::DynamicImage::new_rgb8(320, 240);
    let faces: Vec<FaceEmbedding> = pipeline.extract(&blank)?;
    assert!(faces.is_empty());
    Ok(())
}
