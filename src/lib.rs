pub mod config;
pub mod lock;
pub mod matcher;
pub mod service;
pub mod snapshot;
pub mod storage;

// Re-export vision types for convenience
pub use knownface_vision::{
    face, video, Detection, Embedding, FaceEmbedding, FaceExtractor, Pipeline,
};

pub use matcher::{Matcher, Recognition};
pub use service::{AddOutcome, FaceService, ImportReport};
pub use snapshot::GallerySnapshot;
pub use storage::{Gallery, GalleryStore, StoreError};
