//! YuNet post-processing.
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it emits four tensors,
//! `cls [1, N, 1]`, `obj [1, N, 1]`, `bbox [1, N, 4]` and `kps [1, N, 10]`,
//! where `N = (input / stride)^2`. Tensors arrive grouped by kind:
//! cls_8, cls_16, cls_32, obj_8, ..., kps_32.
//!
//! A grid cell `(row, col)` with deltas `(dx, dy, dw, dh)` decodes to
//! centre `((col + dx) * stride, (row + dy) * stride)` and size
//! `(dw * stride, dh * stride)`.

use anyhow::Result;
use ndarray::ArrayView2;

const STRIDES: [usize; 3] = [8, 16, 32];

/// Detection in coordinates normalised to the square detector input.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn tensor<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    index: usize,
    cells: usize,
    width: usize,
) -> Result<ArrayView2<'a, f32>> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing detector output {}", index))?;
    if shape.as_slice() != [1, cells as i64, width as i64] {
        anyhow::bail!(
            "detector output {} has shape {:?}, expected [1, {}, {}]",
            index,
            shape,
            cells,
            width
        );
    }
    Ok(ArrayView2::from_shape((cells, width), data.as_slice())?)
}

/// Decode the twelve YuNet outputs into detections scoring at least
/// `score_threshold` (score = sigmoid(cls * obj)).
pub fn decode(
    outputs: &[(Vec<i64>, Vec<f32>)],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();
    let n = STRIDES.len();
    let size = input_size as f32;

    for (level, &stride) in STRIDES.iter().enumerate() {
        let grid = input_size / stride;
        let cells = grid * grid;
        let cls = tensor(outputs, level, cells, 1)?;
        let obj = tensor(outputs, n + level, cells, 1)?;
        let bbox = tensor(outputs, 2 * n + level, cells, 4)?;
        let kps = tensor(outputs, 3 * n + level, cells, 10)?;
        let step = stride as f32;

        for idx in 0..cells {
            let score = sigmoid(cls[[idx, 0]] * obj[[idx, 0]]);
            if score < score_threshold {
                continue;
            }
            let row = (idx / grid) as f32;
            let col = (idx % grid) as f32;

            let cx = (col + bbox[[idx, 0]]) * step / size;
            let cy = (row + bbox[[idx, 1]]) * step / size;
            let w = bbox[[idx, 2]] * step / size;
            let h = bbox[[idx, 3]] * step / size;

            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + kps[[idx, k * 2]]) * step / size;
                landmarks[k * 2 + 1] = (row + kps[[idx, k * 2 + 1]]) * step / size;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}
