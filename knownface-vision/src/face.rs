use crate::yunet;
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet runs on a fixed square input.
const DETECTOR_INPUT: u32 = 640;
/// SFace input edge; the reference landmarks below are expressed in this frame.
pub const ALIGNED_SIZE: u32 = 112;

const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// A detected face in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Identity signature of one face. L2-normalised when produced by SFace.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

/// One face found in an image together with its embedding.
#[derive(Debug, Clone)]
pub struct FaceEmbedding {
    pub detection: Detection,
    pub embedding: Embedding,
}

/// L2 distance between two embeddings, or `None` when their dimensions differ.
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> Option<f32> {
    if a.dim() != b.dim() {
        return None;
    }
    let diff = &a.vector - &b.vector;
    Some(diff.dot(&diff).sqrt())
}

/// Placement of the source image inside the square detector canvas.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> (Self, u32, u32) {
        let scale = target as f32 / width.max(height) as f32;
        let new_w = ((width as f32 * scale) as u32).clamp(1, target);
        let new_h = ((height as f32 * scale) as u32).clamp(1, target);
        let lb = Self {
            scale,
            offset_x: ((target - new_w) / 2) as f32,
            offset_y: ((target - new_h) / 2) as f32,
        };
        (lb, new_w, new_h)
    }

    /// Map a normalised canvas coordinate back into source pixels.
    fn unmap(&self, nx: f32, ny: f32, target: u32) -> (f32, f32) {
        (
            (nx * target as f32 - self.offset_x) / self.scale,
            (ny * target as f32 - self.offset_y) / self.scale,
        )
    }

    fn unmap_len(&self, n: f32, target: u32) -> f32 {
        n * target as f32 / self.scale
    }
}

/// Pack an RGB image into a `[1, 3, H, W]` BGR float tensor with values in [0, 255].
fn bgr_planes(rgb: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = rgb.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, px) in rgb.pixels().enumerate() {
        data[i] = px[2] as f32;
        data[plane + i] = px[1] as f32;
        data[2 * plane + i] = px[0] as f32;
    }
    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces with YuNet. Results are in source pixels, ordered by
/// descending score once NMS has run.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("empty image");
    }
    let (lb, new_w, new_h) = Letterbox::fit(width, height, DETECTOR_INPUT);
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);
    let mut canvas = DynamicImage::new_rgb8(DETECTOR_INPUT, DETECTOR_INPUT);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        lb.offset_x as i64,
        lb.offset_y as i64,
    );

    let input = Value::from_array(bgr_planes(&canvas.to_rgb8())?)?;
    let outputs = session.run(ort::inputs![input])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(12);
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let raw = yunet::decode(&tensors, DETECTOR_INPUT as usize, score_threshold)
        .context("decoding detector output")?;

    let mut detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = lb.unmap(d.bbox[0], d.bbox[1], DETECTOR_INPUT);
            let mut landmarks = [0.0f32; 10];
            for (k, pair) in d.landmarks.chunks_exact(2).enumerate() {
                let (lx, ly) = lb.unmap(pair[0], pair[1], DETECTOR_INPUT);
                landmarks[k * 2] = lx;
                landmarks[k * 2 + 1] = ly;
            }
            Detection {
                bbox: [
                    x,
                    y,
                    lb.unmap_len(d.bbox[2], DETECTOR_INPUT),
                    lb.unmap_len(d.bbox[3], DETECTOR_INPUT),
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    } else {
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    }
    log::debug!("detected {} face(s)", detections.len());

    Ok(detections)
}

/// Greedy non-maximum suppression. Output is sorted by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotation + uniform scale + translation taking source pixels to the aligned crop.
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Option<Self> {
        let (dx, dy) = (right.0 - left.0, right.1 - left.1);
        let eye_dist = (dx * dx + dy * dy).sqrt();
        if eye_dist <= f32::EPSILON {
            return None;
        }
        let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
            + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
        .sqrt();
        let unit = size as f32 / ALIGNED_SIZE as f32;
        let scale = unit * ref_dist / eye_dist;
        let angle = dy.atan2(dx);

        let a = scale * angle.cos();
        let b = scale * angle.sin();
        let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let target = (
            (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
            (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
        );
        // forward map: [a b; -b a] * p + t
        Some(Self {
            a,
            b,
            tx: target.0 - (a * center.0 + b * center.1),
            ty: target.1 - (-b * center.0 + a * center.1),
        })
    }

    fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        let (px, py) = (x - self.tx, y - self.ty);
        let det = self.a * self.a + self.b * self.b;
        ((self.a * px - self.b * py) / det, (self.b * px + self.a * py) / det)
    }
}

fn bilinear(img: &RgbImage, x: f32, y: f32) -> image::Rgb<u8> {
    let (w, h) = img.dimensions();
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let weights = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x1, y0, fx * (1.0 - fy)),
        (x0, y1, (1.0 - fx) * fy),
        (x1, y1, fx * fy),
    ];
    let mut acc = [0.0f32; 3];
    for (px, py, wgt) in weights {
        let p = img.get_pixel(px, py);
        for c in 0..3 {
            acc[c] += p[c] as f32 * wgt;
        }
    }
    image::Rgb([acc[0] as u8, acc[1] as u8, acc[2] as u8])
}

/// Warp the face so its eyes land on the SFace reference positions.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let lm = &detection.landmarks;
    let transform = Similarity::from_eyes((lm[0], lm[1]), (lm[2], lm[3]), size)
        .context("degenerate eye landmarks")?;

    let src = img.to_rgb8();
    let (w, h) = src.dimensions();
    let mut out = RgbImage::new(size, size);
    for (ox, oy, px) in out.enumerate_pixels_mut() {
        let (ix, iy) = transform.inverse(ox as f32, oy as f32);
        if ix >= 0.0 && iy >= 0.0 && ix < w as f32 && iy < h as f32 {
            *px = bilinear(&src, ix, iy);
        }
    }
    Ok(DynamicImage::ImageRgb8(out))
}

/// Run SFace on an aligned crop and L2-normalise the output.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face = face_img
        .resize_exact(
            ALIGNED_SIZE,
            ALIGNED_SIZE,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();

    let input = Value::from_array(bgr_planes(&face)?)?;
    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || dim > data.len() {
        anyhow::bail!("unexpected encoder output shape {:?}", shape);
    }

    let mut vector = Array1::from_vec(data[..dim].to_vec());
    let norm = vector.dot(&vector).sqrt();
    if norm > 0.0 {
        vector.mapv_inplace(|x| x / norm);
    }
    Ok(Embedding { vector })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_and_disjoint() {
        let detections = vec![
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_distance() {
        let a = Embedding::from_vec(vec![0.0, 0.0, 0.0]);
        let b = Embedding::from_vec(vec![3.0, 4.0, 0.0]);
        assert_eq!(euclidean_distance(&a, &b), Some(5.0));
        assert_eq!(euclidean_distance(&a, &a), Some(0.0));

        let short = Embedding::from_vec(vec![1.0]);
        assert_eq!(euclidean_distance(&a, &short), None);
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let (lb, w, h) = Letterbox::fit(1280, 720, DETECTOR_INPUT);
        assert_eq!(w, 640);
        assert_eq!(h, 360);
        assert_eq!(lb.offset_y, 140.0);

        // canvas centre maps back to image centre
        let (x, y) = lb.unmap(0.5, 0.5, DETECTOR_INPUT);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_similarity_places_eyes_on_reference() {
        let left = (100.0, 120.0);
        let right = (160.0, 130.0);
        let t = Similarity::from_eyes(left, right, ALIGNED_SIZE).unwrap();

        let forward = |p: (f32, f32)| {
            (
                t.a * p.0 + t.b * p.1 + t.tx,
                -t.b * p.0 + t.a * p.1 + t.ty,
            )
        };
        let (lx, ly) = forward(left);
        let (rx, ry) = forward(right);
        // eye midpoint lands on the reference midpoint and the eye line is level
        assert!(((lx + rx) / 2.0 - 55.9).abs() < 1e-3);
        assert!(((ly + ry) / 2.0 - 51.6).abs() < 1e-3);
        assert!((ly - ry).abs() < 1e-3);

        let (ix, iy) = t.inverse(lx, ly);
        assert!((ix - left.0).abs() < 1e-3);
        assert!((iy - left.1).abs() < 1e-3);
    }

    #[test]
    fn test_similarity_rejects_coincident_eyes() {
        assert!(Similarity::from_eyes((5.0, 5.0), (5.0, 5.0), ALIGNED_SIZE).is_none());
    }
}
