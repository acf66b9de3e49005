use std::fmt;

use crate::{storage::Gallery, Embedding};

pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Outcome of recognising one face.
///
/// `confidence` is `1 - distance`, a closeness heuristic rather than a
/// probability.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Known { name: String, confidence: f32 },
    Unknown,
    NoFaceDetected,
    EmptyGallery,
}

impl Recognition {
    pub fn label(&self) -> &str {
        match self {
            Recognition::Known { name, .. } => name,
            Recognition::Unknown => "Unknown",
            Recognition::NoFaceDetected => "No face detected",
            Recognition::EmptyGallery => "No faces in database yet",
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Recognition::Known { confidence, .. } => *confidence,
            _ => 0.0,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Recognition::Known { .. })
    }
}

impl fmt::Display for Recognition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recognition::Known { name, confidence } => write!(f, "{} ({:.2})", name, confidence),
            other => f.write_str(other.label()),
        }
    }
}

pub fn match_embedding(a: &Embedding, b: &Embedding) -> Option<f32> {
    knownface_vision::face::euclidean_distance(a, b)
}

/// Nearest-neighbour matcher with an exclusive distance threshold.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    threshold: f32,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl Matcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Closest gallery entry and its distance. On equal distances the name
    /// that sorts first wins. Entries of a different dimension are skipped.
    pub fn nearest<'g>(&self, gallery: &'g Gallery, probe: &Embedding) -> Option<(&'g str, f32)> {
        let mut best: Option<(&'g str, f32)> = None;
        for (name, known) in gallery {
            let Some(distance) = match_embedding(known, probe) else {
                log::warn!(
                    "skipping {:?}: embedding has {} dims, probe has {}",
                    name,
                    known.dim(),
                    probe.dim()
                );
                continue;
            };
            match best {
                Some((_, d)) if d <= distance => {}
                _ if distance.is_nan() => {}
                _ => best = Some((name.as_str(), distance)),
            }
        }
        best
    }

    pub fn recognize(&self, gallery: &Gallery, probe: &Embedding) -> Recognition {
        if gallery.is_empty() {
            return Recognition::EmptyGallery;
        }
        match self.nearest(gallery, probe) {
            Some((name, distance)) if distance < self.threshold => {
                log::debug!("matched {:?} at distance {:.4}", name, distance);
                Recognition::Known {
                    name: name.to_string(),
                    confidence: (1.0 - distance).clamp(0.0, 1.0),
                }
            }
            Some((name, distance)) => {
                log::debug!(
                    "nearest {:?} at {:.4} is beyond threshold {:.4}",
                    name,
                    distance,
                    self.threshold
                );
                Recognition::Unknown
            }
            None => Recognition::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 128;

    fn ramp(start: f32, step: f32) -> Embedding {
        Embedding::from_vec((0..DIM).map(|i| start + step * i as f32).collect())
    }

    fn shifted(base: &Embedding, by: f32) -> Embedding {
        let mut v = base.to_vec();
        v[0] += by;
        Embedding::from_vec(v)
    }

    fn alice_and_bob() -> Gallery {
        let mut g = Gallery::new();
        g.insert("Alice".into(), ramp(0.1, 0.001));
        g.insert("Bob".into(), ramp(0.9, -0.001));
        g
    }

    #[test]
    fn empty_gallery() {
        let r = Matcher::default().recognize(&Gallery::new(), &ramp(0.0, 0.0));
        assert_eq!(r, Recognition::EmptyGallery);
        assert_eq!(r.label(), "No faces in database yet");
        assert_eq!(r.confidence(), 0.0);
    }

    #[test]
    fn exact_member_matches_fully() {
        let gallery = alice_and_bob();
        for (name, emb) in &gallery {
            let r = Matcher::default().recognize(&gallery, emb);
            assert_eq!(
                r,
                Recognition::Known {
                    name: name.clone(),
                    confidence: 1.0
                }
            );
        }
    }

    #[test]
    fn near_alice() {
        let gallery = alice_and_bob();
        let probe = shifted(&gallery["Alice"], 0.12);
        let r = Matcher::default().recognize(&gallery, &probe);
        assert_eq!(r.label(), "Alice");
        assert!((r.confidence() - 0.88).abs() < 1e-4);
        assert_eq!(r.to_string(), "Alice (0.88)");
    }

    #[test]
    fn far_from_everyone() {
        let mut gallery = Gallery::new();
        gallery.insert("Alice".into(), Embedding::from_vec(vec![0.0, 0.0]));
        gallery.insert("Bob".into(), Embedding::from_vec(vec![1.4, 0.0]));

        let r = Matcher::default().recognize(&gallery, &Embedding::from_vec(vec![0.7, 0.0]));
        assert_eq!(r, Recognition::Unknown);
        assert_eq!(r.label(), "Unknown");
        assert_eq!(r.confidence(), 0.0);
    }

    #[test]
    fn threshold_is_exclusive_and_configurable() {
        let mut gallery = Gallery::new();
        gallery.insert("Alice".into(), Embedding::from_vec(vec![0.0]));
        let probe = Embedding::from_vec(vec![0.5]);

        assert_eq!(Matcher::new(0.5).recognize(&gallery, &probe), Recognition::Unknown);
        let r = Matcher::new(0.6).recognize(&gallery, &probe);
        assert_eq!(r.label(), "Alice");
        assert!((r.confidence() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ties_go_to_first_name() {
        let mut gallery = Gallery::new();
        gallery.insert("Zed".into(), Embedding::from_vec(vec![1.0, 0.0]));
        gallery.insert("Amy".into(), Embedding::from_vec(vec![-1.0, 0.0]));
        gallery.insert("Max".into(), Embedding::from_vec(vec![0.0, 1.0]));

        let origin = Embedding::from_vec(vec![0.0, 0.0]);
        let (name, distance) = Matcher::default().nearest(&gallery, &origin).unwrap();
        assert_eq!(name, "Amy");
        assert_eq!(distance, 1.0);
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let mut gallery = Gallery::new();
        gallery.insert("Old".into(), Embedding::from_vec(vec![0.0; 64]));
        gallery.insert("New".into(), ramp(0.0, 0.0));

        let r = Matcher::default().recognize(&gallery, &ramp(0.0, 0.0));
        assert_eq!(r.label(), "New");

        let mut only_old = Gallery::new();
        only_old.insert("Old".into(), Embedding::from_vec(vec![0.0; 64]));
        assert_eq!(
            Matcher::default().recognize(&only_old, &ramp(0.0, 0.0)),
            Recognition::Unknown
        );
    }

    #[test]
    fn confidence_never_negative() {
        let mut gallery = Gallery::new();
        gallery.insert("Alice".into(), Embedding::from_vec(vec![0.0]));
        let r = Matcher::new(3.0).recognize(&gallery, &Embedding::from_vec(vec![2.0]));
        assert!(r.is_known());
        assert_eq!(r.confidence(), 0.0);
    }
}
