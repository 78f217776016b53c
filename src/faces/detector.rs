//! Three-stage cascade: proposal, refine, output.
//!
//! Each stage is a free function taking the previous stage's boxes and
//! returning its own, so stages can be run and tested in isolation. The
//! [`Cascade`] type only threads values between them.

use image::DynamicImage;
use ndarray::{Array3, Array4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::candidates::generate_candidates;
use super::classifier::{BatchClassifier, ProposalClassifier, FACE_CLASS};
use super::geometry::{Candidate, Face, Rect};
use super::landmarks::{decode_landmarks, LANDMARK_OFFSETS};
use super::nms::{suppress, Overlap};
use super::preprocess::CascadeImage;
use super::pyramid::build_scales;
use super::Stage;
use crate::error::{CascadeError, Result};

/// IoU threshold inside a single pyramid level.
const LEVEL_NMS_THRESHOLD: f32 = 0.5;
/// Threshold for the suppression passes between stages.
const STAGE_NMS_THRESHOLD: f32 = 0.7;

/// Tunable detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionParams {
    /// Smallest face to look for, in source pixels.
    #[serde(default = "default_min_face_size")]
    pub min_face_size: f32,

    /// Pyramid decay between consecutive scales.
    #[serde(default = "default_factor")]
    pub factor: f32,

    /// Face-confidence thresholds for the proposal, refine and output networks.
    #[serde(default = "default_thresholds")]
    pub thresholds: [f32; 3],
}

fn default_min_face_size() -> f32 {
    40.0
}

fn default_factor() -> f32 {
    0.709
}

fn default_thresholds() -> [f32; 3] {
    [0.6, 0.7, 0.7]
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_face_size: default_min_face_size(),
            factor: default_factor(),
            thresholds: default_thresholds(),
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_face_size > 0.0) {
            return Err(CascadeError::InvalidParams(format!(
                "min_face_size must be positive, got {}",
                self.min_face_size
            )));
        }
        if !(self.factor > 0.0 && self.factor < 1.0) {
            return Err(CascadeError::InvalidParams(format!(
                "factor must be in (0, 1), got {}",
                self.factor
            )));
        }
        if let Some(t) = self.thresholds.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(CascadeError::InvalidParams(format!(
                "thresholds must be in [0, 1], got {}",
                t
            )));
        }
        Ok(())
    }
}

/// A face detector built from the three cascade networks.
pub struct Cascade<P, R, O> {
    proposal: P,
    refine: R,
    output: O,
    params: DetectionParams,
}

impl<P, R, O> Cascade<P, R, O>
where
    P: ProposalClassifier,
    R: BatchClassifier,
    O: BatchClassifier,
{
    pub fn new(proposal: P, refine: R, output: O, params: DetectionParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            proposal,
            refine,
            output,
            params,
        })
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Detect faces in a decoded image.
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Face>> {
        let image = CascadeImage::from_image(img);
        self.detect_in(&image)
    }

    /// Decode the image at `path` and detect faces in it.
    pub fn detect_path(&mut self, path: &Path) -> Result<Vec<Face>> {
        let img = image::open(path)?;
        self.detect(&img)
    }

    /// Detect faces in an image already in the pipeline frame.
    ///
    /// An empty result is a normal outcome; errors mean a classifier returned
    /// output the cascade cannot interpret.
    pub fn detect_in(&mut self, image: &CascadeImage) -> Result<Vec<Face>> {
        let [_, refine_threshold, output_threshold] = self.params.thresholds;

        let proposals = propose(&mut self.proposal, image, &self.params)?;
        if proposals.is_empty() {
            debug!(stage = %Stage::Propose, "No candidates left");
            return Ok(Vec::new());
        }

        let refined = refine(&mut self.refine, image, &proposals, refine_threshold)?;
        if refined.is_empty() {
            debug!(stage = %Stage::Refine, "No candidates left");
            return Ok(Vec::new());
        }

        let faces = finalize(&mut self.output, image, &refined, output_threshold)?;
        info!(
            width = image.width(),
            height = image.height(),
            faces = faces.len(),
            "Face detection complete"
        );
        Ok(faces)
    }
}

/// Run the proposal network over the scale pyramid.
///
/// Returns squared, padded boxes ready to be cropped for the refine stage.
pub fn propose<P: ProposalClassifier>(
    net: &mut P,
    image: &CascadeImage,
    params: &DetectionParams,
) -> Result<Vec<Rect>> {
    let scales = build_scales(params.min_face_size, params.factor, image.min_dimension())?;

    let mut total = Vec::new();
    for scale in scales {
        let (input, width, height) = image.scaled_tensor(scale);
        let output = net.infer(input)?;
        let candidates = generate_candidates(
            output.confidence.view(),
            output.regression.view(),
            width,
            height,
            scale,
            params.thresholds[0],
        )?;
        let kept = suppress(candidates, LEVEL_NMS_THRESHOLD, Overlap::Union);
        debug!(scale, width, height, candidates = kept.len(), "Pyramid level done");
        total.extend(kept);
    }

    let merged = suppress(total, STAGE_NMS_THRESHOLD, Overlap::Union);
    debug!(stage = %Stage::Propose, candidates = merged.len(), "Stage done");
    Ok(square_and_pad(&merged, image))
}

/// Re-score proposal boxes with the refine network.
pub fn refine<R: BatchClassifier>(
    net: &mut R,
    image: &CascadeImage,
    rects: &[Rect],
    threshold: f32,
) -> Result<Vec<Rect>> {
    let candidates = classify_crops(net, image, rects, threshold, Stage::Refine)?;
    let kept = suppress(candidates, STAGE_NMS_THRESHOLD, Overlap::Union);
    debug!(stage = %Stage::Refine, candidates = kept.len(), "Stage done");
    Ok(square_and_pad(&kept, image))
}

/// Run the output network and produce final faces with landmarks.
pub fn finalize<O: BatchClassifier>(
    net: &mut O,
    image: &CascadeImage,
    rects: &[Rect],
    threshold: f32,
) -> Result<Vec<Face>> {
    let candidates = classify_crops(net, image, rects, threshold, Stage::Output)?;
    let faces: Vec<Face> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let rect = candidate.regressed();
            candidate.landmarks.map(|landmarks| Face { rect, landmarks })
        })
        .collect();

    let kept = suppress(faces, STAGE_NMS_THRESHOLD, Overlap::Minimum);
    debug!(stage = %Stage::Output, faces = kept.len(), "Stage done");
    Ok(kept)
}

fn square_and_pad(candidates: &[Candidate], image: &CascadeImage) -> Vec<Rect> {
    candidates
        .iter()
        .map(|c| c.regressed().to_square().pad(image.width(), image.height()))
        .collect()
}

/// Crop every rect, classify the batch in one call and keep the crops whose
/// face confidence exceeds `threshold`.
fn classify_crops<C: BatchClassifier>(
    net: &mut C,
    image: &CascadeImage,
    rects: &[Rect],
    threshold: f32,
    stage: Stage,
) -> Result<Vec<Candidate>> {
    let size = net.input_size();
    let crops: Vec<(Rect, Array3<f32>)> = rects
        .par_iter()
        .filter_map(|rect| image.crop_tensor(rect, size).map(|crop| (*rect, crop)))
        .collect();

    if crops.len() < rects.len() {
        debug!(stage = %stage, dropped = rects.len() - crops.len(), "Skipped boxes outside the image");
    }
    if crops.is_empty() {
        return Ok(Vec::new());
    }

    let side = size as usize;
    let mut batch = Array4::<f32>::zeros((crops.len(), 3, side, side));
    for (mut slot, (_, crop)) in batch.outer_iter_mut().zip(&crops) {
        slot.assign(crop);
    }

    let needs_landmarks = stage == Stage::Output;
    let output = net.batch_infer(batch)?;
    output.validate(stage, crops.len(), needs_landmarks)?;

    let mut candidates = Vec::new();
    for (i, (rect, _)) in crops.iter().enumerate() {
        let score = output.confidence[[i, FACE_CLASS]];
        if !(score > threshold) {
            continue;
        }

        let rect = Rect { score, ..*rect };
        let reg = output.regression.row(i);
        let mut candidate = Candidate::new(rect, [reg[0], reg[1], reg[2], reg[3]]);

        if let (true, Some(marks)) = (needs_landmarks, &output.landmarks) {
            let row = marks.row(i);
            let offsets: [f32; LANDMARK_OFFSETS] = std::array::from_fn(|k| row[k]);
            candidate.landmarks = Some(decode_landmarks(&rect, &offsets));
        }

        candidates.push(candidate);
    }

    debug!(stage = %stage, crops = crops.len(), passed = candidates.len(), "Classified crops");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::candidates::feature_map_size;
    use crate::faces::classifier::{BatchOutput, ProposalOutput};
    use image::{Rgb, RgbImage};
    use ndarray::Array2;

    /// Proposal net that lights up cell (0, 0) with a per-call score.
    struct ScriptedProposal {
        scores: Vec<f32>,
        calls: usize,
        broken: bool,
    }

    impl ScriptedProposal {
        fn new(scores: Vec<f32>) -> Self {
            Self { scores, calls: 0, broken: false }
        }
    }

    impl ProposalClassifier for ScriptedProposal {
        fn infer(&mut self, input: Array4<f32>) -> Result<ProposalOutput> {
            let shape = input.shape();
            assert_eq!(&shape[..2], &[1, 3]);
            let mut w = feature_map_size(shape[3] as u32);
            let h = feature_map_size(shape[2] as u32);
            if self.broken {
                w += 1;
            }
            let mut confidence = Array3::<f32>::zeros((2, h, w));
            confidence[[1, 0, 0]] = self.scores.get(self.calls).copied().unwrap_or(0.0);
            self.calls += 1;
            Ok(ProposalOutput {
                confidence,
                regression: Array3::zeros((4, h, w)),
            })
        }
    }

    /// Batch net returning fixed per-item scores and deltas.
    struct ScriptedBatch {
        size: u32,
        scores: Vec<f32>,
        delta: [f32; 4],
        landmarks: bool,
        batches: Vec<Vec<usize>>,
    }

    impl ScriptedBatch {
        fn new(size: u32, scores: Vec<f32>, landmarks: bool) -> Self {
            Self {
                size,
                scores,
                delta: [0.0; 4],
                landmarks,
                batches: Vec::new(),
            }
        }
    }

    impl BatchClassifier for ScriptedBatch {
        fn input_size(&self) -> u32 {
            self.size
        }

        fn batch_infer(&mut self, batch: Array4<f32>) -> Result<BatchOutput> {
            let n = batch.shape()[0];
            self.batches.push(batch.shape().to_vec());
            let scores = self.scores.clone();
            let delta = self.delta;
            Ok(BatchOutput {
                confidence: Array2::from_shape_fn((n, 2), |(i, c)| {
                    let p = scores.get(i).copied().unwrap_or(0.0);
                    if c == FACE_CLASS { p } else { 1.0 - p }
                }),
                regression: Array2::from_shape_fn((n, 4), |(_, c)| delta[c]),
                landmarks: self
                    .landmarks
                    .then(|| Array2::from_elem((n, LANDMARK_OFFSETS), 0.5)),
            })
        }
    }

    fn square_image(side: u32) -> CascadeImage {
        CascadeImage::from_rgb(&RgbImage::from_pixel(side, side, Rgb([120, 90, 60])))
    }

    fn params() -> DetectionParams {
        DetectionParams {
            min_face_size: 24.0,
            factor: 0.5,
            thresholds: [0.6, 0.7, 0.7],
        }
    }

    #[test]
    fn test_propose_merges_levels() {
        let image = square_image(48);
        let mut net = ScriptedProposal::new(vec![0.9, 0.8]);
        let rects = propose(&mut net, &image, &params()).unwrap();

        assert_eq!(net.calls, 2);
        assert_eq!(
            rects,
            vec![
                Rect::new(2.0, 2.0, 24.0, 24.0, 0.9),
                Rect::new(4.0, 4.0, 48.0, 48.0, 0.8),
            ]
        );
    }

    #[test]
    fn test_full_cascade() {
        let image = square_image(48);
        let proposal = ScriptedProposal::new(vec![0.9, 0.8]);
        let refine = ScriptedBatch::new(24, vec![0.95, 0.3], false);
        let mut output = ScriptedBatch::new(48, vec![0.99], true);
        output.delta = [0.1, 0.0, 0.0, 0.0];

        let mut cascade = Cascade::new(proposal, refine, output, params()).unwrap();
        let faces = cascade.detect_in(&image).unwrap();

        assert_eq!(cascade.refine.batches, vec![vec![2, 3, 24, 24]]);
        assert_eq!(cascade.output.batches, vec![vec![1, 3, 48, 48]]);

        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert!((face.rect.score - 0.99).abs() < 1e-6);
        assert!((face.rect.x1 - 2.0).abs() < 1e-5);
        // y1 moves by regh * 0.1 = 22 * 0.1
        assert!((face.rect.y1 - 4.2).abs() < 1e-5);
        assert!((face.rect.x2 - 24.0).abs() < 1e-5);
        assert!((face.rect.y2 - 24.0).abs() < 1e-5);

        // landmarks come from the box before regression: 2 + 0.5 * 23 - 1
        for p in face.landmarks.points() {
            assert!((p.x - 12.5).abs() < 1e-5);
            assert!((p.y - 12.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_no_proposals_skips_later_stages() {
        let image = square_image(48);
        let proposal = ScriptedProposal::new(vec![0.1, 0.1]);
        let refine = ScriptedBatch::new(24, vec![1.0], false);
        let output = ScriptedBatch::new(48, vec![1.0], true);

        let mut cascade = Cascade::new(proposal, refine, output, params()).unwrap();
        assert!(cascade.detect_in(&image).unwrap().is_empty());
        assert!(cascade.refine.batches.is_empty());
        assert!(cascade.output.batches.is_empty());
    }

    #[test]
    fn test_refine_rejects_everything() {
        let image = square_image(48);
        let proposal = ScriptedProposal::new(vec![0.9, 0.8]);
        let refine = ScriptedBatch::new(24, vec![0.7, 0.2], false);
        let output = ScriptedBatch::new(48, vec![1.0], true);

        let mut cascade = Cascade::new(proposal, refine, output, params()).unwrap();
        assert!(cascade.detect_in(&image).unwrap().is_empty());
        assert_eq!(cascade.refine.batches.len(), 1);
        assert!(cascade.output.batches.is_empty());
    }

    #[test]
    fn test_image_below_min_face() {
        let image = square_image(20);
        let proposal = ScriptedProposal::new(vec![0.9]);
        let refine = ScriptedBatch::new(24, vec![1.0], false);
        let output = ScriptedBatch::new(48, vec![1.0], true);

        let mut cascade = Cascade::new(proposal, refine, output, params()).unwrap();
        assert!(cascade.detect_in(&image).unwrap().is_empty());
        assert_eq!(cascade.proposal.calls, 0);
    }

    #[test]
    fn test_malformed_proposal_output() {
        let image = square_image(48);
        let mut net = ScriptedProposal::new(vec![0.9]);
        net.broken = true;
        let err = propose(&mut net, &image, &params()).unwrap_err();
        assert!(matches!(err, CascadeError::OutputShape { stage: Stage::Propose, .. }));
    }

    #[test]
    fn test_output_stage_requires_landmarks() {
        let image = square_image(48);
        let mut net = ScriptedBatch::new(48, vec![0.9], false);
        let rects = [Rect::new(1.0, 1.0, 24.0, 24.0, 0.5)];
        let err = finalize(&mut net, &image, &rects, 0.7).unwrap_err();
        assert!(matches!(err, CascadeError::MissingOutput { stage: Stage::Output, .. }));
    }

    #[test]
    fn test_finalize_suppresses_nested_faces() {
        let image = square_image(100);
        let mut net = ScriptedBatch::new(48, vec![0.95, 0.9], true);
        let rects = [
            Rect::new(1.0, 1.0, 80.0, 80.0, 0.5),
            Rect::new(20.0, 20.0, 40.0, 40.0, 0.5),
        ];
        let faces = finalize(&mut net, &image, &rects, 0.7).unwrap();
        assert_eq!(faces.len(), 1);
        assert!((faces[0].rect.score - 0.95).abs() < 1e-6);
        // landmarks belong to the kept box: 1 + 0.5 * 80 - 1
        assert!((faces[0].landmarks.points()[0].x - 40.0).abs() < 1e-5);
    }

    #[test]
    fn test_boxes_outside_image_are_dropped() {
        let image = square_image(30);
        let mut net = ScriptedBatch::new(24, vec![0.9, 0.9], false);
        let rects = [
            Rect::new(40.0, 1.0, 30.0, 10.0, 0.5),
            Rect::new(1.0, 1.0, 20.0, 20.0, 0.5),
        ];
        let kept = refine(&mut net, &image, &rects, 0.5).unwrap();
        assert_eq!(net.batches, vec![vec![1, 3, 24, 24]]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_detect_path_reports_unreadable_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, b"plain text").unwrap();

        let proposal = ScriptedProposal::new(vec![0.9]);
        let refine = ScriptedBatch::new(24, vec![1.0], false);
        let output = ScriptedBatch::new(48, vec![1.0], true);
        let mut cascade = Cascade::new(proposal, refine, output, params()).unwrap();

        let err = cascade.detect_path(&path).unwrap_err();
        assert!(matches!(err, CascadeError::Image(_)));
        let missing = cascade.detect_path(&dir.path().join("missing.jpg")).unwrap_err();
        assert!(matches!(missing, CascadeError::Image(_)));
        assert_eq!(cascade.proposal.calls, 0);
    }

    #[test]
    fn test_params_validation() {
        assert!(DetectionParams::default().validate().is_ok());
        let bad = DetectionParams { factor: 1.2, ..DetectionParams::default() };
        assert!(bad.validate().is_err());
        let bad = DetectionParams { thresholds: [0.6, 1.5, 0.7], ..DetectionParams::default() };
        assert!(bad.validate().is_err());
        let bad = DetectionParams { min_face_size: -1.0, ..DetectionParams::default() };
        assert!(Cascade::new(
            ScriptedProposal::new(vec![]),
            ScriptedBatch::new(24, vec![], false),
            ScriptedBatch::new(48, vec![], true),
            bad
        )
        .is_err());
    }
}
