use std::sync::Arc;

use image::RgbImage;

use crate::domain::embedding::Embedding;

use super::{image_tools::{render_variant, variant_plan, VariantKind}, log::{log_error, log_info, LogServiceType}, recognition::{DetectorKind, FaceBox, FaceEncoder}};


#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub contrast_fallback: bool,
    /// Rotation angles in degrees, empty when rotation fallback is off.
    pub rotation_angles: Vec<f32>,
    pub upsample: u32,
    pub cascade_fallback: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self { contrast_fallback: true, rotation_angles: vec![-15.0, 15.0], upsample: 1, cascade_fallback: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeProfile {
    pub jitter: u32,
    pub max_candidates: usize,
}

/// Runs the detector chain over every image variant until a face is found.
#[derive(Clone)]
pub struct DetectionOrchestrator {
    encoder: Arc<dyn FaceEncoder>,
    settings: DetectionSettings,
}

impl DetectionOrchestrator {
    pub fn new(encoder: Arc<dyn FaceEncoder>, settings: DetectionSettings) -> Self {
        Self { encoder, settings }
    }

    /// Detector attempts for one variant, in order.
    fn detector_chain(&self) -> Vec<(DetectorKind, u32)> {
        let mut chain = vec![
            (DetectorKind::Primary, self.settings.upsample),
            (DetectorKind::Primary, self.settings.upsample + 1),
        ];
        if self.encoder.supports(DetectorKind::Secondary) {
            chain.push((DetectorKind::Secondary, self.settings.upsample));
        }
        if self.settings.cascade_fallback && self.encoder.supports(DetectorKind::Cascade) {
            chain.push((DetectorKind::Cascade, 0));
        }
        chain
    }

    /// Regions of the first detector attempt that finds anything, largest first.
    fn locate(&self, image: &RgbImage, variant: VariantKind) -> Vec<FaceBox> {
        for (kind, upsample) in self.detector_chain() {
            match self.encoder.detect(image, kind, upsample) {
                Ok(mut faces) if !faces.is_empty() => {
                    faces.sort_by(|a, b| b.area().total_cmp(&a.area()));
                    if variant != VariantKind::Original || kind != DetectorKind::Primary {
                        log_info(LogServiceType::Detection, format!("Found {} face(s) with {:?} detector (upsample {}) on {:?} image", faces.len(), kind, upsample, variant));
                    }
                    return faces;
                }
                Ok(_) => {}
                Err(error) => log_error(LogServiceType::Detection, format!("{:?} detector failed on {:?} image: {:?}", kind, variant, error)),
            }
        }
        vec![]
    }

    /// Embeddings for the faces found in `image`, empty when none is found.
    ///
    /// With `max_candidates == 1` the first variant holding a region wins, otherwise
    /// candidates accumulate across variants. Never fails: encoder errors count as "not found".
    pub fn detect_and_encode(&self, image: &RgbImage, profile: EncodeProfile) -> Vec<Embedding> {
        let max_candidates = profile.max_candidates.max(1);
        let mut embeddings = Vec::with_capacity(max_candidates);

        for variant in variant_plan(self.settings.contrast_fallback, &self.settings.rotation_angles) {
            let rendered = render_variant(image, variant);
            let faces = self.locate(&rendered, variant);
            let faces_found = !faces.is_empty();
            for face in faces {
                match self.encoder.encode(&rendered, &face, profile.jitter) {
                    Ok(embedding) => embeddings.push(embedding),
                    Err(error) => log_error(LogServiceType::Detection, format!("Encoding failed on {:?} image: {:?}", variant, error)),
                }
                if embeddings.len() >= max_candidates {
                    return embeddings;
                }
            }
            // single mode stops at the first variant holding a region, even if encoding it failed
            if max_candidates == 1 && faces_found {
                break;
            }
        }
        embeddings
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use image::Rgb;

    use crate::{error::RsResult, tools::recognition::testing::FixedEncoder, Error};

    use super::*;

    /// Finds faces only for the listed attempts and records every call.
    struct ScriptedEncoder {
        answers: Vec<(usize, DetectorKind, u32, usize)>,
        calls: Mutex<Vec<(DetectorKind, u32)>>,
        secondary: bool,
        fail_encode: bool,
    }

    impl ScriptedEncoder {
        /// `answers`: (detect call index, kind, upsample, faces found)
        fn new(answers: Vec<(usize, DetectorKind, u32, usize)>) -> Self {
            Self { answers, calls: Mutex::new(vec![]), secondary: false, fail_encode: false }
        }

        fn calls(&self) -> Vec<(DetectorKind, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FaceEncoder for ScriptedEncoder {
        fn supports(&self, kind: DetectorKind) -> bool {
            match kind {
                DetectorKind::Primary => true,
                DetectorKind::Secondary => self.secondary,
                DetectorKind::Cascade => true,
            }
        }

        fn detect(&self, _image: &RgbImage, kind: DetectorKind, upsample: u32) -> RsResult<Vec<FaceBox>> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push((kind, upsample));
            let found = self.answers.iter().find(|(i, k, u, _)| *i == index && *k == kind && *u == upsample).map(|a| a.3).unwrap_or(0);
            Ok((0..found).map(|n| {
                let size = 10.0 + n as f32 * 10.0;
                FaceBox { x1: 0.0, y1: 0.0, x2: size, y2: size, confidence: 0.9 }
            }).collect())
        }

        fn encode(&self, _image: &RgbImage, face: &FaceBox, _jitter: u32) -> RsResult<Embedding> {
            if self.fail_encode {
                return Err(Error::Encoder("scripted failure".into()));
            }
            Ok(Embedding::new(vec![face.area(), self.calls.lock().unwrap().len() as f32]))
        }
    }

    fn image() -> RgbImage {
        RgbImage::from_pixel(32, 32, Rgb([120, 80, 60]))
    }

    fn single() -> EncodeProfile {
        EncodeProfile { jitter: 1, max_candidates: 1 }
    }

    #[test]
    fn test_first_detector_hit_wins() {
        let encoder = Arc::new(ScriptedEncoder::new(vec![(0, DetectorKind::Primary, 1, 1)]));
        let orchestrator = DetectionOrchestrator::new(encoder.clone(), DetectionSettings::default());
        let embeddings = orchestrator.detect_and_encode(&image(), single());
        assert_eq!(embeddings.len(), 1);
        assert_eq!(encoder.calls(), vec![(DetectorKind::Primary, 1)]);
    }

    #[test]
    fn test_fallback_chain_order() {
        // nothing anywhere: every variant runs the whole chain
        let mut scripted = ScriptedEncoder::new(vec![]);
        scripted.secondary = true;
        let encoder = Arc::new(scripted);
        let settings = DetectionSettings { cascade_fallback: true, ..Default::default() };
        let orchestrator = DetectionOrchestrator::new(encoder.clone(), settings);
        assert!(orchestrator.detect_and_encode(&image(), single()).is_empty());

        let chain = vec![(DetectorKind::Primary, 1), (DetectorKind::Primary, 2), (DetectorKind::Secondary, 1), (DetectorKind::Cascade, 0)];
        let calls = encoder.calls();
        // original, contrast and two rotations
        assert_eq!(calls.len(), chain.len() * 4);
        for attempts in calls.chunks(chain.len()) {
            assert_eq!(attempts, chain.as_slice());
        }
    }

    #[test]
    fn test_contrast_variant_found_after_upsample() {
        // call 0..1 original (primary, primary upsampled), call 2 is the contrast variant
        let encoder = Arc::new(ScriptedEncoder::new(vec![(2, DetectorKind::Primary, 1, 1)]));
        let orchestrator = DetectionOrchestrator::new(encoder.clone(), DetectionSettings::default());
        assert_eq!(orchestrator.detect_and_encode(&image(), single()).len(), 1);
        assert_eq!(encoder.calls().len(), 3);
    }

    #[test]
    fn test_disabled_variants_are_skipped() {
        let encoder = Arc::new(ScriptedEncoder::new(vec![]));
        let settings = DetectionSettings { contrast_fallback: false, rotation_angles: vec![], upsample: 0, cascade_fallback: false };
        let orchestrator = DetectionOrchestrator::new(encoder.clone(), settings);
        assert!(orchestrator.detect_and_encode(&image(), single()).is_empty());
        assert_eq!(encoder.calls(), vec![(DetectorKind::Primary, 0), (DetectorKind::Primary, 1)]);
    }

    #[test]
    fn test_largest_face_first() {
        let encoder = Arc::new(ScriptedEncoder::new(vec![(0, DetectorKind::Primary, 1, 3)]));
        let orchestrator = DetectionOrchestrator::new(encoder, DetectionSettings::default());
        let embeddings = orchestrator.detect_and_encode(&image(), single());
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].as_slice()[0], 900.0);
    }

    #[test]
    fn test_multi_candidates_accumulate_across_variants() {
        // original gives one face, contrast variant (call 1) gives two
        let encoder = Arc::new(ScriptedEncoder::new(vec![(0, DetectorKind::Primary, 1, 1), (1, DetectorKind::Primary, 1, 2)]));
        let orchestrator = DetectionOrchestrator::new(encoder.clone(), DetectionSettings::default());
        let embeddings = orchestrator.detect_and_encode(&image(), EncodeProfile { jitter: 1, max_candidates: 3 });
        assert_eq!(embeddings.len(), 3);
        // stops as soon as the bound is reached
        assert_eq!(encoder.calls().len(), 2);
    }

    #[test]
    fn test_encoder_failures_mean_not_found() {
        let mut scripted = ScriptedEncoder::new(vec![(0, DetectorKind::Primary, 1, 1)]);
        scripted.fail_encode = true;
        let orchestrator = DetectionOrchestrator::new(Arc::new(scripted), DetectionSettings::default());
        assert!(orchestrator.detect_and_encode(&image(), single()).is_empty());

        let orchestrator = DetectionOrchestrator::new(Arc::new(FixedEncoder::failing()), DetectionSettings::default());
        assert!(orchestrator.detect_and_encode(&image(), single()).is_empty());
    }

    #[test]
    fn test_single_mode_stops_at_first_region_even_if_encode_fails() {
        // the original holds a region the encoder rejects, the contrast variant (call 1) would encode fine
        let mut scripted = ScriptedEncoder::new(vec![(0, DetectorKind::Primary, 1, 1), (1, DetectorKind::Primary, 1, 1)]);
        scripted.fail_encode = true;
        let encoder = Arc::new(scripted);
        let orchestrator = DetectionOrchestrator::new(encoder.clone(), DetectionSettings::default());
        assert!(orchestrator.detect_and_encode(&image(), single()).is_empty());
        assert_eq!(encoder.calls(), vec![(DetectorKind::Primary, 1)]);
    }

    #[test]
    fn test_black_image_has_no_face() {
        let orchestrator = DetectionOrchestrator::new(Arc::new(FixedEncoder::default()), DetectionSettings::default());
        let black = RgbImage::new(16, 16);
        assert!(orchestrator.detect_and_encode(&black, single()).is_empty());
        let embeddings = orchestrator.detect_and_encode(&image(), single());
        assert_eq!(embeddings.len(), 1);
        assert!((embeddings[0].as_slice()[0] - 120.0 / 255.0).abs() < 1e-5);
    }
}
