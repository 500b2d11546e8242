use std::{path::{Path, PathBuf}, sync::Mutex};

use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::Serialize;

use crate::{domain::embedding::Embedding, error::RsResult, tools::log::{log_info, LogServiceType}, Error};

use super::image_tools::{crop_region, resize_exact};

const DETECTION_INPUT_SIZE: u32 = 320;
const EMBEDDING_INPUT_SIZE: u32 = 112;
const DETECTION_SCORE_THRESHOLD: f32 = 0.5;
const CASCADE_SCORE_THRESHOLD: f32 = 0.35;
const OVERLAP_IOU: f32 = 0.4;

/// Face bounding box in pixel coordinates of the image it was detected on.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &FaceBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 { 0.0 } else { intersection / union }
    }

    fn translated(&self, dx: f32, dy: f32) -> FaceBox {
        FaceBox { x1: self.x1 + dx, y1: self.y1 + dy, x2: self.x2 + dx, y2: self.y2 + dy, confidence: self.confidence }
    }

    /// Grows (or shrinks) the box around its center.
    fn scaled(&self, factor: f32) -> FaceBox {
        let cx = (self.x1 + self.x2) / 2.0;
        let cy = (self.y1 + self.y2) / 2.0;
        let hw = (self.x2 - self.x1) * factor / 2.0;
        let hh = (self.y2 - self.y1) * factor / 2.0;
        FaceBox { x1: cx - hw, y1: cy - hh, x2: cx + hw, y2: cy + hh, confidence: self.confidence }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DetectorKind {
    Primary,
    Secondary,
    Cascade,
}

/// Face detection and embedding backend.
///
/// Implementations are blocking and are only called from `spawn_blocking`.
pub trait FaceEncoder: Send + Sync {
    fn supports(&self, kind: DetectorKind) -> bool;

    /// Finds faces with the given detector. `upsample` of 0 runs once on the whole image,
    /// higher values also scan a finer grid so small faces survive the input resize.
    fn detect(&self, image: &RgbImage, kind: DetectorKind, upsample: u32) -> RsResult<Vec<FaceBox>>;

    /// Embeds one face, averaging over `jitter` perturbed crops.
    fn encode(&self, image: &RgbImage, face: &FaceBox, jitter: u32) -> RsResult<Embedding>;
}

/// Deterministic perturbation of the face crop for jitter index `index`.
pub fn jitter_crop(image: &RgbImage, face: &FaceBox, index: u32) -> Option<RgbImage> {
    let scale = match index % 3 {
        0 => 1.0,
        1 => 1.08,
        _ => 0.94,
    };
    let shift = ((index / 3) as f32) * 0.02 * (face.x2 - face.x1);
    let region = face.scaled(scale).translated(shift, 0.0);
    let crop = crop_region(image, region.x1, region.y1, region.x2, region.y2)?;
    if index % 2 == 1 {
        Some(imageops::flip_horizontal(&crop))
    } else {
        Some(crop)
    }
}

pub fn average_embeddings(embeddings: &[Vec<f32>]) -> Option<Embedding> {
    let first = embeddings.first()?;
    let mut sum = vec![0.0f32; first.len()];
    for embedding in embeddings {
        if embedding.len() != sum.len() {
            return None;
        }
        for (total, value) in sum.iter_mut().zip(embedding) {
            *total += value;
        }
    }
    let count = embeddings.len() as f32;
    Some(Embedding::new(sum.into_iter().map(|v| v / count).collect()))
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn suppress_overlaps(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Origins and size of an `n x n` grid of overlapping tiles covering the image.
pub fn tile_grid(width: u32, height: u32, n: u32) -> Vec<(u32, u32, u32, u32)> {
    let n = n.max(1);
    let tile_w = ((width as f32 / n as f32) * 1.5).ceil().min(width as f32) as u32;
    let tile_h = ((height as f32 / n as f32) * 1.5).ceil().min(height as f32) as u32;
    let mut tiles = Vec::with_capacity((n * n) as usize);
    for row in 0..n {
        for col in 0..n {
            let x = if n == 1 { 0 } else { (width - tile_w) * col / (n - 1) };
            let y = if n == 1 { 0 } else { (height - tile_h) * row / (n - 1) };
            tiles.push((x, y, tile_w, tile_h));
        }
    }
    tiles
}


struct OnnxModel {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    fn load(path: &Path) -> RsResult<Self> {
        if !path.exists() {
            return Err(Error::ConfigurationInvalid(format!("Model file not found: {:?}", path)));
        }
        let session = Session::builder()
            .map_err(|e| Error::Encoder(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::Encoder(e.to_string()))?
            .with_intra_threads(4)
            .map_err(|e| Error::Encoder(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| Error::Encoder(format!("Failed to load model {:?}: {}", path, e)))?;
        let input_name = session.inputs.first().map(|i| i.name.clone()).unwrap_or_else(|| "input".into());
        let output_name = session.outputs.first().map(|o| o.name.clone()).unwrap_or_else(|| "output".into());
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        log_info(LogServiceType::Detection, format!("Loaded model {} (input {}, output {})", name, input_name, output_name));
        Ok(Self { name, session: Mutex::new(session), input_name, output_name })
    }

    fn run(&self, input: Array4<f32>) -> RsResult<Vec<f32>> {
        let mut session = self.session.lock().map_err(|_| Error::Encoder(format!("{} session poisoned", self.name)))?;
        let tensor = Tensor::from_array(input).map_err(|e| Error::Encoder(format!("Failed to create input tensor: {}", e)))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| Error::Encoder(format!("{} inference failed: {}", self.name, e)))?;
        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| Error::Encoder(format!("No output '{}' from {}", self.output_name, self.name)))?;
        let (_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Encoder(format!("Failed to extract {} output: {}", self.name, e)))?;
        Ok(data.to_vec())
    }
}

/// NCHW tensor of a square resize of `image`, normalized with `(p - mean) / std`.
fn to_tensor(image: &RgbImage, size: u32, mean: f32, std: f32) -> Array4<f32> {
    let resized = resize_exact(image, size, size);
    let size = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for channel in 0..3 {
            tensor[[0, channel, y as usize, x as usize]] = (pixel[channel] as f32 - mean) / std;
        }
    }
    tensor
}

#[derive(Debug, Clone)]
pub struct OnnxModelPaths {
    pub detection: PathBuf,
    pub fallback_detection: Option<PathBuf>,
    pub cascade: Option<PathBuf>,
    pub embedding: PathBuf,
}

/// ONNX backed encoder.
///
/// Detectors take a 320x320 RGB tensor scaled to `[0, 1]` and output rows of
/// `[x1, y1, x2, y2, score]` in normalized coordinates. The embedder takes a
/// 112x112 face crop normalized with `(p - 127.5) / 128` and outputs one vector.
pub struct OnnxFaceEncoder {
    primary: OnnxModel,
    secondary: Option<OnnxModel>,
    cascade: Option<OnnxModel>,
    embedder: OnnxModel,
    embedding_dim: usize,
}

impl OnnxFaceEncoder {
    pub fn load(paths: &OnnxModelPaths, embedding_dim: usize) -> RsResult<Self> {
        Ok(Self {
            primary: OnnxModel::load(&paths.detection)?,
            secondary: paths.fallback_detection.as_deref().map(OnnxModel::load).transpose()?,
            cascade: paths.cascade.as_deref().map(OnnxModel::load).transpose()?,
            embedder: OnnxModel::load(&paths.embedding)?,
            embedding_dim,
        })
    }

    fn detector(&self, kind: DetectorKind) -> Option<&OnnxModel> {
        match kind {
            DetectorKind::Primary => Some(&self.primary),
            DetectorKind::Secondary => self.secondary.as_ref(),
            DetectorKind::Cascade => self.cascade.as_ref(),
        }
    }

    fn detect_once(model: &OnnxModel, image: &RgbImage, threshold: f32) -> RsResult<Vec<FaceBox>> {
        let (width, height) = image.dimensions();
        let detections = model.run(to_tensor(image, DETECTION_INPUT_SIZE, 0.0, 255.0))?;
        let mut boxes = Vec::new();
        for row in detections.chunks_exact(5) {
            let confidence = row[4];
            if confidence > threshold {
                boxes.push(FaceBox {
                    x1: row[0] * width as f32,
                    y1: row[1] * height as f32,
                    x2: row[2] * width as f32,
                    y2: row[3] * height as f32,
                    confidence,
                });
            }
        }
        Ok(boxes)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn supports(&self, kind: DetectorKind) -> bool {
        self.detector(kind).is_some()
    }

    fn detect(&self, image: &RgbImage, kind: DetectorKind, upsample: u32) -> RsResult<Vec<FaceBox>> {
        let Some(model) = self.detector(kind) else {
            return Ok(vec![]);
        };
        let threshold = if kind == DetectorKind::Cascade { CASCADE_SCORE_THRESHOLD } else { DETECTION_SCORE_THRESHOLD };
        let mut boxes = Self::detect_once(model, image, threshold)?;
        if upsample > 0 {
            let (width, height) = image.dimensions();
            for (x, y, w, h) in tile_grid(width, height, upsample + 1) {
                let tile = imageops::crop_imm(image, x, y, w, h).to_image();
                let found = Self::detect_once(model, &tile, threshold)?;
                boxes.extend(found.into_iter().map(|b| b.translated(x as f32, y as f32)));
            }
        }
        Ok(suppress_overlaps(boxes, OVERLAP_IOU))
    }

    fn encode(&self, image: &RgbImage, face: &FaceBox, jitter: u32) -> RsResult<Embedding> {
        let mut samples = Vec::with_capacity(jitter.max(1) as usize);
        for index in 0..jitter.max(1) {
            let Some(crop) = jitter_crop(image, face, index) else {
                continue;
            };
            let embedding = self.embedder.run(to_tensor(&crop, EMBEDDING_INPUT_SIZE, 127.5, 128.0))?;
            if embedding.len() != self.embedding_dim {
                return Err(Error::Encoder(format!("Embedder produced {} values, expected {}", embedding.len(), self.embedding_dim)));
            }
            samples.push(embedding);
        }
        let embedding = average_embeddings(&samples).ok_or(Error::NoFaceDetected)?;
        if !embedding.is_finite() {
            return Err(Error::Encoder("Embedding contains non-finite values".to_string()));
        }
        Ok(embedding)
    }
}
