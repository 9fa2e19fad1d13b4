//! FaceNet-512 descriptor extractor via ONNX Runtime.
//!
//! Expects a photo cropped around a single face. The image is decoded,
//! resized to 160x160 RGB and fed to the model; the raw 512-dimensional
//! output is the descriptor. It is deliberately not L2-normalized: match
//! thresholds are expressed in raw embedding distance.

use crate::extractor::{ExtractError, Extractor};
use crate::types::Descriptor;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FACENET_INPUT_SIZE: u32 = 160;
const FACENET_MEAN: f32 = 127.5;
const FACENET_STD: f32 = 128.0;
const FACENET_EMBEDDING_DIM: usize = 512;
/// Images smaller than this on either side cannot hold a usable face.
const MIN_IMAGE_SIDE: u32 = 32;
const MIN_EMBEDDING_NORM: f32 = 1e-6;

impl From<ort::Error> for ExtractError {
    fn from(err: ort::Error) -> Self {
        ExtractError::Inference(err.to_string())
    }
}

/// FaceNet-based descriptor extractor.
pub struct FaceNetExtractor {
    session: Session,
}

impl FaceNetExtractor {
    /// Load the FaceNet-512 ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ExtractError> {
        if !model_path.exists() {
            return Err(ExtractError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self { session })
    }

    /// Decode image bytes and bring them to the model's input resolution.
    fn decode(image: &[u8]) -> Result<RgbImage, ExtractError> {
        let decoded =
            image::load_from_memory(image).map_err(|e| ExtractError::InvalidImage(e.to_string()))?;

        if decoded.width() < MIN_IMAGE_SIDE || decoded.height() < MIN_IMAGE_SIDE {
            tracing::debug!(
                width = decoded.width(),
                height = decoded.height(),
                "image too small to contain a face"
            );
            return Err(ExtractError::NoFaceDetected);
        }

        Ok(decoded
            .resize_exact(FACENET_INPUT_SIZE, FACENET_INPUT_SIZE, FilterType::Triangle)
            .to_rgb8())
    }

    /// Convert a 160x160 RGB image into a normalized NHWC float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = FACENET_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));

        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] =
                    (pixel.0[c] as f32 - FACENET_MEAN) / FACENET_STD;
            }
        }

        tensor
    }

    /// Reject outputs that cannot describe a face.
    fn validate(raw: Vec<f32>) -> Result<Descriptor, ExtractError> {
        if raw.len() != FACENET_EMBEDDING_DIM {
            return Err(ExtractError::Inference(format!(
                "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if !norm.is_finite() || norm < MIN_EMBEDDING_NORM {
            return Err(ExtractError::NoFaceDetected);
        }

        Descriptor::new(raw).map_err(|_| ExtractError::NoFaceDetected)
    }
}

impl Extractor for FaceNetExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Descriptor, ExtractError> {
        let face = Self::decode(image)?;
        let input = Self::preprocess(&face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::Inference(format!("embedding extraction: {e}")))?;

        Self::validate(raw_data.to_vec())
    }
}
