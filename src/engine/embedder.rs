//! ArcFace Face Embedder
//!
//! Turns a 112x112 aligned face into a 512-dimensional feature vector.

use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;
use openvino::{ElementType, Shape, Tensor};

use super::pool::{ModelPool, ModelType};
use super::preprocess::{preprocess_for_embedding, EMBEDDER_INPUT_SIZE};

/// ArcFace Face Embedder
pub struct FaceEmbedder {
    pool: Arc<ModelPool>,
    embedding_dim: usize,
}

impl FaceEmbedder {
    pub fn new(pool: Arc<ModelPool>, embedding_dim: usize) -> Self {
        Self {
            pool,
            embedding_dim,
        }
    }

    /// Extract the raw (unnormalized) embedding of an aligned face
    pub fn embed(&self, aligned_face: &DynamicImage) -> Result<Vec<f32>> {
        let input_tensor = preprocess_for_embedding(aligned_face);

        let model = self.pool.get_model(ModelType::Embedder)?;
        let mut request = model.create_infer_request()?;

        let side = EMBEDDER_INPUT_SIZE as i64;
        let input_shape = Shape::new(&[1, 3, side, side])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;

        let input_data = input_tensor
            .as_slice()
            .ok_or_else(|| anyhow::anyhow!("embedder input tensor is not contiguous"))?;
        unsafe {
            let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        let output = request.get_output_tensor()?;
        let output_len = output.get_shape()?.get_dimensions().iter().product::<i64>() as usize;
        if output_len != self.embedding_dim {
            anyhow::bail!(
                "embedder produced {} values, expected {}",
                output_len,
                self.embedding_dim
            );
        }

        let vector = unsafe {
            let ptr = output.get_raw_data()?.as_ptr() as *const f32;
            std::slice::from_raw_parts(ptr, output_len).to_vec()
        };

        Ok(vector)
    }
}
