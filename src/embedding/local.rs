//! Local ONNX embedding provider (spec §4.6). Loads a sentence-embedding
//! model via `ort` and its tokenizer via the `tokenizers` crate, mean-pools
//! the last hidden state over non-padding tokens, and L2-normalizes the
//! result so cosine similarity reduces to a dot product downstream.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{Array2, Axis};
use ort::session::Session;
use tokenizers::Tokenizer;

use crate::embedding::{Embedding, EmbeddingProvider};
use crate::errors::{AppError, ErrorKind};

pub struct LocalProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_name: String,
    dimensions: u32,
    max_batch_size: usize,
}

impl LocalProvider {
    pub fn load(model_path: &Path, tokenizer_path: &Path, model_name: &str, dimensions: u32) -> Result<Self, AppError> {
        let session = Session::builder()
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                AppError::new(
                    ErrorKind::EmbeddingConfig,
                    format!("failed to load ONNX model at {}: {e}", model_path.display()),
                )
            })?;

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            AppError::new(
                ErrorKind::EmbeddingConfig,
                format!("failed to load tokenizer at {}: {e}", tokenizer_path.display()),
            )
        })?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_name: model_name.to_string(),
            dimensions,
            max_batch_size: 32,
        })
    }

    /// Resolves a model by name through the local `hf-hub` cache, downloading
    /// it on first use. Grounded in the same cache-then-fetch pattern the
    /// teacher uses for its tree-sitter grammar downloads.
    pub fn from_hub(model_repo: &str, model_name: &str, dimensions: u32) -> Result<Self, AppError> {
        let api = hf_hub::api::sync::Api::new().map_err(|e| {
            AppError::new(ErrorKind::EmbeddingNetwork, format!("hf-hub init failed: {e}"))
        })?;
        let repo = api.model(model_repo.to_string());
        let model_path: PathBuf = repo.get("model.onnx").map_err(|e| {
            AppError::new(ErrorKind::EmbeddingNetwork, format!("failed to fetch model.onnx: {e}"))
        })?;
        let tokenizer_path: PathBuf = repo.get("tokenizer.json").map_err(|e| {
            AppError::new(ErrorKind::EmbeddingNetwork, format!("failed to fetch tokenizer.json: {e}"))
        })?;
        Self::load(&model_path, &tokenizer_path, model_name, dimensions)
    }

    fn mean_pool(hidden: &Array2<f32>, attention_mask: &[i64]) -> Vec<f32> {
        let hidden_size = hidden.shape()[1];
        let mut sum = vec![0.0f32; hidden_size];
        let mut count = 0f32;
        for (row, &mask) in hidden.axis_iter(Axis(0)).zip(attention_mask) {
            if mask == 0 {
                continue;
            }
            for (s, v) in sum.iter_mut().zip(row.iter()) {
                *s += v;
            }
            count += 1.0;
        }
        if count > 0.0 {
            for s in &mut sum {
                *s /= count;
            }
        }
        sum
    }

    fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl EmbeddingProvider for LocalProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true).map_err(|e| {
            AppError::new(ErrorKind::EmbeddingProvider, format!("tokenization failed: {e}"))
        })?;

        let session = self.session.lock().expect("session lock");
        let mut out = Vec::with_capacity(texts.len());

        for encoding in &encodings {
            let attention_mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
            let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();

            let seq_len = ids.len();
            let input_ids = ndarray::Array2::from_shape_vec((1, seq_len), ids).map_err(|e| {
                AppError::new(ErrorKind::EmbeddingProvider, format!("bad input shape: {e}"))
            })?;
            let mask_arr = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
                .map_err(|e| AppError::new(ErrorKind::EmbeddingProvider, format!("bad mask shape: {e}")))?;

            let outputs = session
                .run(ort::inputs![
                    "input_ids" => input_ids,
                    "attention_mask" => mask_arr,
                ])
                .map_err(|e| AppError::new(ErrorKind::EmbeddingProvider, format!("inference failed: {e}")))?;

            let last_hidden = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| AppError::new(ErrorKind::EmbeddingProvider, format!("bad output tensor: {e}")))?;
            let shape = last_hidden.shape();
            let hidden_size = *shape.last().unwrap_or(&(self.dimensions as usize));
            let flat: Vec<f32> = last_hidden.iter().copied().collect();
            let hidden2d = Array2::from_shape_vec((seq_len, hidden_size), flat).map_err(|e| {
                AppError::new(ErrorKind::EmbeddingProvider, format!("bad hidden shape: {e}"))
            })?;

            let pooled = Self::mean_pool(&hidden2d, &attention_mask);
            let normalized = Self::l2_normalize(pooled);

            out.push(Embedding {
                vector: normalized,
                model: self.model_name.clone(),
            });
        }

        Ok(out)
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let v = LocalProvider::l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_unchanged() {
        let v = LocalProvider::l2_normalize(vec![0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn mean_pool_skips_padding_tokens() {
        let hidden = Array2::from_shape_vec((3, 2), vec![1.0, 1.0, 3.0, 3.0, 99.0, 99.0]).unwrap();
        let mask = [1, 1, 0];
        let pooled = LocalProvider::mean_pool(&hidden, &mask);
        assert_eq!(pooled, vec![2.0, 2.0]);
    }
}
