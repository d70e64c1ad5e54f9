//! In-memory embedding index
//!
//! All stored embeddings are stacked into one N×D matrix whose rows are
//! L2-normalized, so scoring a unit-norm query is a single matrix-vector
//! product. The index is built once at startup and never mutated.

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::IndexError;
use crate::storage::FaceRecord;
use crate::utils::math::l2_norm;

/// Metadata for one index row
#[derive(Debug, Clone, PartialEq)]
pub struct RowMeta {
    pub file_id: String,
    pub file_name: String,
}

/// Normalized embedding matrix with per-row file metadata
#[derive(Debug)]
pub struct EmbeddingIndex {
    matrix: Array2<f32>,
    row_meta: Vec<RowMeta>,
}

impl EmbeddingIndex {
    /// Build the index from stored records, keeping their order
    pub fn build(records: &[FaceRecord]) -> Result<Self, IndexError> {
        let first = records.first().ok_or(IndexError::EmptyStore)?;
        let dim = first.embedding.len();

        let mut data = Vec::with_capacity(records.len() * dim);
        let mut row_meta = Vec::with_capacity(records.len());

        for (row, record) in records.iter().enumerate() {
            if record.embedding.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    row,
                    expected: dim,
                    found: record.embedding.len(),
                });
            }

            let norm = l2_norm(&record.embedding);
            if !(norm > 0.0 && norm.is_finite()) {
                return Err(IndexError::ZeroEmbedding { row });
            }

            data.extend(record.embedding.iter().map(|x| x / norm));
            row_meta.push(RowMeta {
                file_id: record.file_id.clone(),
                file_name: record.file_name.clone(),
            });
        }

        let matrix = Array2::from_shape_vec((records.len(), dim), data)
            .map_err(|_| IndexError::DimensionMismatch {
                row: 0,
                expected: dim,
                found: 0,
            })?;

        Ok(Self { matrix, row_meta })
    }

    /// Cosine score of a unit-norm query against every row, in row order
    pub fn score(&self, query: &[f32]) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dim() {
            return Err(IndexError::QueryDimension {
                expected: self.dim(),
                found: query.len(),
            });
        }

        let query = ArrayView1::from(query);
        let scores: Array1<f32> = self.matrix.dot(&query);
        Ok(scores.into_iter().enumerate().collect())
    }

    /// Number of indexed faces
    pub fn len(&self) -> usize {
        self.row_meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_meta.is_empty()
    }

    /// Embedding dimensionality
    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn meta(&self, row: usize) -> Option<&RowMeta> {
        self.row_meta.get(row)
    }

    #[cfg(test)]
    fn row(&self, row: usize) -> Option<ArrayView1<'_, f32>> {
        (row < self.len()).then(|| self.matrix.row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::{cosine_similarity, normalized};

    fn record(file_id: &str, embedding: Vec<f32>) -> FaceRecord {
        FaceRecord::new(file_id, format!("{}.jpg", file_id), "folder", embedding)
    }

    fn sample_records() -> Vec<FaceRecord> {
        vec![
            record("a", vec![3.0, 4.0, 0.0]),
            record("b", vec![0.0, 0.0, 2.0]),
            record("c", vec![1.0, 1.0, 1.0]),
            record("d", vec![-5.0, 0.5, 0.25]),
        ]
    }

    #[test]
    fn test_rows_are_unit_norm() {
        let index = EmbeddingIndex::build(&sample_records()).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.dim(), 3);

        for row in 0..index.len() {
            let norm = index.row(row).unwrap().iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6, "row {} has norm {}", row, norm);
        }
    }

    #[test]
    fn test_score_matches_cosine_similarity() {
        let records = sample_records();
        let index = EmbeddingIndex::build(&records).unwrap();

        let raw_query = vec![2.0, -1.0, 0.5];
        let query = normalized(&raw_query).unwrap();
        let scores = index.score(&query).unwrap();

        assert_eq!(scores.len(), records.len());
        for (row, score) in scores {
            let expected = cosine_similarity(&raw_query, &records[row].embedding);
            assert!((score - expected).abs() < 1e-5, "row {}: {} vs {}", row, score, expected);
        }
    }

    #[test]
    fn test_meta_follows_input_order() {
        let index = EmbeddingIndex::build(&sample_records()).unwrap();
        let ids: Vec<&str> = (0..index.len())
            .map(|i| index.meta(i).unwrap().file_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(index.meta(0).unwrap().file_name, "a.jpg");
        assert!(index.meta(4).is_none());
    }

    #[test]
    fn test_score_rejects_wrong_query_length() {
        let index = EmbeddingIndex::build(&sample_records()).unwrap();
        assert_eq!(
            index.score(&[1.0, 0.0]).unwrap_err(),
            IndexError::QueryDimension { expected: 3, found: 2 }
        );
        assert!(index.score(&[]).is_err());
    }

    #[test]
    fn test_empty_store_fails() {
        assert_eq!(EmbeddingIndex::build(&[]).unwrap_err(), IndexError::EmptyStore);
    }

    #[test]
    fn test_zero_embedding_fails() {
        let records = vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 0.0])];
        assert_eq!(
            EmbeddingIndex::build(&records).unwrap_err(),
            IndexError::ZeroEmbedding { row: 1 }
        );
    }

    #[test]
    fn test_dimension_mismatch_fails() {
        let records = vec![record("a", vec![1.0, 0.0]), record("b", vec![1.0, 0.0, 0.0])];
        assert_eq!(
            EmbeddingIndex::build(&records).unwrap_err(),
            IndexError::DimensionMismatch { row: 1, expected: 2, found: 3 }
        );
    }
}
