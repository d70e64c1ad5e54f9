//! Service layer: the embedding index and face search

pub mod index;
pub mod search_service;
pub mod types;

pub use index::{EmbeddingIndex, RowMeta};
pub use search_service::{rank_scores, SearchService};
pub use types::*;
