//! Storage module for face embedding persistence

pub mod traits;
pub mod sqlite;

pub use traits::{FaceStore, FaceRecord};
pub use sqlite::SqliteStorage;
