//! Single-item operations.

mod repository;

pub use repository::{SingleItemRepository, UpdateMatchingReport};
