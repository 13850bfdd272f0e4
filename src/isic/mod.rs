//! Client side of the image-archive API: the paginated record catalog and the batched,
//! concurrent image bundle downloads built on top of it.

pub mod api;
pub mod batch;
pub mod catalog;

pub use api::{DEFAULT_API_URL, IsicApi};
pub use batch::{BatchFetcher, BatchSummary, CancellationToken, make_batches};
pub use catalog::{IsicCatalogCache, IsicRecord};
