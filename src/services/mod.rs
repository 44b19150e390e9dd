pub mod batching;
pub mod catalog;
pub mod coordinator;
pub mod freshness;
pub mod history;
pub mod prefetch;
pub mod providers;

pub use catalog::{CatalogService, PAGE_SIZE};
pub use coordinator::GenerationCoordinator;
pub use prefetch::PrefetchScheduler;
