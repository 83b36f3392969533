pub mod catalog;
pub mod ingestion;
pub mod play_history;
pub mod recommendations;
pub mod reconcile;

pub use catalog::{CatalogStore, MemoryCatalogStore, PgCatalogStore};
pub use ingestion::{GraphUpdateQueue, IngestionHandle, IngestionService, IngestionStats};
pub use play_history::{MemoryPlayHistoryStore, PgPlayHistoryStore, PlayHistoryStore};
pub use recommendations::{QueryLimits, RecommendationService};
pub use reconcile::{ReconcileReport, Reconciler};
