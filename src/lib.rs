pub mod api;
pub mod catalog;
pub mod catalog_service;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod session;
pub mod storage;

pub use catalog::Catalog;
pub use catalog_service::CatalogService;
pub use config::Config;
pub use errors::*;
pub use models::*;
pub use session::{SessionSnapshot, SessionState, SessionSummary, StudySession};
pub use storage::{CatalogStore, FileStore, MemoryStore};
