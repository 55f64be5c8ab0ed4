use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::errors::Result;
use crate::models::*;
use crate::storage::{CatalogStore, ImageData};

// Import logging macros
use crate::{
    log_service_error, log_service_start, log_service_success, log_service_warn,
    log_storage_operation,
};

const SERVICE: &str = "catalog_service";

/// Owns the process-wide catalog and persists it after every change
#[derive(Clone)]
pub struct CatalogService {
    store: CatalogStore,
    catalog: Arc<RwLock<Catalog>>,
}

impl CatalogService {
    /// Loads the catalog, falling back to an empty one if the stored copy is
    /// unreadable. The unreadable file is moved aside first.
    pub async fn open(store: CatalogStore) -> Self {
        let start = Instant::now();
        log_service_start!(SERVICE, "open");

        let catalog = match store.load_catalog().await {
            Ok(catalog) => catalog,
            Err(e) => {
                log_service_warn!(
                    SERVICE,
                    "open",
                    format!("catalog unreadable, starting with an empty one: {}", e)
                );
                match store.quarantine_catalog().await {
                    Ok(Some(backup)) => warn!(backup = %backup, "Moved unreadable catalog aside"),
                    Ok(None) => {}
                    Err(quarantine_error) => {
                        log_service_error!(SERVICE, "quarantine_catalog", error = quarantine_error);
                    }
                }
                Catalog::new()
            }
        };

        log_service_success!(
            SERVICE,
            "open",
            card_count = catalog.card_count(),
            duration_ms = start.elapsed().as_millis() as u64
        );

        Self {
            store,
            catalog: Arc::new(RwLock::new(catalog)),
        }
    }

    /// A copy of the current catalog
    pub async fn catalog(&self) -> Catalog {
        self.catalog.read().await.clone()
    }

    /// Applies `change` to a draft, saves the draft, then publishes it.
    /// A failed save leaves the in-memory catalog untouched.
    async fn mutate<T>(
        &self,
        operation: &str,
        change: impl FnOnce(&mut Catalog) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.catalog.write().await;
        let mut draft = guard.clone();
        let value = change(&mut draft)?;

        if let Err(e) = self.store.save_catalog(&draft).await {
            log_storage_operation!(error, operation, error = e);
            return Err(e);
        }

        *guard = draft;
        Ok(value)
    }

    /// Deletes image files that no remaining card points at
    async fn release_images(&self, image_paths: Vec<String>) {
        if image_paths.is_empty() {
            return;
        }
        let catalog = self.catalog.read().await;
        for path in image_paths {
            if catalog.references_image(&path) {
                continue;
            }
            if let Err(e) = self.store.remove_image(&path).await {
                warn!(path = %path, error = %e, "Could not remove unused image");
            }
        }
    }

    // Classes

    pub async fn list_classes(&self) -> Vec<ClassSummary> {
        self.catalog.read().await.list_classes()
    }

    pub async fn create_class(&self, name: &str) -> Result<ClassRecord> {
        self.mutate("create_class", |catalog| {
            catalog.create_class(name).cloned()
        })
        .await
    }

    pub async fn delete_class(&self, name: &str) -> Result<ClassRecord> {
        log_service_start!(SERVICE, "delete_class", class = name);
        let removed = self
            .mutate("delete_class", |catalog| catalog.delete_class(name))
            .await?;
        self.release_images(removed.image_paths()).await;
        log_service_success!(SERVICE, "delete_class", format!("removed class '{}'", removed.name));
        Ok(removed)
    }

    // Topics

    pub async fn list_topics(&self, class_name: &str) -> Result<Vec<TopicSummary>> {
        self.catalog.read().await.topic_summaries(class_name)
    }

    pub async fn create_topic(&self, class_name: &str, topic_name: &str) -> Result<TopicRecord> {
        self.mutate("create_topic", |catalog| {
            catalog.create_topic(class_name, topic_name).cloned()
        })
        .await
    }

    pub async fn delete_topic(&self, class_name: &str, topic_name: &str) -> Result<TopicRecord> {
        let removed = self
            .mutate("delete_topic", |catalog| catalog.delete_topic(class_name, topic_name))
            .await?;
        self.release_images(removed.image_paths()).await;
        Ok(removed)
    }

    // Cards

    pub async fn list_cards(&self, class_name: &str, topic_name: &str) -> Result<Vec<CardRecord>> {
        Ok(self
            .catalog
            .read()
            .await
            .list_cards(class_name, topic_name)?
            .to_vec())
    }

    pub async fn get_card(&self, class_name: &str, topic_name: &str, card_id: Uuid) -> Result<CardRecord> {
        self.catalog
            .read()
            .await
            .get_card(class_name, topic_name, card_id)
            .cloned()
    }

    pub async fn create_card(
        &self,
        class_name: &str,
        topic_name: &str,
        request: CreateCardRequest,
    ) -> Result<CardRecord> {
        self.mutate("create_card", |catalog| {
            let id = catalog.create_card(
                class_name,
                topic_name,
                &request.question,
                &request.answer,
                request.image_path.as_deref(),
            )?;
            catalog.get_card(class_name, topic_name, id).cloned()
        })
        .await
    }

    pub async fn update_card(
        &self,
        class_name: &str,
        topic_name: &str,
        card_id: Uuid,
        request: UpdateCardRequest,
    ) -> Result<CardRecord> {
        let update = self
            .mutate("update_card", |catalog| {
                catalog.update_card(class_name, topic_name, card_id, request)
            })
            .await?;
        self.release_images(update.released_image.into_iter().collect())
            .await;
        Ok(update.card)
    }

    pub async fn delete_card(&self, class_name: &str, topic_name: &str, card_id: Uuid) -> Result<CardRecord> {
        let removed = self
            .mutate("delete_card", |catalog| {
                catalog.delete_card(class_name, topic_name, card_id)
            })
            .await?;
        self.release_images(removed.image_path.clone().into_iter().collect())
            .await;
        Ok(removed)
    }

    // Studying

    pub async fn study_deck(&self, class_name: &str, topic_name: Option<&str>) -> Result<Vec<DeckCard>> {
        self.catalog.read().await.study_deck(class_name, topic_name)
    }

    pub async fn record_result(
        &self,
        class_name: &str,
        topic_name: &str,
        card_id: Uuid,
        result: CardResult,
    ) -> Result<()> {
        self.mutate("record_result", |catalog| {
            catalog.record_result(class_name, topic_name, card_id, result)
        })
        .await
    }

    // Images

    pub async fn import_image(&self, source_path: &Path) -> Result<String> {
        self.store.store_image(source_path).await
    }

    pub async fn paste_image(&self, data_url: &str) -> Result<String> {
        self.store.store_pasted_image(data_url).await
    }

    pub async fn read_image(&self, image_path: &str) -> Result<Option<ImageData>> {
        self.store.read_image(image_path).await
    }

    /// `Some(path)` only when the referenced file is present
    pub async fn available_image(&self, image_path: Option<&str>) -> Option<String> {
        let path = image_path?;
        if self.store.image_exists(path).await {
            Some(path.to_string())
        } else {
            None
        }
    }
}
