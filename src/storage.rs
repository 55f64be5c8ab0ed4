//! Flat-file persistence for the catalog and its images.
//!
//! Layout under the data directory:
//! ```text
//! <data_dir>/
//! ├── catalog.json      # {"version": 1, "classes": [...]}
//! └── images/
//!     └── paste_1a2b3c4d5e.png
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::errors::{Result, StudyError};
use crate::models::{CardRecord, ClassRecord, TopicRecord, UpdateCardRequest};

use crate::log_storage_operation;

pub const CATALOG_FILE: &str = "catalog.json";
pub const IMAGES_DIR: &str = "images";
const CATALOG_VERSION: u32 = 1;
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const LEGACY_BACKUP_FILE: &str = "catalog.json.legacy";

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/([A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/=\s]+)$")
        .expect("data URL pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

#[derive(Serialize)]
struct CatalogFile<'a> {
    version: u32,
    classes: &'a [ClassRecord],
}

#[derive(Deserialize)]
struct RawClass {
    name: String,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    topics: Vec<Value>,
}

#[derive(Deserialize)]
struct RawTopic {
    name: String,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    cards: Vec<Value>,
}

/// Card shape written by the first version of the app
#[derive(Deserialize)]
struct LegacyCard {
    question: String,
    #[serde(default)]
    answer_text: String,
    #[serde(default)]
    answer_image: Option<String>,
}

/// Validates a path stored on a card. Only `images/<file>` with an image
/// extension is accepted, so a card can never point at the catalog itself.
pub fn ensure_image_path(path: &str) -> Result<String> {
    let normalized = path.trim().replace('\\', "/");
    let invalid = || {
        StudyError::Validation(format!(
            "Image path '{}' must name a {} file inside {}/",
            path.trim(),
            IMAGE_EXTENSIONS.join("/"),
            IMAGES_DIR
        ))
    };

    let Some((dir, file_name)) = normalized.split_once('/') else {
        return Err(invalid());
    };
    if dir != IMAGES_DIR || file_name.is_empty() || file_name.contains('/') || file_name.starts_with('.') {
        return Err(invalid());
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    match extension {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => Ok(normalized),
        _ => Err(invalid()),
    }
}

fn mime_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn image_extension(source: &Path) -> Result<String> {
    let extension = source
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();
    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(StudyError::Validation(format!(
            "Unsupported image type for '{}'; expected one of {}",
            source.display(),
            IMAGE_EXTENSIONS.join(", ")
        )));
    }
    Ok(extension)
}

fn generated_image_path(prefix: &str, extension: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}/{}_{}.{}", IMAGES_DIR, prefix, &id[..10], extension)
}

/// Decodes a `data:image/<type>;base64,...` URL into a file extension and bytes
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let captures = DATA_URL
        .captures(data_url.trim())
        .ok_or_else(|| StudyError::Validation("Expected a base64 image data URL".to_string()))?;

    let extension = match captures[1].to_lowercase().as_str() {
        "jpeg" | "jpg" => "jpg",
        "gif" => "gif",
        "webp" => "webp",
        _ => "png",
    };

    let payload: String = captures[2].split_whitespace().collect();
    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| StudyError::Validation(format!("Invalid base64 image data: {}", e)))?;
    if bytes.is_empty() {
        return Err(StudyError::Validation("Pasted image is empty".to_string()));
    }

    Ok((extension.to_string(), bytes))
}

/// An answer image named by a legacy catalog, still to be copied into `images/`
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyImage {
    pub class: String,
    pub topic: String,
    pub card_id: Uuid,
    pub source: String,
}

#[derive(Debug)]
pub struct ParsedCatalog {
    pub catalog: Catalog,
    /// `Some` when the file used the legacy layout
    pub legacy_images: Option<Vec<LegacyImage>>,
}

/// Parses catalog contents that have no directory to resolve legacy images
/// against; such images are dropped
pub fn parse_catalog(content: &str) -> Result<Catalog> {
    let parsed = parse_catalog_file(content)?;
    for image in parsed.legacy_images.iter().flatten() {
        warn!(component = "storage", source = %image.source, "Dropping legacy answer image");
    }
    Ok(parsed.catalog)
}

/// Parses catalog file contents, skipping records that are malformed or
/// break the naming invariants
pub fn parse_catalog_file(content: &str) -> Result<ParsedCatalog> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| StudyError::CorruptState(format!("{} is not valid JSON: {}", CATALOG_FILE, e)))?;

    let Value::Object(mut root) = value else {
        return Err(StudyError::CorruptState(format!(
            "{} must contain a JSON object",
            CATALOG_FILE
        )));
    };

    let Some(version) = root.get("version") else {
        let (catalog, legacy_images) = parse_legacy_catalog(root);
        return Ok(ParsedCatalog {
            catalog,
            legacy_images: Some(legacy_images),
        });
    };
    match version.as_u64() {
        Some(version) if version <= CATALOG_VERSION as u64 => {}
        _ => {
            return Err(StudyError::CorruptState(format!(
                "unsupported catalog version {}",
                version
            )))
        }
    }

    let classes = match root.remove("classes") {
        Some(Value::Array(classes)) => classes,
        None => Vec::new(),
        Some(_) => {
            return Err(StudyError::CorruptState(
                "'classes' must be an array".to_string(),
            ))
        }
    };

    let mut catalog = Catalog::new();
    for (index, raw) in classes.into_iter().enumerate() {
        let raw: RawClass = match serde_json::from_value(raw) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(component = "storage", index, error = %e, "Skipping malformed class record");
                continue;
            }
        };
        let name = raw.name.trim().to_string();
        if name.is_empty() || catalog.classes.iter().any(|class| class.name == name) {
            warn!(component = "storage", class = %name, "Skipping blank or duplicate class");
            continue;
        }

        let mut class = ClassRecord {
            name,
            created_at: raw.created_at,
            topics: Vec::new(),
        };
        for raw_topic in raw.topics {
            if let Some(topic) = parse_topic(&class, raw_topic) {
                class.topics.push(topic);
            }
        }
        catalog.classes.push(class);
    }

    Ok(ParsedCatalog {
        catalog,
        legacy_images: None,
    })
}

fn parse_topic(class: &ClassRecord, raw: Value) -> Option<TopicRecord> {
    let raw: RawTopic = match serde_json::from_value(raw) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(component = "storage", class = %class.name, error = %e, "Skipping malformed topic record");
            return None;
        }
    };
    let name = raw.name.trim().to_string();
    if name.is_empty() || class.topics.iter().any(|topic| topic.name == name) {
        warn!(component = "storage", class = %class.name, topic = %name, "Skipping blank or duplicate topic");
        return None;
    }

    let mut topic = TopicRecord {
        name,
        created_at: raw.created_at,
        cards: Vec::new(),
    };
    for raw_card in raw.cards {
        match serde_json::from_value::<CardRecord>(raw_card) {
            Ok(card) if card.question.trim().is_empty() => {
                warn!(component = "storage", topic = %topic.name, card_id = %card.id, "Skipping card without a question");
            }
            Ok(card) if topic.cards.iter().any(|existing| existing.id == card.id) => {
                warn!(component = "storage", topic = %topic.name, card_id = %card.id, "Skipping duplicate card id");
            }
            Ok(mut card) => {
                if let Some(path) = card.image_path.take() {
                    match ensure_image_path(&path) {
                        Ok(path) => card.image_path = Some(path),
                        Err(_) => warn!(component = "storage", card_id = %card.id, path = %path, "Dropping image path outside the images directory"),
                    }
                }
                topic.cards.push(card);
            }
            Err(e) => {
                warn!(component = "storage", topic = %topic.name, error = %e, "Skipping malformed card record");
            }
        }
    }
    Some(topic)
}

/// Converts `{class: {topic: [{question, answer_text, answer_image}]}}`.
/// Answer images are returned separately since they live outside `images/`.
fn parse_legacy_catalog(root: serde_json::Map<String, Value>) -> (Catalog, Vec<LegacyImage>) {
    log_storage_operation!(info, "load_catalog", "converting legacy catalog layout");

    let mut catalog = Catalog::new();
    let mut images = Vec::new();
    for (class_name, topics) in root {
        let Value::Object(topics) = topics else {
            warn!(component = "storage", class = %class_name, "Skipping legacy class that is not an object");
            continue;
        };
        if catalog.create_class(&class_name).is_err() {
            warn!(component = "storage", class = %class_name, "Skipping blank or duplicate legacy class");
            continue;
        }

        for (topic_name, cards) in topics {
            let Value::Array(cards) = cards else {
                warn!(component = "storage", topic = %topic_name, "Skipping legacy topic that is not a list");
                continue;
            };
            if catalog.create_topic(&class_name, &topic_name).is_err() {
                warn!(component = "storage", topic = %topic_name, "Skipping blank or duplicate legacy topic");
                continue;
            }

            for raw_card in cards {
                let card: LegacyCard = match serde_json::from_value(raw_card) {
                    Ok(card) => card,
                    Err(e) => {
                        warn!(component = "storage", topic = %topic_name, error = %e, "Skipping malformed legacy card");
                        continue;
                    }
                };
                let card_id = match catalog.create_card(
                    &class_name,
                    &topic_name,
                    &card.question,
                    &card.answer_text,
                    None,
                ) {
                    Ok(card_id) => card_id,
                    Err(e) => {
                        warn!(component = "storage", topic = %topic_name, error = %e, "Skipping invalid legacy card");
                        continue;
                    }
                };
                if let Some(source) = card.answer_image.filter(|path| !path.trim().is_empty()) {
                    images.push(LegacyImage {
                        class: class_name.clone(),
                        topic: topic_name.clone(),
                        card_id,
                        source,
                    });
                }
            }
        }
    }
    (catalog, images)
}

fn serialize_catalog(catalog: &Catalog) -> Result<String> {
    Ok(serde_json::to_string_pretty(&CatalogFile {
        version: CATALOG_VERSION,
        classes: &catalog.classes,
    })?)
}

/// Catalog and image storage rooted at one directory on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    fn resolve(&self, image_path: &str) -> Result<PathBuf> {
        Ok(self.root.join(ensure_image_path(image_path)?))
    }

    pub async fn load_catalog(&self) -> Result<Catalog> {
        let path = self.catalog_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log_storage_operation!(info, "load_catalog", "no catalog file yet, starting empty");
                return Ok(Catalog::new());
            }
            Err(e) => {
                return Err(StudyError::CorruptState(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let parsed = parse_catalog_file(&content)?;
        match parsed.legacy_images {
            Some(legacy_images) => Ok(self.upgrade_legacy_catalog(parsed.catalog, legacy_images).await),
            None => Ok(parsed.catalog),
        }
    }

    /// Copies legacy answer images into `images/`, keeps the legacy file as
    /// `catalog.json.legacy` and writes the converted catalog. Legacy image
    /// paths are resolved against the data directory the legacy file sits in.
    async fn upgrade_legacy_catalog(&self, mut catalog: Catalog, legacy_images: Vec<LegacyImage>) -> Catalog {
        for image in legacy_images {
            let source = Path::new(&image.source);
            let source = if source.is_absolute() {
                source.to_path_buf()
            } else {
                self.root.join(source)
            };
            if !fs::try_exists(&source).await.unwrap_or(false) {
                warn!(component = "storage", source = %source.display(), "Legacy answer image is missing, dropping it");
                continue;
            }

            let stored = match self.store_image(&source).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(component = "storage", source = %source.display(), error = %e, "Could not copy legacy answer image");
                    continue;
                }
            };
            let changes = UpdateCardRequest {
                image_path: Some(stored),
                ..UpdateCardRequest::default()
            };
            if let Err(e) = catalog.update_card(&image.class, &image.topic, image.card_id, changes) {
                warn!(component = "storage", card_id = %image.card_id, error = %e, "Could not attach legacy answer image");
            }
        }

        if let Err(e) = fs::copy(self.catalog_path(), self.root.join(LEGACY_BACKUP_FILE)).await {
            warn!(component = "storage", error = %e, "Could not back up legacy catalog");
            return catalog;
        }
        match self.save_catalog(&catalog).await {
            Ok(()) => {
                log_storage_operation!(
                    info,
                    "load_catalog",
                    format!("converted legacy catalog, original kept as {}", LEGACY_BACKUP_FILE)
                );
            }
            Err(e) => warn!(component = "storage", error = %e, "Could not write converted legacy catalog"),
        }
        catalog
    }

    /// Writes to a temporary file and renames it over the catalog
    pub async fn save_catalog(&self, catalog: &Catalog) -> Result<()> {
        let start = Instant::now();
        let json = serialize_catalog(catalog)?;

        fs::create_dir_all(&self.root).await?;
        let path = self.catalog_path();
        let tmp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;

        log_storage_operation!(
            debug,
            "save_catalog",
            count = catalog.classes.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(())
    }

    /// Moves an unreadable catalog aside so the next save cannot overwrite it
    pub async fn quarantine_catalog(&self) -> Result<Option<String>> {
        let path = self.catalog_path();
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let backup = format!(
            "{}.corrupt-{}",
            CATALOG_FILE,
            Utc::now().format("%Y%m%d%H%M%S")
        );
        fs::rename(&path, self.root.join(&backup)).await?;
        Ok(Some(backup))
    }

    pub async fn store_image(&self, source_path: &Path) -> Result<String> {
        let extension = image_extension(source_path)?;
        let relative = generated_image_path("img", &extension);

        fs::create_dir_all(self.images_dir()).await?;
        fs::copy(source_path, self.root.join(&relative)).await?;

        log_storage_operation!(debug, "store_image", path = relative);
        Ok(relative)
    }

    pub async fn store_pasted_image(&self, data_url: &str) -> Result<String> {
        let (extension, bytes) = decode_data_url(data_url)?;
        let relative = generated_image_path("paste", &extension);

        fs::create_dir_all(self.images_dir()).await?;
        fs::write(self.root.join(&relative), bytes).await?;

        log_storage_operation!(debug, "store_pasted_image", path = relative);
        Ok(relative)
    }

    /// `None` when the file is missing
    pub async fn read_image(&self, image_path: &str) -> Result<Option<ImageData>> {
        let full_path = self.resolve(image_path)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(Some(ImageData {
                bytes,
                mime_type: mime_type_for(image_path),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn image_exists(&self, image_path: &str) -> bool {
        match self.resolve(image_path) {
            Ok(full_path) => fs::try_exists(full_path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn remove_image(&self, image_path: &str) -> Result<()> {
        let full_path = self.resolve(image_path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {
                log_storage_operation!(debug, "remove_image", path = image_path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps everything in memory; used by tests and throwaway sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    catalog_json: Arc<Mutex<Option<String>>>,
    images: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from raw catalog file contents
    pub fn with_catalog_json(content: impl Into<String>) -> Self {
        Self {
            catalog_json: Arc::new(Mutex::new(Some(content.into()))),
            ..Self::default()
        }
    }

    /// Makes every following save fail with an IO error
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn catalog_json(&self) -> Option<String> {
        self.catalog_json.lock().await.clone()
    }

    pub async fn load_catalog(&self) -> Result<Catalog> {
        match self.catalog_json.lock().await.as_deref() {
            Some(content) => parse_catalog(content),
            None => Ok(Catalog::new()),
        }
    }

    pub async fn save_catalog(&self, catalog: &Catalog) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StudyError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated save failure",
            )));
        }
        let json = serialize_catalog(catalog)?;
        *self.catalog_json.lock().await = Some(json);
        Ok(())
    }

    pub async fn quarantine_catalog(&self) -> Result<Option<String>> {
        Ok(self
            .catalog_json
            .lock()
            .await
            .take()
            .map(|_| format!("{}.corrupt", CATALOG_FILE)))
    }

    pub async fn store_image(&self, source_path: &Path) -> Result<String> {
        let extension = image_extension(source_path)?;
        let bytes = fs::read(source_path).await?;
        let relative = generated_image_path("img", &extension);
        self.images.lock().await.insert(relative.clone(), bytes);
        Ok(relative)
    }

    pub async fn store_pasted_image(&self, data_url: &str) -> Result<String> {
        let (extension, bytes) = decode_data_url(data_url)?;
        let relative = generated_image_path("paste", &extension);
        self.images.lock().await.insert(relative.clone(), bytes);
        Ok(relative)
    }

    pub async fn read_image(&self, image_path: &str) -> Result<Option<ImageData>> {
        let relative = ensure_image_path(image_path)?;
        Ok(self.images.lock().await.get(&relative).map(|bytes| ImageData {
            bytes: bytes.clone(),
            mime_type: mime_type_for(&relative),
        }))
    }

    pub async fn image_exists(&self, image_path: &str) -> bool {
        match ensure_image_path(image_path) {
            Ok(relative) => self.images.lock().await.contains_key(&relative),
            Err(_) => false,
        }
    }

    pub async fn remove_image(&self, image_path: &str) -> Result<()> {
        let relative = ensure_image_path(image_path)?;
        self.images.lock().await.remove(&relative);
        Ok(())
    }
}

/// Storage backend chosen at startup
#[derive(Debug, Clone)]
pub enum CatalogStore {
    File(FileStore),
    Memory(MemoryStore),
}

impl CatalogStore {
    pub fn file(root: impl Into<PathBuf>) -> Self {
        CatalogStore::File(FileStore::new(root))
    }

    pub fn memory() -> Self {
        CatalogStore::Memory(MemoryStore::new())
    }

    pub async fn load_catalog(&self) -> Result<Catalog> {
        match self {
            CatalogStore::File(store) => store.load_catalog().await,
            CatalogStore::Memory(store) => store.load_catalog().await,
        }
    }

    pub async fn save_catalog(&self, catalog: &Catalog) -> Result<()> {
        match self {
            CatalogStore::File(store) => store.save_catalog(catalog).await,
            CatalogStore::Memory(store) => store.save_catalog(catalog).await,
        }
    }

    pub async fn quarantine_catalog(&self) -> Result<Option<String>> {
        match self {
            CatalogStore::File(store) => store.quarantine_catalog().await,
            CatalogStore::Memory(store) => store.quarantine_catalog().await,
        }
    }

    pub async fn store_image(&self, source_path: &Path) -> Result<String> {
        match self {
            CatalogStore::File(store) => store.store_image(source_path).await,
            CatalogStore::Memory(store) => store.store_image(source_path).await,
        }
    }

    pub async fn store_pasted_image(&self, data_url: &str) -> Result<String> {
        match self {
            CatalogStore::File(store) => store.store_pasted_image(data_url).await,
            CatalogStore::Memory(store) => store.store_pasted_image(data_url).await,
        }
    }

    pub async fn read_image(&self, image_path: &str) -> Result<Option<ImageData>> {
        match self {
            CatalogStore::File(store) => store.read_image(image_path).await,
            CatalogStore::Memory(store) => store.read_image(image_path).await,
        }
    }

    pub async fn image_exists(&self, image_path: &str) -> bool {
        match self {
            CatalogStore::File(store) => store.image_exists(image_path).await,
            CatalogStore::Memory(store) => store.image_exists(image_path).await,
        }
    }

    pub async fn remove_image(&self, image_path: &str) -> Result<()> {
        match self {
            CatalogStore::File(store) => store.remove_image(image_path).await,
            CatalogStore::Memory(store) => store.remove_image(image_path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CardResult;

    const TINY_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn sample_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.create_class("Biology").unwrap();
        catalog.create_topic("Biology", "Cells").unwrap();
        catalog.create_topic("Biology", "Genetics").unwrap();
        let id = catalog
            .create_card(
                "Biology",
                "Cells",
                "What is the powerhouse of the cell?",
                "Mitochondria",
                Some("images/mito.png"),
            )
            .unwrap();
        catalog
            .record_result("Biology", "Cells", id, CardResult::Correct)
            .unwrap();
        catalog
            .create_card("Biology", "Genetics", "What carries genes?", "DNA", None)
            .unwrap();
        catalog.create_class("History").unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let catalog = sample_catalog();

        store.save_catalog(&catalog).await.unwrap();
        let loaded = store.load_catalog().await.unwrap();

        assert_eq!(loaded, catalog);
        assert!(!dir.path().join("catalog.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_catalog_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("not-created-yet"));
        let loaded = store.load_catalog().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_catalog_is_corrupt_and_can_be_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CATALOG_FILE), "{ not json").unwrap();
        let store = FileStore::new(dir.path());

        let result = store.load_catalog().await;
        assert!(matches!(result, Err(StudyError::CorruptState(_))));

        let backup = store.quarantine_catalog().await.unwrap().unwrap();
        assert!(backup.starts_with("catalog.json.corrupt-"));
        assert!(dir.path().join(&backup).exists());
        assert!(!dir.path().join(CATALOG_FILE).exists());
    }

    #[test]
    fn test_non_object_catalog_is_corrupt() {
        assert!(matches!(parse_catalog("[1, 2, 3]"), Err(StudyError::CorruptState(_))));
        assert!(matches!(
            parse_catalog(r#"{"version": 99, "classes": []}"#),
            Err(StudyError::CorruptState(_))
        ));
        assert!(matches!(
            parse_catalog(r#"{"version": 1, "classes": {}}"#),
            Err(StudyError::CorruptState(_))
        ));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let content = r#"{
            "version": 1,
            "classes": [
                {"name": "Biology", "topics": [
                    {"name": "Cells", "cards": [
                        {"id": "3f2c6a4e-8f51-4c6b-9a55-0d7c2b1e9a10", "question": "Q1", "answer": "A1",
                         "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"},
                        {"question": 42},
                        {"id": "3f2c6a4e-8f51-4c6b-9a55-0d7c2b1e9a10", "question": "dup", "answer": "",
                         "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"}
                    ]},
                    {"name": "Cells", "cards": []},
                    {"cards": []}
                ]},
                {"name": "Biology"},
                "not a class",
                {"name": "History"}
            ]
        }"#;

        let catalog = parse_catalog(content).unwrap();
        let names: Vec<_> = catalog.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Biology", "History"]);

        let topics = catalog.list_topics("Biology").unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].cards.len(), 1);
        assert_eq!(topics[0].cards[0].question, "Q1");
        assert_eq!(topics[0].cards[0].last_result, CardResult::Unseen);
    }

    #[tokio::test]
    async fn test_legacy_catalog_is_converted_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("flashcard_images")).unwrap();
        std::fs::write(dir.path().join("flashcard_images/whale.png"), b"whale bytes").unwrap();
        let content = r#"{
            "Zoology": {"Mammals": [
                {"question": "Largest mammal?", "answer_text": "Blue whale", "answer_image": "flashcard_images/whale.png"},
                {"question": "Fastest land mammal?", "answer_text": "Cheetah", "answer_image": null},
                {"question": "Tallest mammal?", "answer_text": "Giraffe", "answer_image": "flashcard_images/gone.png"}
            ]},
            "Algebra": {}
        }"#;
        std::fs::write(dir.path().join(CATALOG_FILE), content).unwrap();

        let store = FileStore::new(dir.path());
        let catalog = store.load_catalog().await.unwrap();
        let names: Vec<_> = catalog.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Zoology", "Algebra"]);

        let cards = catalog.list_cards("Zoology", "Mammals").unwrap();
        assert_eq!(cards.len(), 3);
        assert_eq!(cards[0].answer, "Blue whale");
        let copied = cards[0].image_path.as_deref().unwrap();
        assert!(copied.starts_with("images/img_"));
        assert_eq!(std::fs::read(dir.path().join(copied)).unwrap(), b"whale bytes");
        assert_eq!(cards[1].question, "Fastest land mammal?");
        assert!(cards[1].image_path.is_none());
        assert!(cards[2].image_path.is_none());

        // The original file is kept and the catalog is rewritten once
        assert!(dir.path().join(LEGACY_BACKUP_FILE).exists());
        let reloaded = store.load_catalog().await.unwrap();
        assert_eq!(reloaded, catalog);
    }

    #[test]
    fn test_legacy_images_without_a_directory_are_dropped() {
        let content = r#"{"Zoology": {"Mammals": [
            {"question": "Largest mammal?", "answer_text": "Blue whale", "answer_image": "flashcard_images/whale.png"}
        ]}}"#;

        let parsed = parse_catalog_file(content).unwrap();
        let images = parsed.legacy_images.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].source, "flashcard_images/whale.png");

        let catalog = parse_catalog(content).unwrap();
        assert!(catalog.list_cards("Zoology", "Mammals").unwrap()[0].image_path.is_none());
    }

    #[test]
    fn test_image_path_validation() {
        assert_eq!(ensure_image_path(" images/a.png ").unwrap(), "images/a.png");
        assert_eq!(ensure_image_path("images\\a.JPG").unwrap(), "images/a.JPG");
        assert!(ensure_image_path("/etc/passwd").is_err());
        assert!(ensure_image_path("images/../../secret.png").is_err());
        assert!(ensure_image_path("images/../catalog.json").is_err());
        assert!(ensure_image_path("catalog.json").is_err());
        assert!(ensure_image_path("a.png").is_err());
        assert!(ensure_image_path("images/notes.txt").is_err());
        assert!(ensure_image_path("images/nested/a.png").is_err());
        assert!(ensure_image_path("images/.png").is_err());
        assert!(ensure_image_path("").is_err());
    }

    #[test]
    fn test_stored_image_outside_images_dir_is_dropped() {
        let content = r#"{"version": 1, "classes": [
            {"name": "Biology", "topics": [{"name": "Cells", "cards": [
                {"id": "3f2c6a4e-8f51-4c6b-9a55-0d7c2b1e9a10", "question": "Q1", "answer": "A1",
                 "image_path": "catalog.json",
                 "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"},
                {"id": "5b0e9d1c-2a47-4f3e-8c61-7d9a0b2c3e4f", "question": "Q2", "answer": "A2",
                 "image_path": "images/cell.png",
                 "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"}
            ]}]}
        ]}"#;

        let catalog = parse_catalog(content).unwrap();
        let cards = catalog.list_cards("Biology", "Cells").unwrap();
        assert_eq!(cards.len(), 2);
        assert!(cards[0].image_path.is_none());
        assert_eq!(cards[1].image_path.as_deref(), Some("images/cell.png"));
    }

    #[tokio::test]
    async fn test_catalog_file_is_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_catalog(&sample_catalog()).await.unwrap();

        assert!(matches!(
            store.read_image(CATALOG_FILE).await,
            Err(StudyError::Validation(_))
        ));
        assert!(store.remove_image(CATALOG_FILE).await.is_err());
        assert!(!store.image_exists(CATALOG_FILE).await);
        assert!(dir.path().join(CATALOG_FILE).exists());
    }

    #[test]
    fn test_decode_data_url() {
        let (extension, bytes) = decode_data_url(TINY_PNG).unwrap();
        assert_eq!(extension, "png");
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));

        let (extension, _) = decode_data_url("data:image/jpeg;base64,/9j/4AAQ").unwrap();
        assert_eq!(extension, "jpg");

        let (extension, _) = decode_data_url("data:image/bmp;base64,Qk0=").unwrap();
        assert_eq!(extension, "png");

        assert!(matches!(
            decode_data_url("data:text/plain;base64,aGVsbG8="),
            Err(StudyError::Validation(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(StudyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_store_and_remove_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data"));

        let source = dir.path().join("diagram.PNG");
        std::fs::write(&source, b"fake png bytes").unwrap();

        let copied = store.store_image(&source).await.unwrap();
        assert!(copied.starts_with("images/img_"));
        assert!(copied.ends_with(".png"));
        assert!(store.image_exists(&copied).await);

        let image = store.read_image(&copied).await.unwrap().unwrap();
        assert_eq!(image.bytes, b"fake png bytes");
        assert_eq!(image.mime_type, "image/png");

        let pasted = store.store_pasted_image(TINY_PNG).await.unwrap();
        assert!(pasted.starts_with("images/paste_"));
        assert!(store.image_exists(&pasted).await);

        store.remove_image(&copied).await.unwrap();
        assert!(!store.image_exists(&copied).await);
        assert!(store.read_image(&copied).await.unwrap().is_none());
        // Removing twice is fine
        store.remove_image(&copied).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_image_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"hello").unwrap();
        assert!(matches!(
            store.store_image(&text).await,
            Err(StudyError::Validation(_))
        ));

        let missing = dir.path().join("missing.png");
        assert!(matches!(store.store_image(&missing).await, Err(StudyError::Io(_))));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_failures() {
        let store = MemoryStore::new();
        let catalog = sample_catalog();

        store.save_catalog(&catalog).await.unwrap();
        assert_eq!(store.load_catalog().await.unwrap(), catalog);

        store.set_fail_saves(true);
        assert!(matches!(store.save_catalog(&Catalog::new()).await, Err(StudyError::Io(_))));
        assert_eq!(store.load_catalog().await.unwrap(), catalog);
    }
}
