use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the last time a card was studied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardResult {
    #[default]
    Unseen,
    Correct,
    Incorrect,
}

impl CardResult {
    pub fn from_correct(correct: bool) -> Self {
        if correct {
            CardResult::Correct
        } else {
            CardResult::Incorrect
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: Uuid,
    pub question: String,
    #[serde(default)]
    pub answer: String,
    /// Relative to the storage root, e.g. `images/paste_1a2b3c4d5e.png`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default)]
    pub last_result: CardResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_studied: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardRecord {
    pub fn new(question: String, answer: String, image_path: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            question,
            answer,
            image_path,
            last_result: CardResult::Unseen,
            last_studied: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cards: Vec<CardRecord>,
}

impl TopicRecord {
    pub fn new(name: String) -> Self {
        Self {
            name,
            created_at: Utc::now(),
            cards: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub topics: Vec<TopicRecord>,
}

impl ClassRecord {
    pub fn new(name: String) -> Self {
        Self {
            name,
            created_at: Utc::now(),
            topics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummary {
    pub name: String,
    pub card_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassSummary {
    pub name: String,
    pub topic_count: usize,
    pub card_count: usize,
}

/// A card drawn into a study deck, tagged with the topic it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckCard {
    pub topic: String,
    pub card: CardRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClassRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTopicRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCardRequest {
    pub question: String,
    #[serde(default)]
    pub answer: String,
    pub image_path: Option<String>,
}

/// Partial card update; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCardRequest {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub image_path: Option<String>,
    #[serde(default)]
    pub remove_image: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportImageRequest {
    pub source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasteImageRequest {
    pub data_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredImage {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionRequest {
    pub class: String,
    /// `None` studies every topic in the class
    pub topic: Option<String>,
    pub shuffle: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkRequest {
    pub correct: bool,
}
