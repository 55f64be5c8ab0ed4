//! In-memory class → topic → card tree.
//!
//! Every operation here is synchronous and side-effect free; persistence is
//! layered on top by [`crate::catalog_service::CatalogService`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, StudyError};
use crate::models::*;
use crate::storage::ensure_image_path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub classes: Vec<ClassRecord>,
}

/// Result of an edit; `released_image` is the image the card no longer uses
#[derive(Debug, Clone)]
pub struct CardUpdate {
    pub card: CardRecord,
    pub released_image: Option<String>,
}

fn normalize_name(kind: &str, raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StudyError::Validation(format!("{} name cannot be blank", kind)));
    }
    Ok(name.to_string())
}

fn normalize_question(raw: &str) -> Result<String> {
    let question = raw.trim();
    if question.is_empty() {
        return Err(StudyError::Validation("Please enter a question".to_string()));
    }
    Ok(question.to_string())
}

fn class_not_found(class_name: &str) -> StudyError {
    StudyError::NotFound(format!("class '{}'", class_name.trim()))
}

fn topic_not_found(class_name: &str, topic_name: &str) -> StudyError {
    StudyError::NotFound(format!(
        "topic '{}' in class '{}'",
        topic_name.trim(),
        class_name.trim()
    ))
}

fn card_not_found(card_id: Uuid) -> StudyError {
    StudyError::NotFound(format!("card {}", card_id))
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn card_count(&self) -> usize {
        self.classes
            .iter()
            .flat_map(|class| &class.topics)
            .map(|topic| topic.cards.len())
            .sum()
    }

    pub fn class(&self, class_name: &str) -> Result<&ClassRecord> {
        let name = class_name.trim();
        self.classes
            .iter()
            .find(|class| class.name == name)
            .ok_or_else(|| class_not_found(class_name))
    }

    fn class_mut(&mut self, class_name: &str) -> Result<&mut ClassRecord> {
        let name = class_name.trim();
        self.classes
            .iter_mut()
            .find(|class| class.name == name)
            .ok_or_else(|| class_not_found(class_name))
    }

    pub fn topic(&self, class_name: &str, topic_name: &str) -> Result<&TopicRecord> {
        let name = topic_name.trim();
        self.class(class_name)?
            .topics
            .iter()
            .find(|topic| topic.name == name)
            .ok_or_else(|| topic_not_found(class_name, topic_name))
    }

    fn topic_mut(&mut self, class_name: &str, topic_name: &str) -> Result<&mut TopicRecord> {
        let name = topic_name.trim();
        self.class_mut(class_name)?
            .topics
            .iter_mut()
            .find(|topic| topic.name == name)
            .ok_or_else(|| topic_not_found(class_name, topic_name))
    }

    fn card_mut(
        &mut self,
        class_name: &str,
        topic_name: &str,
        card_id: Uuid,
    ) -> Result<&mut CardRecord> {
        self.topic_mut(class_name, topic_name)?
            .cards
            .iter_mut()
            .find(|card| card.id == card_id)
            .ok_or_else(|| card_not_found(card_id))
    }

    // Classes

    pub fn create_class(&mut self, name: &str) -> Result<&ClassRecord> {
        let name = normalize_name("Class", name)?;
        if self.classes.iter().any(|class| class.name == name) {
            return Err(StudyError::DuplicateName(format!("class '{}'", name)));
        }
        self.classes.push(ClassRecord::new(name));
        Ok(&self.classes[self.classes.len() - 1])
    }

    pub fn list_classes(&self) -> Vec<ClassSummary> {
        self.classes
            .iter()
            .map(|class| ClassSummary {
                name: class.name.clone(),
                topic_count: class.topics.len(),
                card_count: class.topics.iter().map(|topic| topic.cards.len()).sum(),
            })
            .collect()
    }

    /// Removes the class together with all of its topics and cards
    pub fn delete_class(&mut self, class_name: &str) -> Result<ClassRecord> {
        let name = class_name.trim();
        let position = self
            .classes
            .iter()
            .position(|class| class.name == name)
            .ok_or_else(|| class_not_found(class_name))?;
        Ok(self.classes.remove(position))
    }

    // Topics

    pub fn create_topic(&mut self, class_name: &str, topic_name: &str) -> Result<&TopicRecord> {
        let name = normalize_name("Topic", topic_name)?;
        let class = self.class_mut(class_name)?;
        if class.topics.iter().any(|topic| topic.name == name) {
            return Err(StudyError::DuplicateName(format!(
                "topic '{}' in class '{}'",
                name, class.name
            )));
        }
        class.topics.push(TopicRecord::new(name));
        Ok(&class.topics[class.topics.len() - 1])
    }

    pub fn list_topics(&self, class_name: &str) -> Result<&[TopicRecord]> {
        Ok(&self.class(class_name)?.topics)
    }

    pub fn topic_summaries(&self, class_name: &str) -> Result<Vec<TopicSummary>> {
        Ok(self
            .list_topics(class_name)?
            .iter()
            .map(|topic| TopicSummary {
                name: topic.name.clone(),
                card_count: topic.cards.len(),
            })
            .collect())
    }

    pub fn delete_topic(&mut self, class_name: &str, topic_name: &str) -> Result<TopicRecord> {
        let name = topic_name.trim();
        let class = self.class_mut(class_name)?;
        let position = class
            .topics
            .iter()
            .position(|topic| topic.name == name)
            .ok_or_else(|| topic_not_found(class_name, topic_name))?;
        Ok(class.topics.remove(position))
    }

    // Cards

    pub fn create_card(
        &mut self,
        class_name: &str,
        topic_name: &str,
        question: &str,
        answer: &str,
        image_path: Option<&str>,
    ) -> Result<Uuid> {
        let question = normalize_question(question)?;
        let image_path = image_path.map(ensure_image_path).transpose()?;
        let topic = self.topic_mut(class_name, topic_name)?;

        let card = CardRecord::new(question, answer.trim().to_string(), image_path);
        let id = card.id;
        topic.cards.push(card);
        Ok(id)
    }

    pub fn list_cards(&self, class_name: &str, topic_name: &str) -> Result<&[CardRecord]> {
        Ok(&self.topic(class_name, topic_name)?.cards)
    }

    pub fn get_card(&self, class_name: &str, topic_name: &str, card_id: Uuid) -> Result<&CardRecord> {
        self.list_cards(class_name, topic_name)?
            .iter()
            .find(|card| card.id == card_id)
            .ok_or_else(|| card_not_found(card_id))
    }

    pub fn update_card(
        &mut self,
        class_name: &str,
        topic_name: &str,
        card_id: Uuid,
        changes: UpdateCardRequest,
    ) -> Result<CardUpdate> {
        let question = changes.question.as_deref().map(normalize_question).transpose()?;
        let new_image = changes
            .image_path
            .as_deref()
            .map(ensure_image_path)
            .transpose()?;

        let card = self.card_mut(class_name, topic_name, card_id)?;
        if let Some(question) = question {
            card.question = question;
        }
        if let Some(answer) = changes.answer {
            card.answer = answer.trim().to_string();
        }

        let mut released_image = None;
        if new_image.is_some() || changes.remove_image {
            let previous = std::mem::replace(&mut card.image_path, new_image);
            if previous != card.image_path {
                released_image = previous;
            }
        }
        card.updated_at = Utc::now();

        Ok(CardUpdate {
            card: card.clone(),
            released_image,
        })
    }

    pub fn delete_card(
        &mut self,
        class_name: &str,
        topic_name: &str,
        card_id: Uuid,
    ) -> Result<CardRecord> {
        let topic = self.topic_mut(class_name, topic_name)?;
        let position = topic
            .cards
            .iter()
            .position(|card| card.id == card_id)
            .ok_or_else(|| card_not_found(card_id))?;
        Ok(topic.cards.remove(position))
    }

    /// Stores the outcome of studying a card
    pub fn record_result(
        &mut self,
        class_name: &str,
        topic_name: &str,
        card_id: Uuid,
        result: CardResult,
    ) -> Result<()> {
        let card = self.card_mut(class_name, topic_name, card_id)?;
        card.last_result = result;
        card.last_studied = Some(Utc::now());
        Ok(())
    }

    /// Cards of one topic, or of every topic in the class when `topic_name`
    /// is `None`, in stored order
    pub fn study_deck(&self, class_name: &str, topic_name: Option<&str>) -> Result<Vec<DeckCard>> {
        let topics: Vec<&TopicRecord> = match topic_name {
            Some(topic_name) => vec![self.topic(class_name, topic_name)?],
            None => self.class(class_name)?.topics.iter().collect(),
        };

        Ok(topics
            .into_iter()
            .flat_map(|topic| {
                topic.cards.iter().map(|card| DeckCard {
                    topic: topic.name.clone(),
                    card: card.clone(),
                })
            })
            .collect())
    }

    pub fn references_image(&self, image_path: &str) -> bool {
        self.classes
            .iter()
            .flat_map(|class| &class.topics)
            .flat_map(|topic| &topic.cards)
            .any(|card| card.image_path.as_deref() == Some(image_path))
    }
}

impl ClassRecord {
    pub fn image_paths(&self) -> Vec<String> {
        self.topics.iter().flat_map(TopicRecord::image_paths).collect()
    }
}

impl TopicRecord {
    pub fn image_paths(&self) -> Vec<String> {
        self.cards
            .iter()
            .filter_map(|card| card.image_path.clone())
            .collect()
    }
}
