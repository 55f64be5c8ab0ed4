//! Study session state machine.
//!
//! ```text
//! Idle ──start──▶ AwaitingReveal ──reveal──▶ Revealed ──mark/skip──┬──▶ AwaitingReveal
//!                                                                  └──▶ Finished
//! ```
//!
//! Every transition hands back a [`SessionSnapshot`] so callers can re-render
//! from an explicit value instead of watching the session mutate.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, StudyError};
use crate::models::{CardResult, DeckCard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingReveal,
    Revealed,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardOrder {
    #[default]
    Stored,
    Shuffled,
}

impl CardOrder {
    pub fn from_shuffle(shuffle: bool) -> Self {
        if shuffle {
            CardOrder::Shuffled
        } else {
            CardOrder::Stored
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Mastering,
    Good,
    KeepPracticing,
}

impl Grade {
    pub fn from_score(score_percent: u32) -> Self {
        if score_percent >= 80 {
            Grade::Mastering
        } else if score_percent >= 60 {
            Grade::Good
        } else {
            Grade::KeepPracticing
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Grade::Mastering => "Great job! You're mastering this material!",
            Grade::Good => "Good effort! Keep practicing the ones you missed.",
            Grade::KeepPracticing => "Keep going! Repetition is key to learning.",
        }
    }
}

/// The card in front of the user; answer fields stay empty until revealed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentCard {
    pub card_id: Uuid,
    pub topic: String,
    pub question: String,
    pub answer: Option<String>,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// 1-based position of the current card, 0 before the session starts
    pub position: usize,
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub skipped: usize,
    pub progress_percent: f64,
    pub order: CardOrder,
    pub current: Option<CurrentCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissedCard {
    pub card_id: Uuid,
    pub topic: String,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub correct: usize,
    pub incorrect: usize,
    pub skipped: usize,
    pub total: usize,
    pub score_percent: u32,
    pub grade: Grade,
    pub message: &'static str,
    pub missed: Vec<MissedCard>,
}

/// Outcome of marking a card, with the state the session moved to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkedCard {
    pub card_id: Uuid,
    pub topic: String,
    pub result: CardResult,
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Clone)]
pub struct StudySession {
    deck: Vec<DeckCard>,
    order: CardOrder,
    position: usize,
    state: SessionState,
    correct: usize,
    incorrect: usize,
    skipped: usize,
    missed: Vec<MissedCard>,
}

impl Default for StudySession {
    fn default() -> Self {
        Self::new()
    }
}

pub fn shuffle_deck<R: Rng + ?Sized>(deck: &mut [DeckCard], rng: &mut R) {
    deck.shuffle(rng);
}

impl StudySession {
    pub fn new() -> Self {
        Self {
            deck: Vec::new(),
            order: CardOrder::Stored,
            position: 0,
            state: SessionState::Idle,
            correct: 0,
            incorrect: 0,
            skipped: 0,
            missed: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Starts (or restarts) a pass over `deck`
    pub fn start(&mut self, deck: Vec<DeckCard>, order: CardOrder) -> Result<SessionSnapshot> {
        if deck.is_empty() {
            return Err(StudyError::EmptySession);
        }

        self.deck = deck;
        if order == CardOrder::Shuffled {
            shuffle_deck(&mut self.deck, &mut rand::thread_rng());
        }
        self.order = order;
        self.position = 0;
        self.correct = 0;
        self.incorrect = 0;
        self.skipped = 0;
        self.missed.clear();
        self.state = SessionState::AwaitingReveal;

        Ok(self.snapshot())
    }

    /// Runs the same deck again from the top
    pub fn restart(&mut self) -> Result<SessionSnapshot> {
        if self.state == SessionState::Idle {
            return Err(StudyError::InvalidState(
                "session has not been started".to_string(),
            ));
        }
        let deck = std::mem::take(&mut self.deck);
        self.start(deck, self.order)
    }

    pub fn reveal(&mut self) -> Result<SessionSnapshot> {
        self.expect_state(SessionState::AwaitingReveal, "reveal")?;
        self.state = SessionState::Revealed;
        Ok(self.snapshot())
    }

    pub fn mark(&mut self, correct: bool) -> Result<MarkedCard> {
        self.expect_state(SessionState::Revealed, "mark")?;

        let entry = &self.deck[self.position];
        let card_id = entry.card.id;
        let topic = entry.topic.clone();
        if correct {
            self.correct += 1;
        } else {
            self.incorrect += 1;
            self.missed.push(MissedCard {
                card_id,
                topic: topic.clone(),
                question: entry.card.question.clone(),
            });
        }
        self.advance();

        Ok(MarkedCard {
            card_id,
            topic,
            result: CardResult::from_correct(correct),
            snapshot: self.snapshot(),
        })
    }

    /// Moves past a revealed card without counting it either way
    pub fn skip(&mut self) -> Result<SessionSnapshot> {
        self.expect_state(SessionState::Revealed, "skip")?;
        self.skipped += 1;
        self.advance();
        Ok(self.snapshot())
    }

    pub fn summary(&self) -> Result<SessionSummary> {
        self.expect_state(SessionState::Finished, "summarize")?;

        let marked = self.correct + self.incorrect;
        let score_percent = if marked == 0 {
            0
        } else {
            (self.correct as f64 / marked as f64 * 100.0).round() as u32
        };
        let grade = Grade::from_score(score_percent);

        Ok(SessionSummary {
            correct: self.correct,
            incorrect: self.incorrect,
            skipped: self.skipped,
            total: self.deck.len(),
            score_percent,
            grade,
            message: grade.message(),
            missed: self.missed.clone(),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let total = self.deck.len();
        let (position, progress_percent) = match self.state {
            SessionState::Idle => (0, 0.0),
            SessionState::Finished => (total, 100.0),
            _ => (
                self.position + 1,
                self.position as f64 / total as f64 * 100.0,
            ),
        };

        let current = match self.state {
            SessionState::AwaitingReveal | SessionState::Revealed => {
                let entry = &self.deck[self.position];
                let revealed = self.state == SessionState::Revealed;
                Some(CurrentCard {
                    card_id: entry.card.id,
                    topic: entry.topic.clone(),
                    question: entry.card.question.clone(),
                    answer: revealed.then(|| entry.card.answer.clone()),
                    image_path: if revealed {
                        entry.card.image_path.clone()
                    } else {
                        None
                    },
                })
            }
            SessionState::Idle | SessionState::Finished => None,
        };

        SessionSnapshot {
            state: self.state,
            position,
            total,
            correct: self.correct,
            incorrect: self.incorrect,
            skipped: self.skipped,
            progress_percent,
            order: self.order,
            current,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        self.state = if self.position >= self.deck.len() {
            SessionState::Finished
        } else {
            SessionState::AwaitingReveal
        };
    }

    fn expect_state(&self, expected: SessionState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(StudyError::InvalidState(format!(
                "cannot {} while session is {:?}",
                action, self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CardRecord;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn deck(count: usize) -> Vec<DeckCard> {
        (1..=count)
            .map(|n| DeckCard {
                topic: "Cells".to_string(),
                card: CardRecord::new(format!("Q{}", n), format!("A{}", n), None),
            })
            .collect()
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = StudySession::new();
        assert_eq!(session.state(), SessionState::Idle);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.position, 0);
        assert!(snapshot.current.is_none());
    }

    #[test]
    fn test_empty_deck_rejected() {
        let mut session = StudySession::new();
        assert!(matches!(
            session.start(Vec::new(), CardOrder::Stored),
            Err(StudyError::EmptySession)
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_mark_before_reveal_is_invalid() {
        let mut session = StudySession::new();
        assert!(matches!(session.mark(true), Err(StudyError::InvalidState(_))));
        assert!(matches!(session.reveal(), Err(StudyError::InvalidState(_))));

        session.start(deck(2), CardOrder::Stored).unwrap();
        assert!(matches!(session.mark(true), Err(StudyError::InvalidState(_))));
        assert!(matches!(session.skip(), Err(StudyError::InvalidState(_))));
        assert!(matches!(session.summary(), Err(StudyError::InvalidState(_))));

        session.reveal().unwrap();
        assert!(matches!(session.reveal(), Err(StudyError::InvalidState(_))));
    }

    #[test]
    fn test_three_card_scenario_summary() {
        let mut session = StudySession::new();
        session.start(deck(3), CardOrder::Stored).unwrap();

        for correct in [true, false, true] {
            session.reveal().unwrap();
            session.mark(correct).unwrap();
        }

        assert_eq!(session.state(), SessionState::Finished);
        let summary = session.summary().unwrap();
        assert_eq!(summary.correct, 2);
        assert_eq!(summary.incorrect, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.correct + summary.incorrect, summary.total);
        assert_eq!(summary.score_percent, 67);
        assert_eq!(summary.grade, Grade::Good);
        assert_eq!(summary.missed.len(), 1);
        assert_eq!(summary.missed[0].question, "Q2");

        assert!(matches!(session.reveal(), Err(StudyError::InvalidState(_))));
    }

    #[test]
    fn test_answer_hidden_until_revealed() {
        let mut session = StudySession::new();
        let cards = vec![DeckCard {
            topic: "Cells".to_string(),
            card: CardRecord::new(
                "Draw a cell".to_string(),
                "See diagram".to_string(),
                Some("images/cell.png".to_string()),
            ),
        }];

        let snapshot = session.start(cards, CardOrder::Stored).unwrap();
        let current = snapshot.current.unwrap();
        assert_eq!(snapshot.state, SessionState::AwaitingReveal);
        assert_eq!(snapshot.position, 1);
        assert_eq!(current.question, "Draw a cell");
        assert!(current.answer.is_none());
        assert!(current.image_path.is_none());

        let current = session.reveal().unwrap().current.unwrap();
        assert_eq!(current.answer.as_deref(), Some("See diagram"));
        assert_eq!(current.image_path.as_deref(), Some("images/cell.png"));

        let marked = session.mark(false).unwrap();
        assert_eq!(marked.result, CardResult::Incorrect);
        assert_eq!(marked.snapshot.state, SessionState::Finished);
        assert_eq!(marked.snapshot.progress_percent, 100.0);
    }

    #[test]
    fn test_skip_is_not_counted() {
        let mut session = StudySession::new();
        session.start(deck(3), CardOrder::Stored).unwrap();

        session.reveal().unwrap();
        session.skip().unwrap();
        session.reveal().unwrap();
        session.mark(true).unwrap();
        session.reveal().unwrap();
        let snapshot = session.skip().unwrap();
        assert_eq!(snapshot.state, SessionState::Finished);

        let summary = session.summary().unwrap();
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.incorrect, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.correct + summary.incorrect + summary.skipped, summary.total);
        assert_eq!(summary.score_percent, 100);
        assert_eq!(summary.grade, Grade::Mastering);
    }

    #[test]
    fn test_all_skipped_scores_zero() {
        let mut session = StudySession::new();
        session.start(deck(1), CardOrder::Stored).unwrap();
        session.reveal().unwrap();
        session.skip().unwrap();

        let summary = session.summary().unwrap();
        assert_eq!(summary.score_percent, 0);
        assert_eq!(summary.grade, Grade::KeepPracticing);
    }

    #[test]
    fn test_restart_resets_counts() {
        let mut session = StudySession::new();
        assert!(matches!(session.restart(), Err(StudyError::InvalidState(_))));

        session.start(deck(2), CardOrder::Stored).unwrap();
        session.reveal().unwrap();
        session.mark(false).unwrap();

        let snapshot = session.restart().unwrap();
        assert_eq!(snapshot.state, SessionState::AwaitingReveal);
        assert_eq!(snapshot.position, 1);
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.incorrect, 0);
        assert_eq!(snapshot.current.unwrap().question, "Q1");
    }

    #[test]
    fn test_stored_order_and_progress() {
        let mut session = StudySession::new();
        session.start(deck(4), CardOrder::Stored).unwrap();

        let mut questions = Vec::new();
        while session.state() != SessionState::Finished {
            let snapshot = session.reveal().unwrap();
            assert_eq!(
                snapshot.progress_percent,
                (snapshot.position - 1) as f64 / 4.0 * 100.0
            );
            questions.push(snapshot.current.unwrap().question);
            session.mark(true).unwrap();
        }
        assert_eq!(questions, vec!["Q1", "Q2", "Q3", "Q4"]);
    }

    #[test]
    fn test_shuffle_keeps_every_card() {
        let mut cards = deck(20);
        let mut rng = StdRng::seed_from_u64(7);
        shuffle_deck(&mut cards, &mut rng);

        let mut questions: Vec<_> = cards.iter().map(|entry| entry.card.question.clone()).collect();
        questions.sort();
        let mut expected: Vec<_> = (1..=20).map(|n| format!("Q{}", n)).collect();
        expected.sort();
        assert_eq!(questions, expected);

        let mut session = StudySession::new();
        let snapshot = session.start(deck(5), CardOrder::Shuffled).unwrap();
        assert_eq!(snapshot.order, CardOrder::Shuffled);
        assert_eq!(snapshot.total, 5);
    }
}
