use serde::Serialize;
use thiserror::Error;

use crate::data::{Accuracy, Quiz, QuizConfig};
use crate::grading::{choice_letter, grade};
use crate::quiz_list::limit_quizzes_by_count;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Configuring,
    InProgress { revealed: bool },
    Completed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("no quizzes match this configuration")]
    NoQuizzes,
    #[error("the session is not in progress")]
    NotInProgress,
    #[error("an answer is required before revealing")]
    EmptyAnswer,
    #[error("the answer has already been revealed")]
    AlreadyRevealed,
    #[error("the answer has not been revealed yet")]
    NotRevealed,
    #[error("choice {0} does not exist")]
    UnknownChoice(usize),
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub quiz_id: String,
    pub user_answer: String,
    pub is_correct: bool,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub correct_count: u32,
    pub total_questions: u32,
}

impl Completion {
    pub fn accuracy(&self) -> Accuracy {
        Accuracy::from_counts(self.correct_count, self.total_questions)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    Next(usize),
    Completed(Completion),
}

/// Only in-memory; persistence of outcomes is up to the caller and never
/// feeds back into the local score.
#[derive(Clone, Debug)]
pub struct QuizSession {
    phase: Phase,
    config: Option<QuizConfig>,
    quizzes: Vec<Quiz>,
    current_index: usize,
    answer: String,
    last_result: Option<bool>,
    correct_count: u32,
}

impl Default for QuizSession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Configuring,
            config: None,
            quizzes: Vec::new(),
            current_index: 0,
            answer: String::new(),
            last_result: None,
            correct_count: 0,
        }
    }

    pub fn start(&mut self, config: QuizConfig, quizzes: Vec<Quiz>) -> Result<(), SessionError> {
        let quizzes = limit_quizzes_by_count(quizzes, Some(config.count));

        if quizzes.is_empty() {
            return Err(SessionError::NoQuizzes);
        }

        tracing::debug!(count = quizzes.len(), "starting quiz session");

        self.restart();
        self.config = Some(config);
        self.quizzes = quizzes;
        self.phase = Phase::InProgress { revealed: false };

        Ok(())
    }

    pub fn restart(&mut self) {
        *self = Self::new();
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> Option<&QuizConfig> {
        self.config.as_ref()
    }

    pub fn quizzes(&self) -> &[Quiz] {
        &self.quizzes
    }

    pub fn total(&self) -> usize {
        self.quizzes.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_quiz(&self) -> Option<&Quiz> {
        match self.phase {
            Phase::InProgress { .. } => self.quizzes.get(self.current_index),
            _ => None,
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// `None` until the current answer has been revealed.
    pub fn last_result(&self) -> Option<bool> {
        self.last_result
    }

    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    pub fn accuracy(&self) -> Accuracy {
        Accuracy::from_counts(self.correct_count, self.total() as u32)
    }

    pub fn set_answer(&mut self, answer: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_answering()?;
        self.answer = answer.into();

        Ok(())
    }

    /// Selects the `index`th choice of the current quiz; its leading letter is the answer.
    pub fn select_choice(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_answering()?;

        let letter = self
            .current_quiz()
            .and_then(|quiz| quiz.choices().get(index))
            .and_then(|choice| choice_letter(choice))
            .ok_or(SessionError::UnknownChoice(index))?;

        self.answer = letter;
        Ok(())
    }

    pub fn can_reveal(&self) -> bool {
        self.phase == (Phase::InProgress { revealed: false }) && !self.answer.trim().is_empty()
    }

    pub fn reveal(&mut self) -> Result<AnswerOutcome, SessionError> {
        self.ensure_answering()?;

        if self.answer.trim().is_empty() {
            return Err(SessionError::EmptyAnswer);
        }

        let quiz = self
            .quizzes
            .get(self.current_index)
            .ok_or(SessionError::NotInProgress)?;
        let is_correct = grade(&self.answer, &quiz.answer);

        if is_correct {
            self.correct_count += 1;
        }

        let outcome = AnswerOutcome {
            quiz_id: quiz.id.clone(),
            user_answer: self.answer.clone(),
            is_correct,
        };

        self.last_result = Some(is_correct);
        self.phase = Phase::InProgress { revealed: true };

        Ok(outcome)
    }

    pub fn next(&mut self) -> Result<Advance, SessionError> {
        match self.phase {
            Phase::InProgress { revealed: true } => {}
            Phase::InProgress { revealed: false } => return Err(SessionError::NotRevealed),
            _ => return Err(SessionError::NotInProgress),
        }

        self.answer.clear();
        self.last_result = None;

        if self.current_index + 1 < self.quizzes.len() {
            self.current_index += 1;
            self.phase = Phase::InProgress { revealed: false };

            return Ok(Advance::Next(self.current_index));
        }

        self.current_index = self.quizzes.len();
        self.phase = Phase::Completed;

        Ok(Advance::Completed(Completion {
            correct_count: self.correct_count,
            total_questions: self.quizzes.len() as u32,
        }))
    }

    fn ensure_answering(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::InProgress { revealed: false } => Ok(()),
            Phase::InProgress { revealed: true } => Err(SessionError::AlreadyRevealed),
            _ => Err(SessionError::NotInProgress),
        }
    }
}
