use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sound::SoundTheme;

pub const ALL: &str = "all";
pub const MIX: &str = "mix";

pub const MIN_DIFFICULTY: u8 = 2;
pub const MAX_DIFFICULTY: u8 = 5;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QuizKind {
    #[default]
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "multiple-choice")]
    MultipleChoice,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,

    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(rename = "type", default)]
    pub kind: QuizKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(
        default,
        alias = "displayOrder",
        alias = "display_order",
        skip_serializing_if = "Option::is_none"
    )]
    pub order: Option<i64>,
}

impl Quiz {
    pub fn is_multiple_choice(&self) -> bool {
        self.kind == QuizKind::MultipleChoice
            && self.choices.as_ref().map_or(false, |c| !c.is_empty())
    }

    pub fn choices(&self) -> &[String] {
        self.choices.as_deref().unwrap_or_default()
    }
}

/// Quiz fields minus the server-assigned id, as sent to `POST /quizzes`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizDraft {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(rename = "type", default)]
    pub kind: QuizKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DraftError {
    #[error("question text is empty")]
    EmptyQuestion,
    #[error("answer text is empty")]
    EmptyAnswer,
    #[error("multiple-choice quiz has {0} choice(s), expected 2 to 4")]
    ChoiceCount(usize),
    #[error("choices do not contain the answer {0:?}")]
    AnswerNotInChoices(String),
    #[error("difficulty {0} is outside 2..=5")]
    Difficulty(u8),
}

impl QuizDraft {
    pub fn check(&self) -> Result<(), DraftError> {
        if self.question.trim().is_empty() {
            return Err(DraftError::EmptyQuestion);
        }

        if self.answer.trim().is_empty() {
            return Err(DraftError::EmptyAnswer);
        }

        if self.kind == QuizKind::MultipleChoice {
            let choices = self.choices.as_deref().unwrap_or_default();

            if choices.len() < 2 || choices.len() > 4 {
                return Err(DraftError::ChoiceCount(choices.len()));
            }

            let answer = self.answer.trim();
            let contains_answer = choices.iter().any(|choice| {
                let choice = choice.trim();
                choice == answer || crate::grading::choice_letter(choice).as_deref() == Some(answer)
            });

            if !contains_answer {
                return Err(DraftError::AnswerNotInChoices(self.answer.clone()));
            }
        }

        if let Some(difficulty) = self.difficulty {
            if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
                return Err(DraftError::Difficulty(difficulty));
            }
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AnswerRecord {
    pub id: Option<String>,

    pub quiz_id: String,
    pub user_answer: String,
    pub is_correct: bool,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuizStat {
    pub answers: u32,
    pub correct: u32,
}

impl QuizStat {
    pub fn accuracy(&self) -> Accuracy {
        Accuracy::from_counts(self.correct, self.answers)
    }
}

/// Percentage of correct answers. `NoData` is never the same thing as 0%.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Accuracy {
    NoData,
    Percent(u32),
}

impl Accuracy {
    pub fn from_counts(correct: u32, total: u32) -> Self {
        if total == 0 {
            return Self::NoData;
        }

        let percent = (f64::from(correct) / f64::from(total) * 100.0).round();
        Self::Percent(percent as u32)
    }

    /// Numeric key used when sorting; no data sorts like 0%.
    pub fn sort_value(&self) -> u32 {
        match self {
            Self::NoData => 0,
            Self::Percent(percent) => *percent,
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => f.write_str("-"),
            Self::Percent(percent) => write!(f, "{percent}%"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HistoryFilter {
    Unanswered,
    /// Quizzes never answered correctly, including never answered ones.
    Uncorrected,
}

impl HistoryFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unanswered => "unanswered",
            Self::Uncorrected => "uncorrected",
        }
    }

    pub fn matches(&self, stat: &QuizStat) -> bool {
        match self {
            Self::Unanswered => stat.answers == 0,
            Self::Uncorrected => stat.correct == 0,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("unknown history filter {0:?}")]
    HistoryFilter(String),
    #[error("invalid difficulty {0:?}")]
    Difficulty(String),
    #[error("invalid question count {0:?}")]
    Count(String),
    #[error("unknown sound effect {0:?}")]
    Sound(String),
    #[error("unknown sort key {0:?}")]
    SortKey(String),
}

impl FromStr for HistoryFilter {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unanswered" => Ok(Self::Unanswered),
            "uncorrected" => Ok(Self::Uncorrected),
            other => Err(SelectionError::HistoryFilter(other.to_owned())),
        }
    }
}

/// Collapses the `"all"` sentinel (and blank input) to `None`.
pub fn parse_all(selection: &str) -> Option<String> {
    let selection = selection.trim();

    if selection.is_empty() || selection == ALL {
        None
    } else {
        Some(selection.to_owned())
    }
}

pub fn parse_difficulty(selection: &str) -> Result<Option<u8>, SelectionError> {
    let selection = selection.trim();

    if selection.is_empty() || selection == MIX || selection == ALL {
        return Ok(None);
    }

    selection
        .parse::<u8>()
        .map(Some)
        .map_err(|_| SelectionError::Difficulty(selection.to_owned()))
}

pub fn parse_history_filter(selection: &str) -> Result<Option<HistoryFilter>, SelectionError> {
    parse_all(selection).map(|s| s.parse()).transpose()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuizConfig {
    pub subject: Option<String>,
    pub unit: Option<String>,
    pub difficulty: Option<u8>,
    pub count: usize,
    pub history_filter: Option<HistoryFilter>,
    pub sound: Option<SoundTheme>,
}

impl QuizConfig {
    pub fn from_selection(
        subject: &str,
        unit: &str,
        difficulty: &str,
        count: &str,
        history_filter: &str,
        sound: &str,
    ) -> Result<Self, SelectionError> {
        let count = count
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| SelectionError::Count(count.to_owned()))?;

        Ok(Self {
            subject: parse_all(subject),
            unit: parse_all(unit),
            difficulty: parse_difficulty(difficulty)?,
            count,
            history_filter: parse_history_filter(history_filter)?,
            sound: SoundTheme::parse_selection(sound)?,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Category {
    #[serde(default)]
    pub id: serde_json::Value,

    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    #[serde(default)]
    pub id: serde_json::Value,

    pub subject: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    #[serde(default)]
    pub total_quizzes: u32,
    #[serde(default)]
    pub total_correct: u32,
    #[serde(default)]
    pub total_answers: u32,
}

impl UserStats {
    pub fn accuracy(&self) -> Accuracy {
        Accuracy::from_counts(self.total_correct, self.total_answers)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(kind: QuizKind, choices: Option<Vec<&str>>) -> QuizDraft {
        QuizDraft {
            question: "江戸幕府を開いたのは誰？".to_owned(),
            answer: "徳川家康".to_owned(),
            explanation: String::new(),
            kind,
            choices: choices.map(|c| c.into_iter().map(str::to_owned).collect()),
            difficulty: Some(3),
            subject: Some("社会".to_owned()),
            unit: None,
            order: None,
        }
    }

    #[test]
    fn accuracy_distinguishes_no_data_from_zero() {
        assert_eq!(QuizStat::default().accuracy(), Accuracy::NoData);
        assert_eq!(
            QuizStat {
                answers: 3,
                correct: 0
            }
            .accuracy(),
            Accuracy::Percent(0)
        );
        assert_eq!(Accuracy::from_counts(2, 3), Accuracy::Percent(67));
        assert_eq!(Accuracy::NoData.to_string(), "-");
    }

    #[test]
    fn selection_sentinels_collapse() {
        let config = QuizConfig::from_selection("all", "all", "mix", "10", "all", "none").unwrap();

        assert_eq!(config.subject, None);
        assert_eq!(config.unit, None);
        assert_eq!(config.difficulty, None);
        assert_eq!(config.count, 10);
        assert_eq!(config.history_filter, None);
        assert_eq!(config.sound, None);

        let config =
            QuizConfig::from_selection("社会", "歴史", "3", "5", "uncorrected", "classic").unwrap();

        assert_eq!(config.subject.as_deref(), Some("社会"));
        assert_eq!(config.unit.as_deref(), Some("歴史"));
        assert_eq!(config.difficulty, Some(3));
        assert_eq!(config.history_filter, Some(HistoryFilter::Uncorrected));
        assert_eq!(config.sound, Some(SoundTheme::Classic));
    }

    #[test]
    fn count_must_be_positive() {
        assert_eq!(
            QuizConfig::from_selection("all", "all", "mix", "0", "all", "none"),
            Err(SelectionError::Count("0".to_owned()))
        );
        assert!(QuizConfig::from_selection("all", "all", "mix", "abc", "all", "none").is_err());
    }

    #[test]
    fn quiz_reads_wire_shape() {
        let quiz: Quiz = serde_json::from_str(
            r#"{"id":"q1","question":"Q","answer":"A","explanation":"E",
                "type":"multiple-choice","choices":["A. x","B. y"],"difficulty":4,
                "subject":"理科","unit":null,"displayOrder":7}"#,
        )
        .unwrap();

        assert_eq!(quiz.kind, QuizKind::MultipleChoice);
        assert!(quiz.is_multiple_choice());
        assert_eq!(quiz.unit, None);
        assert_eq!(quiz.order, Some(7));
    }

    #[test]
    fn draft_check() {
        assert_eq!(draft(QuizKind::Text, None).check(), Ok(()));
        assert_eq!(
            draft(QuizKind::MultipleChoice, Some(vec!["徳川家康"])).check(),
            Err(DraftError::ChoiceCount(1))
        );
        assert_eq!(
            draft(QuizKind::MultipleChoice, Some(vec!["織田信長", "豊臣秀吉"])).check(),
            Err(DraftError::AnswerNotInChoices("徳川家康".to_owned()))
        );
        assert_eq!(
            draft(QuizKind::MultipleChoice, Some(vec!["織田信長", "徳川家康"])).check(),
            Ok(())
        );

        let mut lettered = draft(
            QuizKind::MultipleChoice,
            Some(vec!["A. 織田信長", "B. 徳川家康"]),
        );
        lettered.answer = "B".to_owned();
        assert_eq!(lettered.check(), Ok(()));

        let mut hard = draft(QuizKind::Text, None);
        hard.difficulty = Some(6);
        assert_eq!(hard.check(), Err(DraftError::Difficulty(6)));
    }
}
