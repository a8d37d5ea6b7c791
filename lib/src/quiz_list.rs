use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use unicode_normalization::UnicodeNormalization;

use crate::data::{
    parse_all, parse_difficulty, parse_history_filter, Accuracy, HistoryFilter, Quiz, QuizStat,
    SelectionError, Unit,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuizListFilter {
    pub subject: Option<String>,
    pub unit: Option<String>,
    pub difficulty: Option<u8>,
    pub history: Option<HistoryFilter>,
}

impl QuizListFilter {
    pub fn from_selection(
        subject: &str,
        unit: &str,
        difficulty: &str,
        history: &str,
    ) -> Result<Self, SelectionError> {
        Ok(Self {
            subject: parse_all(subject),
            unit: parse_all(unit),
            difficulty: parse_difficulty(difficulty)?,
            history: parse_history_filter(history)?,
        })
    }

    pub fn matches(&self, quiz: &Quiz, stat: &QuizStat) -> bool {
        if let Some(subject) = &self.subject {
            if quiz.subject.as_ref() != Some(subject) {
                return false;
            }
        }

        if let Some(unit) = &self.unit {
            if quiz.unit.as_ref() != Some(unit) {
                return false;
            }
        }

        if let Some(difficulty) = self.difficulty {
            if quiz.difficulty != Some(difficulty) {
                return false;
            }
        }

        self.history.map_or(true, |history| history.matches(stat))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Keep the order the quizzes were fetched in.
    #[default]
    None,
    Question,
    Subject,
    Unit,
    Difficulty,
    Answers,
    Accuracy,
    Order,
}

impl FromStr for SortKey {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Self::None),
            "question" => Ok(Self::Question),
            "subject" => Ok(Self::Subject),
            "unit" => Ok(Self::Unit),
            "difficulty" => Ok(Self::Difficulty),
            "answers" => Ok(Self::Answers),
            "accuracy" => Ok(Self::Accuracy),
            "order" => Ok(Self::Order),
            other => Err(SelectionError::SortKey(other.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuizListEntry {
    pub quiz: Quiz,
    pub stat: QuizStat,
    pub accuracy: Accuracy,
}

/// The sort is stable, so quizzes with equal keys keep their fetch order in
/// either direction.
pub fn build_quiz_list(
    quizzes: &[Quiz],
    stats: &HashMap<String, QuizStat>,
    filter: &QuizListFilter,
    sort_key: SortKey,
    direction: SortDirection,
) -> Vec<QuizListEntry> {
    let mut entries = quizzes
        .iter()
        .filter_map(|quiz| {
            let stat = stats.get(&quiz.id).copied().unwrap_or_default();

            filter.matches(quiz, &stat).then(|| QuizListEntry {
                quiz: quiz.clone(),
                stat,
                accuracy: stat.accuracy(),
            })
        })
        .collect::<Vec<_>>();

    if sort_key != SortKey::None {
        entries.sort_by(|a, b| {
            let ordering = compare(sort_key, a, b);

            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }

    entries
}

fn compare(sort_key: SortKey, a: &QuizListEntry, b: &QuizListEntry) -> Ordering {
    match sort_key {
        SortKey::None => Ordering::Equal,
        SortKey::Question => text_key(&a.quiz.question).cmp(&text_key(&b.quiz.question)),
        SortKey::Subject => compare_labels(a.quiz.subject.as_deref(), b.quiz.subject.as_deref()),
        SortKey::Unit => compare_labels(a.quiz.unit.as_deref(), b.quiz.unit.as_deref()),
        // None < Some, so a missing difficulty sorts lowest.
        SortKey::Difficulty => a.quiz.difficulty.cmp(&b.quiz.difficulty),
        SortKey::Answers => a.stat.answers.cmp(&b.stat.answers),
        SortKey::Accuracy => a.accuracy.sort_value().cmp(&b.accuracy.sort_value()),
        SortKey::Order => order_key(&a.quiz).cmp(&order_key(&b.quiz)),
    }
}

fn compare_labels(a: Option<&str>, b: Option<&str>) -> Ordering {
    text_key(a.unwrap_or_default()).cmp(&text_key(b.unwrap_or_default()))
}

fn text_key(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

fn order_key(quiz: &Quiz) -> i64 {
    quiz.order.unwrap_or(i64::MAX)
}

pub fn limit_quizzes_by_count(mut quizzes: Vec<Quiz>, count: Option<usize>) -> Vec<Quiz> {
    if let Some(count) = count {
        quizzes.truncate(count);
    }

    quizzes
}

/// Ticket for one unit-list fetch. Only the latest ticket may apply its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitRequest {
    pub token: u64,
    pub subject: String,
}

#[derive(Clone, Debug, Default)]
pub struct UnitSelector {
    subject: Option<String>,
    unit: Option<String>,
    units: Vec<Unit>,
    latest: u64,
}

impl UnitSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Changes the subject and resets the unit to "all".
    ///
    /// Returns the fetch to issue for a specific subject. Selecting "all"
    /// clears the options and invalidates any fetch still in flight.
    pub fn select_subject(&mut self, subject: Option<String>) -> Option<UnitRequest> {
        self.latest += 1;
        self.subject = subject;
        self.unit = None;
        self.units.clear();

        self.subject.clone().map(|subject| UnitRequest {
            token: self.latest,
            subject,
        })
    }

    /// Applies a fetched unit list. Returns false for a stale response.
    pub fn apply_units(&mut self, request: &UnitRequest, units: Vec<Unit>) -> bool {
        if request.token != self.latest || self.subject.as_deref() != Some(&request.subject) {
            tracing::debug!(
                subject = %request.subject,
                token = request.token,
                "dropping stale unit list"
            );
            return false;
        }

        self.units = units;
        true
    }

    /// Selects a unit. Unknown units fall back to "all".
    pub fn select_unit(&mut self, unit: Option<String>) -> bool {
        match unit {
            Some(unit) if self.units.iter().any(|u| u.name == unit) => {
                self.unit = Some(unit);
                true
            }
            Some(_) => {
                self.unit = None;
                false
            }
            None => {
                self.unit = None;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::data::QuizKind;

    fn quiz(id: &str, subject: &str, difficulty: Option<u8>, order: Option<i64>) -> Quiz {
        Quiz {
            id: id.to_owned(),
            question: format!("{id}?"),
            answer: "a".to_owned(),
            explanation: String::new(),
            kind: QuizKind::Text,
            choices: None,
            difficulty,
            subject: Some(subject.to_owned()),
            unit: None,
            order,
        }
    }

    fn unit(subject: &str, name: &str) -> Unit {
        Unit {
            id: Value::Null,
            subject: subject.to_owned(),
            name: name.to_owned(),
        }
    }

    fn ids(entries: &[QuizListEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.quiz.id.as_str()).collect()
    }

    #[test]
    fn filters_by_subject_keeping_order() {
        let quizzes = vec![
            quiz("q1", "社会", None, None),
            quiz("q2", "理科", None, None),
            quiz("q3", "社会", None, None),
        ];
        let filter = QuizListFilter::from_selection("社会", "all", "all", "all").unwrap();

        let list = build_quiz_list(
            &quizzes,
            &HashMap::new(),
            &filter,
            SortKey::None,
            SortDirection::Ascending,
        );

        assert_eq!(ids(&list), vec!["q1", "q3"]);
    }

    #[test]
    fn history_filters() {
        let quizzes = vec![
            quiz("q1", "社会", None, None),
            quiz("q2", "社会", None, None),
            quiz("q3", "社会", None, None),
        ];
        let stats = HashMap::from([
            (
                "q1".to_owned(),
                QuizStat {
                    answers: 2,
                    correct: 1,
                },
            ),
            (
                "q2".to_owned(),
                QuizStat {
                    answers: 1,
                    correct: 0,
                },
            ),
        ]);

        let unanswered = QuizListFilter {
            history: Some(HistoryFilter::Unanswered),
            ..Default::default()
        };
        let uncorrected = QuizListFilter {
            history: Some(HistoryFilter::Uncorrected),
            ..Default::default()
        };

        let list = build_quiz_list(
            &quizzes,
            &stats,
            &unanswered,
            SortKey::None,
            SortDirection::Ascending,
        );
        assert_eq!(ids(&list), vec!["q3"]);

        let list = build_quiz_list(
            &quizzes,
            &stats,
            &uncorrected,
            SortKey::None,
            SortDirection::Ascending,
        );
        assert_eq!(ids(&list), vec!["q2", "q3"]);
    }

    #[test]
    fn sorts_by_accuracy_descending() {
        let quizzes = vec![
            quiz("q1", "社会", None, None),
            quiz("q2", "社会", None, None),
            quiz("q3", "社会", None, None),
        ];
        let stats = HashMap::from([
            (
                "q1".to_owned(),
                QuizStat {
                    answers: 2,
                    correct: 1,
                },
            ),
            (
                "q2".to_owned(),
                QuizStat {
                    answers: 1,
                    correct: 1,
                },
            ),
            (
                "q3".to_owned(),
                QuizStat {
                    answers: 3,
                    correct: 0,
                },
            ),
        ]);

        let list = build_quiz_list(
            &quizzes,
            &stats,
            &QuizListFilter::default(),
            SortKey::Accuracy,
            SortDirection::Descending,
        );

        assert_eq!(ids(&list), vec!["q2", "q1", "q3"]);
        assert_eq!(list[0].accuracy, Accuracy::Percent(100));
    }

    #[test]
    fn missing_difficulty_is_lowest_and_missing_order_is_last() {
        let quizzes = vec![
            quiz("q1", "社会", Some(4), Some(2)),
            quiz("q2", "社会", None, None),
            quiz("q3", "社会", Some(2), Some(1)),
        ];
        let all = QuizListFilter::default();

        let list = build_quiz_list(
            &quizzes,
            &HashMap::new(),
            &all,
            SortKey::Difficulty,
            SortDirection::Ascending,
        );
        assert_eq!(ids(&list), vec!["q2", "q3", "q1"]);

        let list = build_quiz_list(
            &quizzes,
            &HashMap::new(),
            &all,
            SortKey::Order,
            SortDirection::Ascending,
        );
        assert_eq!(ids(&list), vec!["q3", "q1", "q2"]);
    }

    #[test]
    fn none_key_ignores_direction_and_ties_stay_stable() {
        let quizzes = vec![
            quiz("q1", "理科", None, None),
            quiz("q2", "社会", None, None),
            quiz("q3", "理科", None, None),
        ];
        let all = QuizListFilter::default();

        let list = build_quiz_list(
            &quizzes,
            &HashMap::new(),
            &all,
            SortKey::None,
            SortDirection::Descending,
        );
        assert_eq!(ids(&list), vec!["q1", "q2", "q3"]);

        let list = build_quiz_list(
            &quizzes,
            &HashMap::new(),
            &all,
            SortKey::Answers,
            SortDirection::Descending,
        );
        assert_eq!(ids(&list), vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn limits_by_count() {
        let quizzes = (1..=8)
            .map(|i| quiz(&format!("q{i}"), "社会", None, None))
            .collect::<Vec<_>>();

        let limited = limit_quizzes_by_count(quizzes.clone(), Some(5));
        assert_eq!(
            limited.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(),
            vec!["q1", "q2", "q3", "q4", "q5"]
        );

        assert_eq!(limit_quizzes_by_count(quizzes.clone(), None), quizzes);
        assert_eq!(limit_quizzes_by_count(quizzes.clone(), Some(20)), quizzes);
    }

    #[test]
    fn unit_selector_drops_stale_responses() {
        let mut selector = UnitSelector::new();

        let social = selector.select_subject(Some("社会".to_owned())).unwrap();
        let science = selector.select_subject(Some("理科".to_owned())).unwrap();

        assert!(!selector.apply_units(&social, vec![unit("社会", "歴史")]));
        assert!(selector.units().is_empty());

        assert!(selector.apply_units(&science, vec![unit("理科", "生物")]));
        assert!(selector.select_unit(Some("生物".to_owned())));
        assert_eq!(selector.unit(), Some("生物"));

        assert!(!selector.select_unit(Some("地理".to_owned())));
        assert_eq!(selector.unit(), None);
    }

    #[test]
    fn selecting_all_subjects_clears_units() {
        let mut selector = UnitSelector::new();

        let request = selector.select_subject(Some("社会".to_owned())).unwrap();
        selector.apply_units(&request, vec![unit("社会", "歴史")]);
        selector.select_unit(Some("歴史".to_owned()));

        assert_eq!(selector.select_subject(None), None);
        assert!(selector.units().is_empty());
        assert_eq!(selector.unit(), None);
        assert!(!selector.apply_units(&request, vec![unit("社会", "歴史")]));
    }
}
