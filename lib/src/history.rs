use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::data::{AnswerRecord, QuizStat};
use crate::raw_data::RawAnswerRecord;

/// Entries without a resolvable quiz id are skipped. A quiz that was never
/// answered gets no entry at all.
pub fn aggregate(history: &[RawAnswerRecord]) -> HashMap<String, QuizStat> {
    let mut stats: HashMap<String, QuizStat> = HashMap::new();

    for raw in history {
        let quiz_id = match raw.quiz_id() {
            Some(quiz_id) => quiz_id,
            None => {
                tracing::trace!(entry = %raw.0, "skipping history entry without quiz id");
                continue;
            }
        };

        let stat = stats.entry(quiz_id).or_default();
        stat.answers += 1;

        if raw.is_correct() {
            stat.correct += 1;
        }
    }

    stats
}

pub fn normalize(history: &[RawAnswerRecord]) -> Vec<AnswerRecord> {
    history.iter().filter_map(RawAnswerRecord::to_record).collect()
}

/// Per-question answer history, newest attempt first.
pub fn group_by_quiz(records: Vec<AnswerRecord>) -> BTreeMap<String, Vec<AnswerRecord>> {
    let mut grouped: BTreeMap<String, Vec<AnswerRecord>> = BTreeMap::new();

    for record in records {
        grouped
            .entry(record.quiz_id.clone())
            .or_default()
            .push(record);
    }

    for attempts in grouped.values_mut() {
        attempts.sort_by(newest_first);
    }

    grouped
}

pub fn answers_for_quiz(records: &[AnswerRecord], quiz_id: &str) -> Vec<AnswerRecord> {
    let mut attempts = records
        .iter()
        .filter(|record| record.quiz_id == quiz_id)
        .cloned()
        .collect::<Vec<_>>();

    attempts.sort_by(newest_first);
    attempts
}

fn newest_first(a: &AnswerRecord, b: &AnswerRecord) -> Ordering {
    match (a.answered_at, b.answered_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
