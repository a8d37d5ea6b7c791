use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::AnswerRecord;

/// A history entry exactly as the backend returned it.
///
/// The backend has served both camelCase and snake_case field names over
/// time, and `null` or otherwise malformed entries do show up in the history
/// array. Accessors check both spellings so nothing downstream has to.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct RawAnswerRecord(pub Value);

impl RawAnswerRecord {
    fn fields(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    fn field(&self, camel: &str, snake: &str) -> Option<&Value> {
        let fields = self.fields()?;

        fields
            .get(camel)
            .filter(|value| !value.is_null())
            .or_else(|| fields.get(snake).filter(|value| !value.is_null()))
    }

    pub fn id(&self) -> Option<String> {
        self.fields()?.get("id").and_then(value_to_id)
    }

    pub fn quiz_id(&self) -> Option<String> {
        self.field("quizId", "quiz_id").and_then(value_to_id)
    }

    /// Anything other than a literal `true` counts as incorrect.
    pub fn is_correct(&self) -> bool {
        matches!(self.field("isCorrect", "is_correct"), Some(Value::Bool(true)))
    }

    pub fn user_answer(&self) -> String {
        match self.field("userAnswer", "user_answer") {
            Some(Value::String(answer)) => answer.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn answered_at(&self) -> Option<DateTime<Utc>> {
        let value = self
            .field("answeredAt", "answered_at")
            .or_else(|| self.field("createdAt", "created_at"))?;

        DateTime::parse_from_rfc3339(value.as_str()?)
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Utc))
    }

    pub fn to_record(&self) -> Option<AnswerRecord> {
        Some(AnswerRecord {
            id: self.id(),
            quiz_id: self.quiz_id()?,
            user_answer: self.user_answer(),
            is_correct: self.is_correct(),
            answered_at: self.answered_at(),
        })
    }
}

impl From<Value> for RawAnswerRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
