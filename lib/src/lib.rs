//! Quiz session, grading and history logic for the chuju-quiz client.

pub mod data;
pub mod grading;
pub mod history;
pub mod quiz_list;
pub mod raw_data;
pub mod session;
pub mod sound;

pub use data::{
    Accuracy, AnswerRecord, Category, HistoryFilter, Quiz, QuizConfig, QuizDraft, QuizKind,
    QuizStat, Unit, UserProfile, UserStats,
};
pub use quiz_list::{
    build_quiz_list, limit_quizzes_by_count, QuizListEntry, QuizListFilter, SortDirection,
    SortKey, UnitRequest, UnitSelector,
};
pub use raw_data::RawAnswerRecord;
pub use session::{Advance, AnswerOutcome, Completion, Phase, QuizSession, SessionError};
