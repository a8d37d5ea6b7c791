//! Free-text answer grading.
//!
//! Answers are compared after normalization, and a non-empty substring match
//! in either direction counts as correct. A canonical answer of `"1"` therefore
//! accepts any answer containing `1`; that leniency is intentional.

const PARENTHESES: [char; 4] = ['(', ')', '（', '）'];

pub fn normalize(answer: &str) -> String {
    answer
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !PARENTHESES.contains(c))
        .collect()
}

pub fn grade(user_answer: &str, canonical_answer: &str) -> bool {
    let user = normalize(user_answer);
    let canonical = normalize(canonical_answer);

    if user.is_empty() || canonical.is_empty() {
        return false;
    }

    user == canonical || canonical.contains(&user) || user.contains(&canonical)
}

/// The letter a multiple-choice selection submits, e.g. `"A"` for `"A. 徳川家康"`.
pub fn choice_letter(choice: &str) -> Option<String> {
    choice.trim().chars().next().map(String::from)
}
