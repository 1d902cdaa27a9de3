pub mod avatar;
pub mod controller;
pub mod identity;
pub mod service;

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown difficulty '{0}'")]
pub struct UnknownDifficulty(pub String);

impl FromStr for Difficulty {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(UnknownDifficulty(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
}

impl Question {
    pub fn new(
        text: impl Into<String>,
        options: Vec<String>,
        correct_answer: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            options,
            correct_answer: correct_answer.into(),
            explanation: explanation.into(),
        }
    }

    /// A question is only usable when it has something to ask and something to pick.
    pub fn is_valid(&self) -> bool {
        !self.text.trim().is_empty() && !self.options.is_empty()
    }

    pub fn is_correct(&self, option: &str) -> bool {
        option == self.correct_answer
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// First few words of the question, used to tease it in the avatar message.
    pub fn teaser(&self, words: usize) -> String {
        self.text.split(' ').take(words).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub user_id: String,
    pub difficulty: Difficulty,
    pub is_correct: bool,
    pub quiz_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub score: u32,
    pub total_questions: u32,
    pub new_difficulty: Difficulty,
}

/// Number of questions a player can ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum QuestionCount {
    #[default]
    Five,
    Ten,
    Fifteen,
    Twenty,
}

impl QuestionCount {
    pub const ALL: [QuestionCount; 4] = [
        QuestionCount::Five,
        QuestionCount::Ten,
        QuestionCount::Fifteen,
        QuestionCount::Twenty,
    ];

    pub fn get(&self) -> u32 {
        match self {
            QuestionCount::Five => 5,
            QuestionCount::Ten => 10,
            QuestionCount::Fifteen => 15,
            QuestionCount::Twenty => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("question count must be one of 5, 10, 15 or 20 (got {0})")]
pub struct InvalidQuestionCount(pub u32);

impl TryFrom<u32> for QuestionCount {
    type Error = InvalidQuestionCount;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        QuestionCount::ALL
            .into_iter()
            .find(|c| c.get() == value)
            .ok_or(InvalidQuestionCount(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QuizProgress {
    pub score: u32,
    pub total_questions: u32,
    pub questions_answered: u32,
    pub target_questions: u32,
    pub difficulty: Difficulty,
    pub complete: bool,
}

impl QuizProgress {
    pub fn new(target: QuestionCount, difficulty: Difficulty) -> Self {
        Self {
            score: 0,
            total_questions: 0,
            questions_answered: 0,
            target_questions: target.get(),
            difficulty,
            complete: false,
        }
    }

    pub fn percent(&self) -> u8 {
        avatar::progress_percent(self.questions_answered, self.target_questions)
    }

    /// Records one answered question and keeps `complete` in step with the counter.
    pub(crate) fn record(&mut self, result: &AnswerResult) {
        self.score = result.score;
        self.total_questions = result.total_questions;
        self.questions_answered = (self.questions_answered + 1).min(self.target_questions);
        self.complete = self.questions_answered == self.target_questions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_uses_lowercase_names_on_the_wire() {
        let json = serde_json::to_string(&Difficulty::Hard).unwrap();
        assert_eq!(json, "\"hard\"");
        let parsed: Difficulty = serde_json::from_str("\"easy\"").unwrap();
        assert_eq!(parsed, Difficulty::Easy);
    }

    #[test]
    fn unknown_difficulty_is_rejected() {
        assert!(serde_json::from_str::<Difficulty>("\"legendary\"").is_err());
        assert_eq!(
            "Legendary".parse::<Difficulty>(),
            Err(UnknownDifficulty("Legendary".to_string()))
        );
        assert_eq!(" Medium ".parse::<Difficulty>(), Ok(Difficulty::Medium));
    }

    #[test]
    fn question_validation_needs_text_and_options() {
        let ok = Question::new("Who?", vec!["A".into()], "A", "");
        assert!(ok.is_valid());
        assert!(!Question::new("  ", vec!["A".into()], "A", "").is_valid());
        assert!(!Question::new("Who?", vec![], "A", "").is_valid());
    }

    #[test]
    fn question_reads_camel_case_payload() {
        let q: Question = serde_json::from_str(
            r#"{"text":"Who crossed the Rubicon?","options":["Caesar","Nero"],"correctAnswer":"Caesar","explanation":"49 BC"}"#,
        )
        .unwrap();
        assert_eq!(q.correct_answer, "Caesar");
        assert!(q.is_correct("Caesar"));
        assert!(!q.is_correct("Nero"));
        assert_eq!(q.teaser(3), "Who crossed the");
    }

    #[test]
    fn question_count_accepts_only_the_offered_sizes() {
        assert_eq!(QuestionCount::try_from(15), Ok(QuestionCount::Fifteen));
        assert_eq!(QuestionCount::try_from(7), Err(InvalidQuestionCount(7)));
        assert_eq!(QuestionCount::default().get(), 5);
    }

    #[test]
    fn progress_completes_exactly_at_target() {
        let mut progress = QuizProgress::new(QuestionCount::Five, Difficulty::Medium);
        let result = AnswerResult {
            score: 1,
            total_questions: 1,
            new_difficulty: Difficulty::Medium,
        };
        for _ in 0..4 {
            progress.record(&result);
            assert!(!progress.complete);
        }
        progress.record(&result);
        assert!(progress.complete);
        assert_eq!(progress.questions_answered, 5);

        progress.record(&result);
        assert_eq!(progress.questions_answered, 5);
        assert_eq!(progress.percent(), 100);
    }
}
