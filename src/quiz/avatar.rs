use std::fmt;
use std::str::FromStr;

use crate::quiz::Difficulty;

/// Mood of the quiz companion, derived from quiz events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Neutral,
    Happy,
    Thinking,
    Excited,
    Sad,
}

impl Mood {
    pub fn expression(&self) -> &'static str {
        match self {
            Mood::Neutral => "👨‍🏫",
            Mood::Happy => "😊",
            Mood::Thinking => "🤔",
            Mood::Excited => "🎉",
            Mood::Sad => "😢",
        }
    }

    /// Unknown names fall back to [`Mood::Neutral`].
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl FromStr for Mood {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neutral" => Ok(Mood::Neutral),
            "happy" => Ok(Mood::Happy),
            "thinking" => Ok(Mood::Thinking),
            "excited" => Ok(Mood::Excited),
            "sad" => Ok(Mood::Sad),
            _ => Err(()),
        }
    }
}

/// What the companion currently shows: a mood and a line of speech.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Avatar {
    pub mood: Mood,
    pub message: String,
}

impl Avatar {
    pub fn new(mood: Mood, message: impl Into<String>) -> Self {
        Self {
            mood,
            message: message.into(),
        }
    }

    pub fn welcome() -> Self {
        Self::new(Mood::Neutral, WELCOME)
    }
}

impl fmt::Display for Avatar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mood.expression(), self.message)
    }
}

pub const WELCOME: &str = "Welcome to Historical Quest! Ready to test your knowledge?";
pub const FETCHING: &str = "Fetching your next question...";
pub const CONNECTION_TROUBLE: &str = "Having trouble connecting to the server. The question will load automatically when connection is restored.";
pub const GAVE_UP: &str = "I couldn't reach the question archive. Start a new quiz when you're ready to try again.";
pub const SUBMIT_TROUBLE: &str = "Your answer got lost on the way. Please pick again!";
pub const COMPLETED: &str = "Congratulations! You've completed the quiz!";
pub const WELL_DONE: &str = "Well done! Keep it up!";
pub const KEEP_GOING: &str = "Don't worry, learning from mistakes is part of the journey!";

pub fn question_teaser(teaser: &str) -> String {
    format!("Here's a question about {}...", teaser)
}

pub fn difficulty_changed(difficulty: Difficulty) -> String {
    format!("Impressive! Let's try some {} questions!", difficulty)
}

/// `answered / target` as a whole percentage in `0..=100`.
pub fn progress_percent(answered: u32, target: u32) -> u8 {
    if target == 0 {
        return 0;
    }
    let percent = (f64::from(answered) / f64::from(target) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}
