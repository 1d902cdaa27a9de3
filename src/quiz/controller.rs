//! Quiz session state machine.
//!
//! ```text
//! Idle -> Loading -> AwaitingAnswer -> Submitting -> Loading ...
//!                                                 \-> Complete
//! ```
//!
//! Every session gets a fresh id and cancellation token. Work spawned for a
//! session (question fetches, the outer retry timer, the auto-advance timer)
//! carries both, is dropped as soon as the token fires, and re-checks the id
//! before touching state so late responses from an abandoned session are
//! discarded.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::quiz::avatar::{self, Avatar, Mood};
use crate::quiz::service::{AnswerSubmitError, QuestionFetchError, QuizApi};
use crate::quiz::{Difficulty, Question, QuestionCount, QuizProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum QuizState {
    Idle,
    Loading,
    AwaitingAnswer,
    Submitting,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub initial_difficulty: Difficulty,
    /// Pause before a failed question fetch is started over.
    pub outer_retry_delay: Duration,
    /// Pause between a scored answer and the next question.
    pub advance_delay: Duration,
    /// Outer retries allowed per question; `None` keeps trying.
    pub outer_retry_limit: Option<u32>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            initial_difficulty: Difficulty::Medium,
            outer_retry_delay: Duration::from_secs(3),
            advance_delay: Duration::from_secs(2),
            outer_retry_limit: None,
        }
    }
}

/// Everything a front end needs to draw the quiz.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QuizSnapshot {
    pub session: u64,
    pub state: QuizState,
    pub progress: QuizProgress,
    pub avatar: Avatar,
    pub question: Option<Question>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub correct: bool,
    pub correct_answer: String,
    pub explanation: String,
    pub progress: QuizProgress,
    /// The companion's reaction to this answer.
    pub avatar: Avatar,
}

#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error("no question is waiting for an answer")]
    NotAwaitingAnswer,
    #[error("'{0}' is not one of the offered options")]
    UnknownOption(String),
    #[error("the quiz was restarted while the answer was in flight")]
    Superseded,
    #[error(transparent)]
    Submit(#[from] AnswerSubmitError),
}

struct Inner {
    session: u64,
    cancel: CancellationToken,
    state: QuizState,
    progress: QuizProgress,
    avatar: Avatar,
    question: Option<Question>,
    selected_count: QuestionCount,
}

impl Inner {
    fn snapshot(&self) -> QuizSnapshot {
        QuizSnapshot {
            session: self.session,
            state: self.state,
            progress: self.progress.clone(),
            avatar: self.avatar.clone(),
            question: self.question.clone(),
        }
    }
}

struct Shared<S> {
    api: Arc<S>,
    settings: ControllerSettings,
    inner: Mutex<Inner>,
    updates: watch::Sender<QuizSnapshot>,
}

/// Cheaply cloneable handle to one quiz session owner.
pub struct QuizController<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for QuizController<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: QuizApi> QuizController<S> {
    pub fn new(api: Arc<S>, settings: ControllerSettings) -> Self {
        let inner = Inner {
            session: 0,
            cancel: CancellationToken::new(),
            state: QuizState::Idle,
            progress: QuizProgress::new(QuestionCount::default(), settings.initial_difficulty),
            avatar: Avatar::welcome(),
            question: None,
            selected_count: QuestionCount::default(),
        };
        let (updates, _) = watch::channel(inner.snapshot());
        Self {
            shared: Arc::new(Shared {
                api,
                settings,
                inner: Mutex::new(inner),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QuizSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn snapshot(&self) -> QuizSnapshot {
        self.lock().snapshot()
    }

    pub fn state(&self) -> QuizState {
        self.lock().state
    }

    pub fn progress(&self) -> QuizProgress {
        self.lock().progress.clone()
    }

    pub fn selected_question_count(&self) -> QuestionCount {
        self.lock().selected_count
    }

    /// Remembers the preferred quiz length. A running quiz keeps its target;
    /// the choice applies from the next [`start_quiz`](Self::start_quiz).
    pub fn select_question_count(&self, count: QuestionCount) {
        self.lock().selected_count = count;
    }

    /// Abandons whatever is in progress and starts a fresh session.
    pub fn start_quiz(&self, count: QuestionCount) {
        let (session, cancel) = {
            let mut inner = self.lock();
            inner.cancel.cancel();
            inner.session += 1;
            inner.cancel = CancellationToken::new();
            inner.selected_count = count;
            inner.progress = QuizProgress::new(count, inner.progress.difficulty);
            inner.question = None;
            inner.state = QuizState::Loading;
            inner.avatar = Avatar::new(Mood::Thinking, avatar::FETCHING);
            self.publish(&inner);
            (inner.session, inner.cancel.clone())
        };
        log::info!(
            "Starting quiz session {} with {} questions",
            session,
            count.get()
        );
        self.spawn_fetch(session, cancel, None);
    }

    /// Cancels pending timers and in-flight requests without touching progress.
    pub fn shutdown(&self) {
        let inner = self.lock();
        inner.cancel.cancel();
        log::debug!("Quiz session {} shut down", inner.session);
    }

    /// Submits one of the displayed options for the current question.
    ///
    /// Only the first call per question gets through; while that answer is
    /// being scored further calls fail with [`AnswerError::NotAwaitingAnswer`].
    /// If the service rejects the submission the question is offered again.
    pub async fn answer(&self, option: &str) -> Result<AnswerFeedback, AnswerError> {
        let (session, cancel, difficulty, question, quiz_complete) = {
            let mut inner = self.lock();
            if inner.state != QuizState::AwaitingAnswer {
                return Err(AnswerError::NotAwaitingAnswer);
            }
            let question = inner.question.clone().ok_or(AnswerError::NotAwaitingAnswer)?;
            if !question.has_option(option) {
                return Err(AnswerError::UnknownOption(option.to_string()));
            }
            inner.state = QuizState::Submitting;
            self.publish(&inner);
            let quiz_complete =
                inner.progress.questions_answered + 1 >= inner.progress.target_questions;
            (
                inner.session,
                inner.cancel.clone(),
                inner.progress.difficulty,
                question,
                quiz_complete,
            )
        };

        let correct = question.is_correct(option);
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(AnswerError::Superseded),
            result = self.shared.api.submit_answer(difficulty, correct, quiz_complete) => result,
        };

        let feedback = {
            let mut inner = self.lock();
            if inner.session != session {
                log::debug!("Discarding answer result for stale session {}", session);
                return Err(AnswerError::Superseded);
            }
            let result = match result {
                Ok(result) => result,
                Err(err) => {
                    inner.state = QuizState::AwaitingAnswer;
                    inner.avatar = Avatar::new(Mood::Sad, avatar::SUBMIT_TROUBLE);
                    self.publish(&inner);
                    return Err(err.into());
                }
            };

            let previous = inner.progress.difficulty;
            inner.progress.record(&result);
            inner.progress.difficulty = result.new_difficulty;

            if inner.progress.complete {
                inner.state = QuizState::Complete;
                inner.avatar = Avatar::new(Mood::Happy, avatar::COMPLETED);
                log::info!(
                    "Quiz session {} complete: {}/{}",
                    session,
                    inner.progress.score,
                    inner.progress.questions_answered
                );
            } else if result.new_difficulty != previous {
                log::info!("Difficulty changed from {} to {}", previous, result.new_difficulty);
                inner.avatar = Avatar::new(
                    Mood::Excited,
                    avatar::difficulty_changed(result.new_difficulty),
                );
            } else if correct {
                inner.avatar = Avatar::new(Mood::Happy, avatar::WELL_DONE);
            } else {
                inner.avatar = Avatar::new(Mood::Neutral, avatar::KEEP_GOING);
            }
            self.publish(&inner);

            AnswerFeedback {
                correct,
                correct_answer: question.correct_answer.clone(),
                explanation: question.explanation.clone(),
                progress: inner.progress.clone(),
                avatar: inner.avatar.clone(),
            }
        };

        if !feedback.progress.complete {
            self.spawn_fetch(session, cancel, Some(self.shared.settings.advance_delay));
        }
        Ok(feedback)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|poisoned| {
            log::error!("Quiz state mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn publish(&self, inner: &Inner) {
        self.shared.updates.send_replace(inner.snapshot());
    }

    fn spawn_fetch(&self, session: u64, cancel: CancellationToken, delay: Option<Duration>) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Pending work for session {} cancelled", session);
                }
                _ = this.fetch_loop(session, delay) => {}
            }
        });
    }

    async fn fetch_loop(&self, session: u64, delay: Option<Duration>) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            if !self.begin_loading(session) {
                return;
            }
        }

        let mut failures = 0;
        loop {
            let difficulty = match self.difficulty_for(session) {
                Some(difficulty) => difficulty,
                None => return,
            };
            match self.shared.api.get_question(difficulty).await {
                Ok(question) => {
                    self.apply_question(session, question);
                    return;
                }
                Err(err) => {
                    failures += 1;
                    if !self.apply_fetch_failure(session, &err, failures) {
                        return;
                    }
                    tokio::time::sleep(self.shared.settings.outer_retry_delay).await;
                }
            }
        }
    }

    fn difficulty_for(&self, session: u64) -> Option<Difficulty> {
        let inner = self.lock();
        (inner.session == session && inner.state == QuizState::Loading)
            .then_some(inner.progress.difficulty)
    }

    fn begin_loading(&self, session: u64) -> bool {
        let mut inner = self.lock();
        if inner.session != session || inner.state != QuizState::Submitting {
            return false;
        }
        inner.state = QuizState::Loading;
        inner.avatar = Avatar::new(Mood::Thinking, avatar::FETCHING);
        self.publish(&inner);
        true
    }

    fn apply_question(&self, session: u64, question: Question) {
        let mut inner = self.lock();
        if inner.session != session || inner.state != QuizState::Loading {
            log::debug!("Discarding question for stale session {}", session);
            return;
        }
        inner.avatar = Avatar::new(Mood::Neutral, avatar::question_teaser(&question.teaser(3)));
        inner.question = Some(question);
        inner.state = QuizState::AwaitingAnswer;
        self.publish(&inner);
    }

    /// Returns whether another outer attempt should be made.
    fn apply_fetch_failure(&self, session: u64, err: &QuestionFetchError, failures: u32) -> bool {
        let mut inner = self.lock();
        if inner.session != session {
            return false;
        }
        log::warn!("Question fetch failed ({} in a row): {}", failures, err);

        let exhausted = self
            .shared
            .settings
            .outer_retry_limit
            .map_or(false, |limit| failures > limit);
        if exhausted {
            log::error!("Giving up on session {} after {} failed fetches", session, failures);
            inner.state = QuizState::Idle;
            inner.avatar = Avatar::new(Mood::Sad, avatar::GAVE_UP);
        } else {
            inner.avatar = Avatar::new(Mood::Sad, avatar::CONNECTION_TROUBLE);
        }
        self.publish(&inner);
        !exhausted
    }
}
