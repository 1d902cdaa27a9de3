//! HTTP client for the remote quiz service.
//!
//! The service exposes two JSON endpoints under its base path:
//! `POST /question` hands out a question for a difficulty and
//! `POST /answer` scores an answer and decides the next difficulty.
//! Question fetches are retried on a fixed delay, answer submissions are not.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::quiz::identity::{IdentityError, IdentityProvider};
use crate::quiz::{AnswerResult, AnswerSubmission, Difficulty, Question};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid question data received")]
    InvalidQuestion,
}

#[derive(Debug, thiserror::Error)]
pub enum QuestionFetchError {
    #[error("failed to load question after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: RequestError,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("failed to submit answer")]
pub struct AnswerSubmitError(#[source] pub RequestError);

#[derive(Debug, thiserror::Error)]
pub enum ClientSetupError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Everything the quiz controller needs from the remote service.
#[async_trait]
pub trait QuizApi: Send + Sync + 'static {
    async fn get_question(&self, difficulty: Difficulty) -> Result<Question, QuestionFetchError>;

    async fn submit_answer(
        &self,
        difficulty: Difficulty,
        is_correct: bool,
        quiz_complete: bool,
    ) -> Result<AnswerResult, AnswerSubmitError>;
}

/// How often and how patiently a failed question fetch is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first one fails.
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRequest<'a> {
    difficulty: Difficulty,
    user_id: &'a str,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    retry: RetryPolicy,
}

impl ServiceClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        identity: &IdentityProvider<'_>,
    ) -> Result<Self, ClientSetupError> {
        let user_id = identity.identity()?.user_id;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RequestError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            return Err(RequestError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| RequestError::Decode(e.to_string()))
    }

    async fn fetch_question_once(&self, difficulty: Difficulty) -> Result<Question, RequestError> {
        let request = QuestionRequest {
            difficulty,
            user_id: &self.user_id,
        };
        let question: Question = self.post("question", &request).await?;
        if !question.is_valid() {
            return Err(RequestError::InvalidQuestion);
        }
        Ok(question)
    }
}

#[async_trait]
impl QuizApi for ServiceClient {
    async fn get_question(&self, difficulty: Difficulty) -> Result<Question, QuestionFetchError> {
        let attempts = self.retry.total_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_question_once(difficulty).await {
                Ok(question) => {
                    log::debug!("Fetched {} question on attempt {}", difficulty, attempt);
                    return Ok(question);
                }
                Err(err) => {
                    log::warn!(
                        "Error fetching question (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        err
                    );
                    if attempt >= attempts {
                        return Err(QuestionFetchError::Exhausted { attempts: attempt, last: err });
                    }
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }

    async fn submit_answer(
        &self,
        difficulty: Difficulty,
        is_correct: bool,
        quiz_complete: bool,
    ) -> Result<AnswerResult, AnswerSubmitError> {
        let submission = AnswerSubmission {
            user_id: self.user_id.clone(),
            difficulty,
            is_correct,
            quiz_complete,
        };
        self.post("answer", &submission).await.map_err(|err| {
            log::error!("Error submitting answer: {}", err);
            AnswerSubmitError(err)
        })
    }
}
