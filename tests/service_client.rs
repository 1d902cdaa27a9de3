use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mockito::{Matcher, Server};
use quest_bot::quiz::identity::{IdentityError, IdentityProvider, IdentityStore};
use quest_bot::quiz::service::{
    AnswerSubmitError, QuestionFetchError, QuizApi, RequestError, RetryPolicy, ServiceClient,
};
use quest_bot::quiz::Difficulty;
use serde_json::json;

const USER_ID: &str = "user_k3j9x0a1b";

const VALID_QUESTION: &str = r#"{
    "text": "Which empire built Machu Picchu?",
    "options": ["Inca", "Aztec", "Maya", "Olmec"],
    "correctAnswer": "Inca",
    "explanation": "It was built in the 15th century for the Inca emperor Pachacuti."
}"#;

#[derive(Default)]
struct MemoryStore(Mutex<HashMap<String, String>>);

impl MemoryStore {
    fn with_user(user_id: &str) -> Self {
        let store = Self::default();
        store.set(IdentityProvider::DEFAULT_KEY, user_id).unwrap();
        store
    }
}

impl IdentityStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.0.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn client_for(server: &Server) -> ServiceClient {
    client_with_delay(server, Duration::from_millis(10))
}

fn client_with_delay(server: &Server, delay: Duration) -> ServiceClient {
    let store = MemoryStore::with_user(USER_ID);
    let identity = IdentityProvider::new(&store, IdentityProvider::DEFAULT_KEY);
    ServiceClient::new(
        &format!("{}/api/", server.url()),
        Duration::from_secs(5),
        &identity,
    )
    .unwrap()
    .with_retry_policy(RetryPolicy {
        max_retries: 3,
        delay,
    })
}

#[tokio::test]
async fn question_request_carries_difficulty_and_user_id() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/question")
        .match_body(Matcher::Json(json!({
            "difficulty": "hard",
            "userId": USER_ID,
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(VALID_QUESTION)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let question = client.get_question(Difficulty::Hard).await.unwrap();

    assert_eq!(question.text, "Which empire built Machu Picchu?");
    assert_eq!(question.options.len(), 4);
    assert_eq!(question.correct_answer, "Inca");
    mock.assert_async().await;
}

#[tokio::test]
async fn question_fetch_gives_up_after_four_attempts() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/question")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": true, "message": "Failed to generate question: quota exceeded"}"#)
        .expect(4)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.get_question(Difficulty::Easy).await.unwrap_err();

    match err {
        QuestionFetchError::Exhausted {
            attempts,
            last: RequestError::Status { status, message },
        } => {
            assert_eq!(attempts, 4);
            assert_eq!(status, 500);
            assert_eq!(message, "Failed to generate question: quota exceeded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn invalid_question_payloads_are_retried() {
    let mut server = Server::new_async().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mock = server
        .mock("POST", "/api/question")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                br#"{"text": "", "options": []}"#.to_vec()
            } else {
                VALID_QUESTION.as_bytes().to_vec()
            }
        })
        .expect(3)
        .create_async()
        .await;

    let client = client_with_delay(&server, Duration::from_millis(50));
    let started = Instant::now();
    let question = client.get_question(Difficulty::Medium).await.unwrap();

    // Two waits between three attempts.
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(question.correct_answer, "Inca");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    mock.assert_async().await;
}

#[tokio::test]
async fn answer_is_submitted_and_scored() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/answer")
        .match_body(Matcher::Json(json!({
            "userId": USER_ID,
            "difficulty": "medium",
            "isCorrect": true,
            "quizComplete": false,
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"score": 3, "totalQuestions": 4, "newDifficulty": "hard"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let result = client
        .submit_answer(Difficulty::Medium, true, false)
        .await
        .unwrap();

    assert_eq!(result.score, 3);
    assert_eq!(result.total_questions, 4);
    assert_eq!(result.new_difficulty, Difficulty::Hard);
    mock.assert_async().await;
}

#[tokio::test]
async fn answer_submission_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/answer")
        .with_status(503)
        .with_body("service unavailable")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client
        .submit_answer(Difficulty::Easy, false, true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AnswerSubmitError(RequestError::Status { status: 503, ref message }) if message == "service unavailable"
    ));
    mock.assert_async().await;
}

#[tokio::test]
async fn unknown_difficulty_from_service_is_rejected() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/answer")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"score": 1, "totalQuestions": 1, "newDifficulty": "legendary"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client
        .submit_answer(Difficulty::Hard, true, false)
        .await
        .unwrap_err();

    assert!(matches!(err, AnswerSubmitError(RequestError::Decode(_))));
}

#[tokio::test]
async fn client_assigns_identity_when_none_is_stored() {
    let server = Server::new_async().await;
    let store = MemoryStore::default();
    let identity = IdentityProvider::new(&store, IdentityProvider::DEFAULT_KEY);

    let client = ServiceClient::new(&server.url(), Duration::from_secs(5), &identity).unwrap();

    assert!(client.user_id().starts_with("user_"));
    assert_eq!(
        store.get(IdentityProvider::DEFAULT_KEY).unwrap().as_deref(),
        Some(client.user_id())
    );

    let again = ServiceClient::new(&server.url(), Duration::from_secs(5), &identity).unwrap();
    assert_eq!(again.user_id(), client.user_id());
}
