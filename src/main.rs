use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dotenv::dotenv;
use quest_bot::config::Config;
use quest_bot::quiz::avatar::Avatar;
use quest_bot::quiz::controller::{AnswerError, AnswerFeedback};
use quest_bot::quiz::identity::{IdentityProvider, JsonFileStore};
use quest_bot::quiz::service::ClientSetupError;
use quest_bot::quiz::QuestionCount;
use quest_bot::{QuizController, QuizSnapshot, QuizState, ServiceClient};
use teloxide::{
    dispatching::dialogue::InMemStorage,
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove, ReplyMarkup},
};
use tokio::sync::watch;

type QuizDialogue = Dialogue<State, InMemStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type Controller = QuizController<ServiceClient>;

#[derive(Clone, Default)]
pub enum State {
    #[default]
    Start,
    ReceiveQuestionCount,
    Quiz,
}

/// One quiz controller per chat, created on first contact and dropped on `/start`.
#[derive(Clone)]
struct Sessions {
    controllers: Arc<Mutex<HashMap<ChatId, Controller>>>,
    identities: Arc<JsonFileStore>,
    config: Arc<Config>,
}

impl Sessions {
    fn new(config: Config) -> Self {
        Self {
            controllers: Arc::new(Mutex::new(HashMap::new())),
            identities: Arc::new(JsonFileStore::new(config.identity_path())),
            config: Arc::new(config),
        }
    }

    /// Returns the chat's controller, calling `on_new` once when it has to be created.
    fn controller(
        &self,
        chat_id: ChatId,
        on_new: impl FnOnce(&Controller),
    ) -> Result<Controller, ClientSetupError> {
        let mut controllers = self.controllers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(controller) = controllers.get(&chat_id) {
            return Ok(controller.clone());
        }

        let key = format!("{}:{}", IdentityProvider::DEFAULT_KEY, chat_id);
        let identity = IdentityProvider::new(self.identities.as_ref(), key);
        let client = ServiceClient::new(
            &self.config.api_base_url,
            self.config.request_timeout,
            &identity,
        )?;
        log::info!("New quiz player {} in chat {}", client.user_id(), chat_id);

        let controller = QuizController::new(Arc::new(client), self.config.controller_settings());
        on_new(&controller);
        controllers.insert(chat_id, controller.clone());
        Ok(controller)
    }

    /// Forgets the chat's controller. Its pending work is cancelled, and once the
    /// last handle is gone the update forwarder stops as well.
    fn remove(&self, chat_id: ChatId) {
        let removed = self
            .controllers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&chat_id);
        if let Some(controller) = removed {
            controller.shutdown();
        }
    }
}

fn chat_controller(
    sessions: &Sessions,
    bot: &Bot,
    chat_id: ChatId,
) -> Result<Controller, ClientSetupError> {
    sessions.controller(chat_id, |controller| {
        tokio::spawn(forward_updates(bot.clone(), chat_id, controller.subscribe()));
    })
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting Historical Quest bot...");

    let config = Config::from_env().expect("Invalid quiz configuration");
    log::info!("Using quiz service at {}", config.api_base_url);
    let sessions = Sessions::new(config);

    let bot = Bot::from_env();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, InMemStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveQuestionCount].endpoint(receive_question_count))
            .branch(dptree::case![State::Quiz].endpoint(quiz)),
    )
    .dependencies(dptree::deps![InMemStorage::<State>::new(), sessions])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

fn question_count_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(
        QuestionCount::ALL
            .iter()
            .map(|count| vec![KeyboardButton::new(format!("{} Questions", count.get()))])
            .collect::<Vec<_>>(),
    )
}

/// Accepts both "10" and the keyboard's "10 Questions".
fn parse_question_count(text: &str) -> Option<QuestionCount> {
    let number = text.split_whitespace().next()?.parse::<u32>().ok()?;
    QuestionCount::try_from(number).ok()
}

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Avatar::welcome().to_string())
        .await?;
    bot.send_message(msg.chat.id, "How many questions would you like?")
        .reply_markup(question_count_keyboard())
        .await?;

    dialogue.update(State::ReceiveQuestionCount).await?;
    Ok(())
}

async fn receive_question_count(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    sessions: Sessions,
) -> HandlerResult {
    let count = match msg.text().and_then(parse_question_count) {
        Some(count) => count,
        None => {
            bot.send_message(msg.chat.id, "Please pick 5, 10, 15 or 20 questions")
                .reply_markup(question_count_keyboard())
                .await?;
            return Ok(());
        }
    };

    let controller = chat_controller(&sessions, &bot, msg.chat.id)?;
    controller.select_question_count(count);
    controller.start_quiz(count);

    dialogue.update(State::Quiz).await?;
    Ok(())
}

async fn quiz(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    sessions: Sessions,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Please answer with one of the buttons")
            .await?;
        return Ok(());
    };

    if text == "/start" {
        sessions.remove(msg.chat.id);
        return start(bot, dialogue, msg).await;
    }

    let controller = chat_controller(&sessions, &bot, msg.chat.id)?;

    match controller.state() {
        QuizState::Complete | QuizState::Idle => {
            // Finished or abandoned quizzes wait for a new question count.
            match parse_question_count(text) {
                Some(count) => {
                    controller.select_question_count(count);
                    controller.start_quiz(count);
                }
                None => {
                    bot.send_message(msg.chat.id, "Pick a length to start a new quiz")
                        .reply_markup(question_count_keyboard())
                        .await?;
                }
            }
            return Ok(());
        }
        _ => {}
    }

    match controller.answer(text).await {
        Ok(feedback) => {
            let markup: ReplyMarkup = if feedback.progress.complete {
                question_count_keyboard().into()
            } else {
                KeyboardRemove::new().into()
            };
            bot.send_message(msg.chat.id, feedback_text(&feedback))
                .reply_markup(markup)
                .await?;
        }
        Err(AnswerError::UnknownOption(_)) => {
            bot.send_message(msg.chat.id, "Please choose one of the offered answers")
                .await?;
        }
        Err(AnswerError::NotAwaitingAnswer) => {
            bot.send_message(msg.chat.id, "Hold on, the next question is on its way...")
                .await?;
        }
        Err(AnswerError::Superseded) => {}
        // The controller already switched the avatar to its apology and re-offers the question.
        Err(AnswerError::Submit(err)) => log::error!("Answer from chat {} lost: {}", msg.chat.id, err),
    }
    Ok(())
}

/// Verdict, explanation and the companion's reaction to one answer, followed by
/// the final score when it was the last question.
fn feedback_text(feedback: &AnswerFeedback) -> String {
    let verdict = if feedback.correct { "Correct!" } else { "Not quite." };
    let mut text = format!("{} {}\n\n{}", verdict, feedback.explanation, feedback.avatar);
    if feedback.progress.complete {
        text.push_str(&format!(
            "\n\nQuiz Complete!\nFinal Score: {}/{}\n\nPick a length to start a new quiz.",
            feedback.progress.score, feedback.progress.questions_answered
        ));
    }
    text
}

/// Mirrors controller snapshots into the chat for as long as the controller lives.
async fn forward_updates(bot: Bot, chat_id: ChatId, mut updates: watch::Receiver<QuizSnapshot>) {
    let mut last_shown: Option<(u64, QuizState, Avatar)> = None;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        let key = (snapshot.session, snapshot.state, snapshot.avatar.clone());
        if last_shown.as_ref() == Some(&key) {
            continue;
        }
        last_shown = Some(key);

        if let Err(err) = render_snapshot(&bot, chat_id, &snapshot).await {
            log::warn!("Failed to update chat {}: {}", chat_id, err);
        }
    }
    log::debug!("Stopped forwarding quiz updates to chat {}", chat_id);
}

async fn render_snapshot(bot: &Bot, chat_id: ChatId, snapshot: &QuizSnapshot) -> HandlerResult {
    let progress = &snapshot.progress;
    match snapshot.state {
        QuizState::Loading => {
            bot.send_message(chat_id, snapshot.avatar.to_string()).await?;
            // Only cosmetic, so a failure here is not worth reporting.
            let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
        }
        QuizState::AwaitingAnswer => {
            let Some(question) = &snapshot.question else {
                return Ok(());
            };
            let text = format!(
                "{}\n\nProgress: {}% ({}/{}) · Score: {} · Difficulty: {}\n\n{}",
                snapshot.avatar,
                progress.percent(),
                progress.questions_answered,
                progress.target_questions,
                progress.score,
                progress.difficulty,
                question.text
            );
            bot.send_message(chat_id, text)
                .reply_markup(KeyboardMarkup::new(
                    question
                        .options
                        .iter()
                        .map(|option| vec![KeyboardButton::new(option.clone())])
                        .collect::<Vec<_>>(),
                ))
                .await?;
        }
        // The answer handler reports these together with its feedback.
        QuizState::Submitting | QuizState::Complete => {}
        QuizState::Idle => {
            bot.send_message(chat_id, snapshot.avatar.to_string())
                .reply_markup(question_count_keyboard())
                .await?;
        }
    }
    Ok(())
}
