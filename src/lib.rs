pub mod config;
pub mod quiz;

pub use quiz::controller::{QuizController, QuizSnapshot, QuizState};
pub use quiz::service::{QuizApi, ServiceClient};
