//! Shared types and pure logic for the sage assistant.
//!
//! Everything the daemon (`saged`) and the evaluation runner (`sagectl`)
//! agree on lives here: the chat wire protocol, conversation state, the
//! scoring rubric and its validator, the heuristic scorer, test-case data,
//! and configuration.

pub mod chat;
pub mod config;
pub mod conversation;
pub mod heuristic;
pub mod rubric;
pub mod score;
pub mod testcase;
pub mod validator;

pub use chat::{
    validate_message, ChatRequest, RequestRejection, StreamEvent, MAX_MESSAGE_LENGTH,
    MAX_MODEL_CALLS,
};
pub use config::SageConfig;
pub use conversation::{ContentBlock, Conversation, ProtocolError, Role, Turn};
pub use heuristic::heuristic_score;
pub use rubric::{
    dimension_name, question_type_name, Dimension, QuestionType, DIMENSIONS, DIM_COUNT, DIM_KEYS,
    QUESTION_TYPES, RUBRICS,
};
pub use score::{ScoreRecord, CAP_OVERRIDE_CEILING, CAP_OVERRIDE_DIMS, PASS_THRESHOLD};
pub use testcase::{filter_cases, TestCase, TEST_CASES};
pub use validator::{anchor_excerpt_in_rubric, normalize_ws, validate_judge_output};
