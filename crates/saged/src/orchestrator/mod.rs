//! Chat orchestration: the bounded model/tool loop and its seams.

pub mod engine;
pub mod model_client;
pub mod streaming;
pub mod tool_trait;

pub use engine::{ChatEngine, EngineError, CAP_EXCEEDED_MSG, GENERIC_ERROR_MSG};
pub use model_client::{
    FakeModelClient, HttpModelClient, ModelClient, ModelError, ModelTurn, ScriptedTurn, StopReason,
    StreamAssembler,
};
pub use streaming::{sse_response, ChannelSink, CollectSink, SinkClosed, StreamSink};
pub use tool_trait::{FakeToolGateway, ToolGateway};
