// ABOUTME: Chat module — provider seam, Ollama client, message assembly, stream aggregation.
// ABOUTME: ChatManager in exchange.rs ties these to the session store.

pub mod assembler;
pub mod exchange;
pub mod ollama;
pub mod provider;
pub mod stream;

pub use assembler::{assemble_messages, build_request};
pub use exchange::{
    ChatDefaults, ChatManager, ChatParams, CompletedExchange, ExchangeStream, new_conversation_id,
};
pub use ollama::OllamaClient;
pub use provider::{
    ChatMessage, ChatRequest, CompletionProvider, DeltaStream, MessageRole, ProviderResponse,
    create_client,
};
pub use stream::{ExchangeEvent, ExchangeState, StreamAggregator};
