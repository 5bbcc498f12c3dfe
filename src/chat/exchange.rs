// ABOUTME: Chat manager — runs one exchange end to end: session, attachment, provider, aggregation, commit.
// ABOUTME: Serializes exchanges per conversation id and reports each one's outcome as a terminal event.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::attachment::{AttachmentRef, AttachmentResolver};
use crate::chat::assembler::build_request;
use crate::chat::provider::CompletionProvider;
use crate::chat::stream::{ExchangeEvent, StreamAggregator};
use crate::error::{ChatError, ChatResult};
use crate::schema::{SchemaFields, build_schema};
use crate::session::store::SessionStore;

/// Buffered events between a spawned exchange and its consumer. Kept at one
/// so the exchange never runs more than a single delta ahead of the caller.
const EVENT_BUFFER: usize = 1;

/// Caller-facing stream of exchange events.
pub type ExchangeStream = ReceiverStream<ExchangeEvent>;

/// Defaults applied to every exchange unless the request overrides them.
#[derive(Debug, Clone)]
pub struct ChatDefaults {
    pub model: String,
    pub stream: bool,
    /// Send the structured-output contract with each request.
    pub structured_output: bool,
    /// Reject replies that do not satisfy the contract before committing them.
    pub validate_output: bool,
}

/// One user message and its options.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub message: String,
    pub image: Option<AttachmentRef>,
    /// Existing conversation to continue; a new `conv_<uuid>` id is generated when absent.
    pub conversation_id: Option<String>,
    /// Replaces the conversation's system message before the exchange.
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub stream: Option<bool>,
    /// Extra structured-output fields besides `answer`.
    pub schema_fields: Option<SchemaFields>,
}

impl ChatParams {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn image(mut self, image: impl Into<AttachmentRef>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn schema_fields(mut self, fields: SchemaFields) -> Self {
        self.schema_fields = Some(fields);
        self
    }
}

/// A committed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExchange {
    pub conversation_id: String,
    pub text: String,
    /// Reply fields when the contract was validated.
    pub fields: Option<Map<String, Value>>,
}

/// Generate a fresh conversation identifier.
pub fn new_conversation_id() -> String {
    format!("conv_{}", uuid::Uuid::new_v4())
}

/// Ties the session store, attachment resolver and provider together.
pub struct ChatManager {
    store: Arc<SessionStore>,
    provider: Arc<dyn CompletionProvider>,
    resolver: AttachmentResolver,
    defaults: ChatDefaults,
}

impl ChatManager {
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn CompletionProvider>,
        resolver: AttachmentResolver,
        defaults: ChatDefaults,
    ) -> Self {
        Self {
            store,
            provider,
            resolver,
            defaults,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start an exchange in the background. Returns the conversation id and
    /// the event stream, which ends with one `Completed` or `Failed` event.
    pub fn chat(self: &Arc<Self>, mut params: ChatParams) -> (String, ExchangeStream) {
        let conversation_id = params
            .conversation_id
            .take()
            .unwrap_or_else(new_conversation_id);
        params.conversation_id = Some(conversation_id.clone());

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let manager = Arc::clone(self);
        let id = conversation_id.clone();
        tokio::spawn(async move {
            let terminal = match manager.run_exchange(params, &tx).await {
                Ok(done) => ExchangeEvent::Completed {
                    conversation_id: done.conversation_id,
                    text: done.text,
                },
                Err(e) => ExchangeEvent::Failed {
                    conversation_id: id,
                    error: e.to_string(),
                },
            };
            // The receiver may already be gone; nothing left to tell it.
            let _ = tx.send(terminal).await;
        });

        (conversation_id, ReceiverStream::new(rx))
    }

    /// Run one exchange inline, forwarding deltas to `tx`.
    ///
    /// The session is updated exactly once, after the reply is complete (and
    /// valid, when validation is on). On any error it is left as it was,
    /// apart from an instructions edit, which is applied up front.
    pub async fn run_exchange(
        &self,
        params: ChatParams,
        tx: &mpsc::Sender<ExchangeEvent>,
    ) -> ChatResult<CompletedExchange> {
        let conversation_id = params
            .conversation_id
            .clone()
            .unwrap_or_else(new_conversation_id);
        let _guard = self.store.lock(&conversation_id).await;

        if let Some(instructions) = params.instructions.as_deref().filter(|s| !s.is_empty()) {
            self.store
                .edit_system_message(&conversation_id, instructions)
                .await?;
        }
        let session = self.store.get_or_create(&conversation_id).await?;

        let attachment = match &params.image {
            Some(image) => Some(self.resolver.resolve_ref(image).await?),
            None => None,
        };

        let schema = self
            .defaults
            .structured_output
            .then(|| build_schema(params.schema_fields.as_ref()));
        let model = params.model.as_deref().unwrap_or(&self.defaults.model);
        let stream = params.stream.unwrap_or(self.defaults.stream);
        let request = build_request(
            &session,
            model,
            &params.message,
            attachment.as_deref(),
            stream,
            schema.as_ref(),
        );

        info!(
            conversation_id = %conversation_id,
            provider = self.provider.name(),
            model,
            stream,
            history = session.history.len(),
            "starting exchange"
        );

        let response = self.provider.complete(&request).await?;
        let mut aggregator = StreamAggregator::new(conversation_id.clone());
        let text = match aggregator.drain(response, tx).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    state = ?aggregator.state(),
                    discarded_bytes = aggregator.text().len(),
                    error = %e,
                    "exchange aborted, session unchanged"
                );
                return Err(e);
            }
        };

        // Deltas still sitting in the buffer were never seen by the caller.
        if tx.is_closed() {
            warn!(conversation_id = %conversation_id, "caller went away before completion");
            return Err(ChatError::Cancelled);
        }

        let fields = match &schema {
            Some(contract) if self.defaults.validate_output => Some(contract.validate(&text)?),
            _ => None,
        };

        let updated = self
            .store
            .append(
                &conversation_id,
                &params.message,
                &text,
                attachment.into_iter().collect(),
            )
            .await?;
        debug!(
            conversation_id = %conversation_id,
            turns = updated.history.len(),
            "exchange committed"
        );

        Ok(CompletedExchange {
            conversation_id,
            text,
            fields,
        })
    }
}
