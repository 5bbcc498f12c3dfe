// ABOUTME: Stream aggregation — forwards provider deltas to the caller and accumulates the full reply.
// ABOUTME: Handles both streaming and single-response modes; never touches the session itself.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::chat::provider::ProviderResponse;
use crate::error::{ChatError, ChatResult};

/// Events delivered to the caller for one exchange. Every exchange ends with
/// exactly one `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// A piece of the assistant reply.
    Delta {
        text: String,
        conversation_id: String,
    },
    /// The reply finished and was committed to the session.
    Completed {
        conversation_id: String,
        text: String,
    },
    /// The exchange aborted; the session was not modified.
    Failed {
        conversation_id: String,
        error: String,
    },
}

/// Progress of one exchange through the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Streaming,
    Completed,
}

/// Accumulates a provider response while forwarding it.
#[derive(Debug)]
pub struct StreamAggregator {
    conversation_id: String,
    state: ExchangeState,
    text: String,
    deltas: usize,
}

impl StreamAggregator {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state: ExchangeState::Idle,
            text: String::new(),
            deltas: 0,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drain `response`, emitting each non-empty delta before reading the
    /// next one, and return the full reply.
    ///
    /// A provider error or a closed receiver stops draining; whatever was
    /// accumulated stays with the aggregator and is not returned.
    pub async fn drain(
        &mut self,
        response: ProviderResponse,
        tx: &mpsc::Sender<ExchangeEvent>,
    ) -> ChatResult<String> {
        match response {
            ProviderResponse::Stream(mut stream) => {
                while let Some(delta) = stream.next().await {
                    let delta = delta?;
                    if delta.is_empty() {
                        continue;
                    }
                    self.state = ExchangeState::Streaming;
                    self.text.push_str(&delta);
                    self.deltas += 1;
                    self.emit(tx, delta).await?;
                }
            }
            ProviderResponse::Complete(text) => {
                self.text = text.clone();
                self.deltas = 1;
                self.emit(tx, text).await?;
            }
        }

        self.state = ExchangeState::Completed;
        debug!(
            conversation_id = %self.conversation_id,
            deltas = self.deltas,
            bytes = self.text.len(),
            "reply complete"
        );
        Ok(self.text.clone())
    }

    async fn emit(&self, tx: &mpsc::Sender<ExchangeEvent>, text: String) -> ChatResult<()> {
        tx.send(ExchangeEvent::Delta {
            text,
            conversation_id: self.conversation_id.clone(),
        })
        .await
        .map_err(|_| ChatError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::provider::DeltaStream;
    use crate::error::ProviderError;

    fn scripted(items: Vec<Result<&'static str, &'static str>>) -> ProviderResponse {
        let stream: DeltaStream = Box::pin(futures::stream::iter(items.into_iter().map(|item| {
            item.map(str::to_string)
                .map_err(|e| ProviderError::Stream(e.to_string()))
        })));
        ProviderResponse::Stream(stream)
    }

    fn texts(rx: &mut mpsc::Receiver<ExchangeEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExchangeEvent::Delta { text, .. } = event {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test]
    async fn streaming_forwards_non_empty_deltas_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut agg = StreamAggregator::new("conv_1");
        assert_eq!(agg.state(), ExchangeState::Idle);

        let full = agg
            .drain(scripted(vec![Ok("Hel"), Ok(""), Ok("lo"), Ok("!")]), &tx)
            .await
            .unwrap();

        assert_eq!(full, "Hello!");
        assert_eq!(agg.state(), ExchangeState::Completed);
        assert_eq!(texts(&mut rx), vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn deltas_carry_the_conversation_id() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut agg = StreamAggregator::new("conv_xyz");
        agg.drain(scripted(vec![Ok("a")]), &tx).await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ExchangeEvent::Delta {
                text: "a".to_string(),
                conversation_id: "conv_xyz".to_string()
            }
        );
    }

    #[tokio::test]
    async fn complete_response_emits_one_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut agg = StreamAggregator::new("conv_1");
        let full = agg
            .drain(ProviderResponse::Complete("Hello!".to_string()), &tx)
            .await
            .unwrap();
        assert_eq!(full, "Hello!");
        assert_eq!(texts(&mut rx), vec!["Hello!"]);
    }

    #[tokio::test]
    async fn streaming_and_complete_agree() {
        let (tx, mut rx) = mpsc::channel(16);
        let streamed = StreamAggregator::new("c")
            .drain(scripted(vec![Ok("{\"answer\":"), Ok(" \"hi\""), Ok("}")]), &tx)
            .await
            .unwrap();
        let joined: String = texts(&mut rx).concat();

        let whole = StreamAggregator::new("c")
            .drain(ProviderResponse::Complete(joined.clone()), &tx)
            .await
            .unwrap();
        assert_eq!(streamed, joined);
        assert_eq!(streamed, whole);
    }

    #[tokio::test]
    async fn provider_error_mid_stream_keeps_emitted_deltas() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut agg = StreamAggregator::new("conv_1");
        let err = agg
            .drain(
                scripted(vec![Ok("one "), Ok("two "), Err("connection reset"), Ok("four")]),
                &tx,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Provider(ProviderError::Stream(_))));
        assert_eq!(agg.state(), ExchangeState::Streaming);
        assert_eq!(texts(&mut rx), vec!["one ", "two "]);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut agg = StreamAggregator::new("conv_1");
        let err = agg.drain(scripted(vec![Ok("a"), Ok("b")]), &tx).await.unwrap_err();
        assert!(matches!(err, ChatError::Cancelled));
        assert_ne!(agg.state(), ExchangeState::Completed);
    }
}
