//! Ordered delivery of synthesis events from one run to one consumer.
//!
//! The sink is consumed by `finish`, which is the only way to send a
//! terminal event, so a run can never emit two of them.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;

use super::events::{Stage, SynthesisEvent, SynthesisResult};
use crate::core::errors::{ErrorKind, FailedRun, SynthesisError};

pub fn event_channel(capacity: usize) -> (EventSink, EventSubscription) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx }, EventSubscription { rx })
}

pub struct EventSink {
    tx: mpsc::Sender<SynthesisEvent>,
}

impl EventSink {
    /// Returns false once the consumer has gone away.
    pub async fn progress(&self, stage: Stage, message: impl Into<String>) -> bool {
        self.emit(SynthesisEvent::progress(stage, message)).await
    }

    pub(crate) async fn emit(&self, event: SynthesisEvent) -> bool {
        debug_assert!(!event.is_terminal(), "terminal events go through finish");
        self.tx.send(event).await.is_ok()
    }

    /// Offers a cumulative response chunk without waiting.
    ///
    /// A full buffer drops the chunk; the next one supersedes it anyway.
    /// Returns false only when the consumer is gone.
    pub fn chunk(&self, content: String) -> bool {
        match self.tx.try_send(SynthesisEvent::ResponseChunk { content }) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer drops its subscription.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Sends the single terminal event for this run.
    pub async fn finish(self, outcome: Result<SynthesisResult, SynthesisError>) {
        let event = match outcome {
            Ok(result) => SynthesisEvent::Complete { result },
            Err(err) => {
                let kind = err.kind();
                if kind == ErrorKind::Cancelled {
                    tracing::debug!("Synthesis run cancelled");
                } else {
                    tracing::error!("Synthesis run failed: {}", err);
                }
                SynthesisEvent::Error {
                    message: err.to_string(),
                    kind,
                }
            }
        };
        // Nobody left to tell if the consumer is gone.
        let _ = self.tx.send(event).await;
    }
}

pub struct EventSubscription {
    rx: mpsc::Receiver<SynthesisEvent>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<SynthesisEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<SynthesisEvent> {
        ReceiverStream::new(self.rx)
    }

    /// Drains the run and keeps only its terminal event.
    pub async fn into_result(mut self) -> Result<SynthesisResult, FailedRun> {
        while let Some(event) = self.rx.recv().await {
            match event {
                SynthesisEvent::Complete { result } => return Ok(result),
                SynthesisEvent::Error { message, kind } => {
                    return Err(FailedRun { kind, message })
                }
                _ => {}
            }
        }
        Err(FailedRun {
            kind: ErrorKind::Cancelled,
            message: "synthesis run ended without a result".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str) -> SynthesisResult {
        SynthesisResult {
            similar_examples: vec![],
            synthesized_response: text.to_string(),
            keywords: vec![],
            user_query: "q".to_string(),
        }
    }

    #[tokio::test]
    async fn preserves_emission_order() {
        let (sink, mut sub) = event_channel(8);
        tokio::spawn(async move {
            sink.progress(Stage::Initialization, "start").await;
            sink.progress(Stage::Search, "search").await;
            sink.chunk("Hel".into());
            sink.finish(Ok(result("Hello"))).await;
        });

        let mut names = Vec::new();
        while let Some(event) = sub.recv().await {
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["progress", "progress", "response_chunk", "complete"]);
    }

    #[tokio::test]
    async fn full_buffer_drops_chunks_but_not_terminal() {
        let (sink, sub) = event_channel(1);
        assert!(sink.chunk("a".into()));
        assert!(sink.chunk("ab".into()));

        let finisher = tokio::spawn(sink.finish(Ok(result("abc"))));
        let outcome = sub.into_result().await;
        finisher.await.unwrap();
        assert_eq!(outcome.unwrap().synthesized_response, "abc");
    }

    #[tokio::test]
    async fn blocking_view_returns_error() {
        let (sink, sub) = event_channel(4);
        sink.finish(Err(SynthesisError::Validation("empty".into())))
            .await;
        let err = sub.into_result().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("empty"));
    }

    #[tokio::test]
    async fn sink_notices_dropped_consumer() {
        let (sink, sub) = event_channel(4);
        drop(sub);
        sink.closed().await;
        assert!(sink.is_closed());
        assert!(!sink.chunk("x".into()));
        assert!(!sink.progress(Stage::Search, "search").await);
    }
}
