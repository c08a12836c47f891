//! Staged synthesis of a therapeutic response from similar past exchanges.
//!
//! A run always goes through the same stages (initialization, search,
//! processing, synthesis) and ends with exactly one terminal event. The
//! blocking API is a consumer that drains the event channel and keeps only
//! that terminal event.

pub mod channel;
pub mod events;
pub mod orchestrator;
pub mod prompt;
pub mod quality;
pub mod request;

pub use channel::{event_channel, EventSink, EventSubscription};
pub use events::{ExampleMetadata, SimilarExample, Stage, SynthesisEvent, SynthesisResult};
pub use orchestrator::{DeliveryMode, OrchestratorSettings, SynthesisOrchestrator};
pub use quality::{ExemplarSet, QualitySelector};
pub use request::{QueryRequest, SynthesisRequest};
