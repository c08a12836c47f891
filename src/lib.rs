//! Retrieval-augmented synthesis of therapeutic responses.
//!
//! A query is embedded, matched against an index of past patient/therapist
//! exchanges, and the best-rated responses of the closest matches are handed
//! to a generative model as exemplars. Runs report progress as a stream of
//! typed events; see [`synthesis`].

pub mod core;
pub mod embedding;
pub mod index;
pub mod llm;
pub mod search;
pub mod server;
pub mod state;
pub mod synthesis;
pub mod vector_math;
