use serde::Deserialize;

use crate::synthesis::SynthesisRequest;

/// Client frame. `type` is `synthesize` (with request fields alongside) or
/// `stop`. Besides run events the server sends `stopped` and `rejected`.
#[derive(Debug, Deserialize, Default)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    #[serde(flatten)]
    pub request: SynthesisRequest,
}
