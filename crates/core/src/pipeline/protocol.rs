//! JSON messages exchanged with a client over its connection.

use serde::{Deserialize, Serialize};

use crate::detection::domain::detected_face::DetectedFace;

/// Client request to start (or switch to) a stream.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub video_url: String,
}

impl StreamRequest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Everything the server pushes to a client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    FacesDetected {
        #[serde(rename = "frameNumber")]
        frame_number: u64,
        faces: Vec<DetectedFace>,
    },
    Error {
        message: String,
    },
    StreamEnded,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound connection activity, independent of the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Text(String),
    Closed,
    Error(String),
}
