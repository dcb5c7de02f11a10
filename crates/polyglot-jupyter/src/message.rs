//! Jupyter messages and their multipart wire form.
//!
//! On the wire a message is a list of frames:
//!
//! ```text
//! [identity...] <IDS|MSG> signature header parent_header metadata content [buffer...]
//! ```
//!
//! The signature covers the four JSON frames in that order.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JupyterError;
use crate::signature::Signer;

pub const DELIMITER: &[u8] = b"<IDS|MSG>";
pub const PROTOCOL_VERSION: &str = "5.3";

pub type Frames = Vec<Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    PROTOCOL_VERSION.into()
}

impl Header {
    pub fn new(msg_type: &str, session: &str, username: &str) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            session: session.to_string(),
            username: username.to_string(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            msg_type: msg_type.to_string(),
            version: PROTOCOL_VERSION.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Routing prefix: peer identities on router channels, the topic on
    /// IOPub.
    pub identities: Frames,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Value,
    pub buffers: Frames,
}

impl Message {
    /// A fresh message that answers nobody, as a frontend would send it.
    pub fn new(msg_type: &str, session: &str, content: impl Serialize) -> Result<Self, JupyterError> {
        Ok(Self {
            identities: Vec::new(),
            header: Header::new(msg_type, session, "polyglot"),
            parent_header: None,
            metadata: Value::Object(Map::new()),
            content: serde_json::to_value(content)?,
            buffers: Vec::new(),
        })
    }

    /// A reply routed back to the sender of `parent`.
    pub fn reply(parent: &Message, msg_type: &str, content: impl Serialize) -> Result<Self, JupyterError> {
        Ok(Self {
            identities: parent.identities.clone(),
            header: Header::new(msg_type, &parent.header.session, &parent.header.username),
            parent_header: Some(parent.header.clone()),
            metadata: Value::Object(Map::new()),
            content: serde_json::to_value(content)?,
            buffers: Vec::new(),
        })
    }

    /// A broadcast caused by `parent`, prefixed with `topic`.
    pub fn publish(
        parent: &Message,
        topic: &str,
        msg_type: &str,
        content: impl Serialize,
    ) -> Result<Self, JupyterError> {
        let mut message = Self::reply(parent, msg_type, content)?;
        message.identities = vec![topic.as_bytes().to_vec()];
        Ok(message)
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, JupyterError> {
        serde_json::from_value(self.content.clone()).map_err(|e| {
            JupyterError::Protocol(format!("bad {} content: {e}", self.header.msg_type))
        })
    }

    pub fn to_frames(&self, signer: &Signer) -> Result<Frames, JupyterError> {
        let header = serde_json::to_vec(&self.header)?;
        let parent = match &self.parent_header {
            Some(parent) => serde_json::to_vec(parent)?,
            None => b"{}".to_vec(),
        };
        let metadata = serde_json::to_vec(&self.metadata)?;
        let content = serde_json::to_vec(&self.content)?;
        let signature = signer.sign(&[&header, &parent, &metadata, &content])?;

        let mut frames = self.identities.clone();
        frames.push(DELIMITER.to_vec());
        frames.push(signature.into_bytes());
        frames.extend([header, parent, metadata, content]);
        frames.extend(self.buffers.iter().cloned());
        Ok(frames)
    }

    /// Parses a multipart message, rejecting it unless its signature
    /// matches.
    pub fn from_frames(mut frames: Frames, signer: &Signer) -> Result<Self, JupyterError> {
        let split = frames
            .iter()
            .position(|f| f.as_slice() == DELIMITER)
            .ok_or_else(|| JupyterError::Protocol("missing <IDS|MSG> delimiter".into()))?;
        if frames.len() < split + 6 {
            return Err(JupyterError::Protocol(format!(
                "expected at least 5 frames after the delimiter, got {}",
                frames.len() - split - 1
            )));
        }
        let buffers = frames.split_off(split + 6);
        let mut parts = frames.split_off(split).into_iter().skip(1);
        let identities = frames;
        let (Some(signature), Some(header), Some(parent), Some(metadata), Some(content)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(JupyterError::Protocol("truncated message".into()));
        };

        let signature = String::from_utf8(signature)
            .map_err(|_| JupyterError::Protocol("signature is not utf-8".into()))?;
        signer.verify(&signature, &[&header, &parent, &metadata, &content])?;

        let parent: Value = serde_json::from_slice(&parent)?;
        let parent_header = match &parent {
            Value::Object(map) if map.is_empty() => None,
            _ => Some(serde_json::from_value(parent)?),
        };
        Ok(Self {
            identities,
            header: serde_json::from_slice(&header)?,
            parent_header,
            metadata: serde_json::from_slice(&metadata)?,
            content: serde_json::from_slice(&content)?,
            buffers,
        })
    }
}
