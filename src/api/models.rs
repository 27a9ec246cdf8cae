use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Separator between the components of an image identifier.
pub const ID_COMPONENT_SEPARATOR: char = '-';

/// The `{success, data}` wrapper around every NIM and SolarNetwork response.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    NotSuccess(Option<String>),
    MissingData,
    MalformedData(String),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::NotSuccess(Some(message)) => {
                write!(f, "request was not successful: {message}")
            }
            EnvelopeError::NotSuccess(None) => write!(f, "request was not successful"),
            EnvelopeError::MissingData => write!(f, "response contained no data"),
            EnvelopeError::MalformedData(err) => write!(f, "malformed response data: {err}"),
        }
    }
}

impl Envelope {
    /// Decode the payload, treating anything short of `success: true` with a
    /// well-typed `data` as failure.
    pub fn into_data<T>(self) -> Result<T, EnvelopeError>
    where
        T: DeserializeOwned,
    {
        if !self.success {
            return Err(EnvelopeError::NotSuccess(self.message));
        }

        match self.data {
            None | Some(Value::Null) => Err(EnvelopeError::MissingData),
            Some(data) => serde_json::from_value(data)
                .map_err(|e| EnvelopeError::MalformedData(e.to_string())),
        }
    }
}

/// Opaque key issued by the image maker after a successful authorization.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// A base image published by the image maker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl PartialEq for ImageInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageInfo {}

impl ImageInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id == id
    }

    pub fn components(&self) -> Vec<&str> {
        self.id.split(ID_COMPONENT_SEPARATOR).collect()
    }

    pub fn sha256(&self) -> Option<&str> {
        self.metadata.get("sha256").and_then(Value::as_str)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.metadata.get("contentLength").and_then(Value::as_u64)
    }

    pub fn uncompressed_sha256(&self) -> Option<&str> {
        self.metadata.get("uncompressedSha256").and_then(Value::as_str)
    }

    pub fn uncompressed_content_length(&self) -> Option<u64> {
        self.metadata
            .get("uncompressedContentLength")
            .and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    InProgress,
    Done,
}

/// Handle for an image build running on the image maker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    #[serde(default)]
    pub base_image_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub percent_complete: f64,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_info: Option<ImageInfo>,
}

impl Receipt {
    pub fn status(&self) -> ReceiptStatus {
        if self.done {
            ReceiptStatus::Done
        } else if self.started || self.percent_complete > 0.0 {
            ReceiptStatus::InProgress
        } else {
            ReceiptStatus::Pending
        }
    }

    /// Completion clamped to `[0, 1]`; servers have reported slightly over 1.
    pub fn progress(&self) -> f64 {
        if self.percent_complete.is_finite() {
            self.percent_complete.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Customization options passed along with the uploaded files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub verbose: bool,
}
