// ABOUTME: Error kinds for the conversation core — provider, attachment, persistence, schema.
// ABOUTME: ChatError aggregates them for a single exchange; binaries wrap everything in anyhow.

use thiserror::Error;

/// Failures talking to the completion provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed provider frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("unknown LLM provider: '{0}'. Expected: ollama")]
    UnknownProvider(String),
}

/// Failures resolving an image reference into bytes.
///
/// Decoding problems never show up here: a reference that is not valid base64
/// falls back to its raw UTF-8 bytes.
#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("failed to fetch attachment '{reference}': {source}")]
    Fetch {
        reference: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read attachment '{reference}': {source}")]
    Read {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures from the session store and its persistence backend.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("persistence I/O error: {0}")]
    PersistenceIo(#[from] std::io::Error),

    #[error("malformed session document: {0}")]
    Format(#[from] serde_json::Error),

    #[error("invalid conversation id: '{0}'")]
    InvalidConversationId(String),
}

/// A provider reply that does not honor the structured-output contract.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("reply is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("unexpected field '{0}'")]
    UnexpectedField(String),

    #[error("field '{field}' should be of type {expected}")]
    WrongType { field: String, expected: String },

    #[error("field '{field}' has value {value} outside its enum")]
    NotInEnum { field: String, value: String },
}

/// Everything that can abort one exchange. The session is left unmodified
/// whenever one of these is returned.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("reply violates the output schema: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("exchange cancelled by the caller")]
    Cancelled,
}

pub type ChatResult<T> = Result<T, ChatError>;
