// ABOUTME: Message assembly — system entry, retained history, then the new user turn.
// ABOUTME: Reads a session snapshot and builds the ephemeral provider payload without mutating it.

use crate::chat::provider::{ChatMessage, ChatRequest, MessageRole};
use crate::schema::SchemaContract;
use crate::session::types::{Role, Session};

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        }
    }
}

/// Build the ordered payload `[system] + history + [new user turn]`.
///
/// A resolved attachment rides on the new user turn as a single-element image list.
pub fn assemble_messages(
    session: &Session,
    user_text: &str,
    attachment: Option<&[u8]>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(session.history.len() + 2);
    messages.push(ChatMessage::new(MessageRole::System, session.system.clone()));

    messages.extend(session.history.iter().map(|turn| ChatMessage {
        role: turn.role.into(),
        content: turn.content.clone(),
        images: turn.attachments.clone(),
    }));

    let mut user = ChatMessage::new(MessageRole::User, user_text);
    if let Some(bytes) = attachment {
        user.images.push(bytes.to_vec());
    }
    messages.push(user);
    messages
}

/// Build the complete provider request for one exchange.
pub fn build_request(
    session: &Session,
    model: &str,
    user_text: &str,
    attachment: Option<&[u8]>,
    stream: bool,
    schema: Option<&SchemaContract>,
) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: assemble_messages(session, user_text, attachment),
        stream,
        format: schema.map(SchemaContract::to_json),
    }
}
