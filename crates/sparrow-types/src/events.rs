use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::api::MessageResponse;
use crate::models::UserSummary;

/// Events sent from the server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// A new direct message was posted to a conversation.
    NewMessage {
        conversation_id: Uuid,
        message: MessageResponse,
    },

    /// A conversation's last message / activity changed.
    ConversationUpdated {
        conversation_id: Uuid,
        participants: Vec<UserSummary>,
        last_message: Box<MessageResponse>,
        last_activity: DateTime<Utc>,
    },

    /// A message was deleted by its sender.
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// Ephemeral typing state of a participant.
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
}

impl GatewayEvent {
    /// Returns the conversation this event is scoped to. `Ready` is
    /// connection-local and never forwarded from the broadcast bus.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::Ready { .. } => None,
            Self::NewMessage { conversation_id, .. }
            | Self::ConversationUpdated { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::UserTyping { conversation_id, .. } => Some(*conversation_id),
        }
    }

    /// For typing events, the user the event originated from. Used to
    /// avoid echoing typing state back at the typer.
    pub fn typist(&self) -> Option<Uuid> {
        match self {
            Self::UserTyping { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

/// Commands sent from the client to the server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the connection with the same JWT used for REST calls.
    /// Must be the first command; the server closes the socket otherwise.
    Identify { token: String },

    /// Start receiving events scoped to a conversation.
    JoinConversation { conversation_id: Uuid },

    /// Stop receiving events scoped to a conversation.
    LeaveConversation { conversation_id: Uuid },

    /// Report typing state in a conversation.
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"typing","data":{"conversation_id":"00000000-0000-0000-0000-000000000001","is_typing":true}}"#,
        )
        .unwrap();
        match cmd {
            GatewayCommand::Typing { is_typing, .. } => assert!(is_typing),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn typing_event_scoping() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = GatewayEvent::UserTyping {
            conversation_id,
            user_id,
            is_typing: true,
        };
        assert_eq!(event.conversation_id(), Some(conversation_id));
        assert_eq!(event.typist(), Some(user_id));

        let deleted = GatewayEvent::MessageDeleted {
            conversation_id,
            message_id: Uuid::new_v4(),
        };
        assert_eq!(deleted.typist(), None);

        let json = serde_json::to_string(&deleted).unwrap();
        assert!(json.contains(r#""type":"messageDeleted""#));
    }
}
