use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Channel, Message};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful identification
    Ready { user_id: Uuid },

    /// A message was posted to a channel
    MessageCreate { channel_id: Uuid, message: Message },

    /// A channel was created
    ChannelCreate { channel: Channel },

    /// A user changed their display name or avatar
    ProfileUpdate {
        user_id: Uuid,
        name: String,
        avatar_url: Option<String>,
    },
}

impl GatewayEvent {
    /// Returns the channel_id if this event is scoped to a specific channel.
    /// Events that return `None` are global and should be delivered to all clients.
    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of channels whose message events this client receives.
    Subscribe { channel_ids: Vec<Uuid> },
}
