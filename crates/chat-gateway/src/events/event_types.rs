//! Gateway event types
//!
//! Names of the dispatch events the client understands. Unknown names are
//! still delivered, just without a typed name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cached entity an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Guild,
    Channel,
    Message,
    Member,
    Role,
    User,
}

/// Gateway event types
///
/// These are the event names sent in the `t` field of dispatch messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEventType {
    // Session events
    /// Sent after a successful Identify
    Ready,
    /// Sent after a successful Resume
    Resumed,

    // Guild events
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,

    // Channel events
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,

    // Message events
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageReactionAdd,
    MessageReactionRemove,

    // Member events
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,

    PresenceUpdate,
    TypingStart,
    /// Current user updated
    UserUpdate,
}

impl GatewayEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::GuildRoleCreate => "GUILD_ROLE_CREATE",
            Self::GuildRoleUpdate => "GUILD_ROLE_UPDATE",
            Self::GuildRoleDelete => "GUILD_ROLE_DELETE",
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::MessageReactionAdd => "MESSAGE_REACTION_ADD",
            Self::MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::UserUpdate => "USER_UPDATE",
        }
    }

    /// Parse an event type from its wire name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let parsed = match s {
            "READY" => Self::Ready,
            "RESUMED" => Self::Resumed,
            "GUILD_CREATE" => Self::GuildCreate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            "GUILD_DELETE" => Self::GuildDelete,
            "GUILD_ROLE_CREATE" => Self::GuildRoleCreate,
            "GUILD_ROLE_UPDATE" => Self::GuildRoleUpdate,
            "GUILD_ROLE_DELETE" => Self::GuildRoleDelete,
            "CHANNEL_CREATE" => Self::ChannelCreate,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "CHANNEL_DELETE" => Self::ChannelDelete,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "MESSAGE_UPDATE" => Self::MessageUpdate,
            "MESSAGE_DELETE" => Self::MessageDelete,
            "MESSAGE_REACTION_ADD" => Self::MessageReactionAdd,
            "MESSAGE_REACTION_REMOVE" => Self::MessageReactionRemove,
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd,
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate,
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            "TYPING_START" => Self::TypingStart,
            "USER_UPDATE" => Self::UserUpdate,
            _ => return None,
        };
        Some(parsed)
    }

    /// The cached entity this event creates, changes or removes
    #[must_use]
    pub const fn entity(self) -> Option<EntityKind> {
        match self {
            Self::GuildCreate | Self::GuildUpdate | Self::GuildDelete => Some(EntityKind::Guild),
            Self::GuildRoleCreate | Self::GuildRoleUpdate | Self::GuildRoleDelete => {
                Some(EntityKind::Role)
            }
            Self::ChannelCreate | Self::ChannelUpdate | Self::ChannelDelete => {
                Some(EntityKind::Channel)
            }
            Self::MessageCreate | Self::MessageUpdate | Self::MessageDelete => {
                Some(EntityKind::Message)
            }
            Self::GuildMemberAdd | Self::GuildMemberUpdate | Self::GuildMemberRemove => {
                Some(EntityKind::Member)
            }
            Self::UserUpdate => Some(EntityKind::User),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_update(self) -> bool {
        matches!(
            self,
            Self::GuildUpdate
                | Self::GuildRoleUpdate
                | Self::ChannelUpdate
                | Self::MessageUpdate
                | Self::GuildMemberUpdate
                | Self::UserUpdate
        )
    }

    /// The entity is gone on the server side
    #[must_use]
    pub const fn is_delete(self) -> bool {
        matches!(
            self,
            Self::GuildDelete
                | Self::GuildRoleDelete
                | Self::ChannelDelete
                | Self::MessageDelete
                | Self::GuildMemberRemove
        )
    }
}

impl fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<GatewayEventType> for String {
    fn from(event: GatewayEventType) -> Self {
        event.as_str().to_string()
    }
}
