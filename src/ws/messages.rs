//! WebSocket wire formats: inbound control frames and the welcome frame.
//!
//! Clients send JSON envelopes of the form
//! `{"type": "...", "content": "...", "to": "...", "groupId": "..."}`.
//! Anything that does not parse as such an envelope (plain text, other JSON
//! shapes, unknown `type`) is kept as a [`InboundMessage::Raw`] frame and
//! broadcast verbatim.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::{GroupId, SessionId};
use crate::error::FrameError;

/// Client-originated intent, decoded from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Deliver `content` to every session.
    Broadcast(Bytes),
    /// Deliver `content` to one session.
    Direct {
        /// Recipient session.
        to: SessionId,
        /// Frame to deliver.
        content: Bytes,
    },
    /// Deliver `content` to every member of a group.
    Group {
        /// Target group.
        group: GroupId,
        /// Frame to deliver.
        content: Bytes,
    },
    /// Join a group.
    JoinGroup(GroupId),
    /// Leave a group.
    LeaveGroup(GroupId),
    /// Untyped or unparseable frame; broadcast as-is.
    Raw(Bytes),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FrameKind {
    Broadcast,
    Direct,
    Group,
    JoinGroup,
    LeaveGroup,
}

#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind: FrameKind,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default, rename = "groupId")]
    group_id: Option<String>,
}

impl InboundMessage {
    /// Decodes one client frame.
    ///
    /// Frames that are not a recognised control envelope decode to
    /// [`InboundMessage::Raw`]; decoding never fails for them.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] when a recognised envelope lacks the
    /// address its type requires.
    pub fn decode(frame: Bytes) -> Result<Self, FrameError> {
        let Ok(control) = serde_json::from_slice::<ControlFrame>(&frame) else {
            return Ok(Self::Raw(frame));
        };
        let content = Bytes::from(control.content.unwrap_or_default());
        match control.kind {
            FrameKind::Broadcast => Ok(Self::Broadcast(content)),
            FrameKind::Direct => {
                let to = control
                    .to
                    .filter(|to| !to.trim().is_empty())
                    .ok_or(FrameError::MissingRecipient)?;
                let to = to
                    .parse::<SessionId>()
                    .map_err(|_| FrameError::InvalidRecipient(to))?;
                Ok(Self::Direct { to, content })
            }
            FrameKind::Group => Ok(Self::Group {
                group: group_of(control.group_id, "group")?,
                content,
            }),
            FrameKind::JoinGroup => Ok(Self::JoinGroup(group_of(control.group_id, "join_group")?)),
            FrameKind::LeaveGroup => {
                Ok(Self::LeaveGroup(group_of(control.group_id, "leave_group")?))
            }
        }
    }
}

fn group_of(group_id: Option<String>, kind: &'static str) -> Result<GroupId, FrameError> {
    group_id
        .and_then(GroupId::new)
        .ok_or(FrameError::MissingGroup(kind))
}

/// First frame sent to every session, telling the client its own address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WelcomeMessage {
    /// Always `"welcome"`.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// The session's id, usable as the `to` of direct messages.
    pub client_id: SessionId,
    /// Human-readable greeting.
    pub message: String,
}

impl WelcomeMessage {
    /// Builds the welcome message for `id`.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            msg_type: "welcome".to_string(),
            client_id: id,
            message: "Connected successfully".to_string(),
        }
    }

    /// Serializes the message into a wire frame.
    #[must_use]
    pub fn to_frame(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}
