use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoomError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Presenter,
    Attendee,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaState {
    pub is_muted: bool,
    pub is_video_off: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub connection_id: String,
    pub media: MediaState,
    pub hand_raised: bool,
}

impl Participant {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
        connection_id: impl Into<String>,
        media: MediaState,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            role,
            connection_id: connection_id.into(),
            media,
            hand_raised: false,
        }
    }
}

/// Result of a join. `others` never contains the joining user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First entry for this user in the room
    Joined { others: Vec<Participant> },
    /// The user was present under another connection, which was replaced
    Rejoined {
        others: Vec<Participant>,
        replaced: Participant,
    },
    /// Same user on the same connection; nothing changed
    Duplicate { others: Vec<Participant> },
}

impl JoinOutcome {
    pub fn others(&self) -> &[Participant] {
        match self {
            JoinOutcome::Joined { others }
            | JoinOutcome::Rejoined { others, .. }
            | JoinOutcome::Duplicate { others } => others,
        }
    }
}

/// Presenter stage plus fixed-size attendee pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLayout {
    pub stage: Option<Participant>,
    pub pages: Vec<Vec<Participant>>,
}

/// Who is in each room right now.
///
/// Entries are kept in join order; a rejoin moves the user to the end.
pub struct MembershipTable {
    rooms: Arc<RwLock<HashMap<String, Vec<Participant>>>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Adds `participant` to the room, replacing any entry the same user
    /// holds under a different connection.
    pub async fn join(&self, room_id: &str, participant: Participant) -> JoinOutcome {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room_id.to_string()).or_default();

        let existing = members
            .iter()
            .position(|p| p.user_id == participant.user_id);

        let replaced = match existing {
            Some(index) if members[index].connection_id == participant.connection_id => {
                tracing::debug!(
                    room_id = %room_id,
                    user_id = %participant.user_id,
                    "Duplicate join ignored"
                );
                let others = others_of(members, &participant.user_id);
                return JoinOutcome::Duplicate { others };
            }
            Some(index) => Some(members.remove(index)),
            None => None,
        };

        let user_id = participant.user_id.clone();
        members.push(participant);
        let others = others_of(members, &user_id);

        match replaced {
            Some(replaced) => {
                tracing::info!(
                    room_id = %room_id,
                    user_id = %user_id,
                    old_connection = %replaced.connection_id,
                    "Participant rejoined on a new connection"
                );
                JoinOutcome::Rejoined { others, replaced }
            }
            None => {
                tracing::info!(room_id = %room_id, user_id = %user_id, "Participant joined room");
                JoinOutcome::Joined { others }
            }
        }
    }

    /// Removes the user only while `connection_id` is still the one on record,
    /// so a late disconnect from a replaced connection is ignored.
    pub async fn leave(&self, room_id: &str, user_id: &str, connection_id: &str) -> Option<Participant> {
        let mut rooms = self.rooms.write().await;
        let members = rooms.get_mut(room_id)?;

        let index = members
            .iter()
            .position(|p| p.user_id == user_id && p.connection_id == connection_id);

        match index {
            Some(index) => {
                let removed = members.remove(index);
                tracing::info!(room_id = %room_id, user_id = %user_id, "Participant left room");
                Some(removed)
            }
            None => {
                tracing::debug!(
                    room_id = %room_id,
                    user_id = %user_id,
                    connection_id = %connection_id,
                    "Stale leave ignored"
                );
                None
            }
        }
    }

    /// Records the self-reported media state. Last write wins.
    pub async fn update_media(&self, room_id: &str, user_id: &str, media: MediaState) -> Option<Participant> {
        let mut rooms = self.rooms.write().await;
        let participant = rooms
            .get_mut(room_id)?
            .iter_mut()
            .find(|p| p.user_id == user_id)?;

        participant.media = media;
        Some(participant.clone())
    }

    /// Raises or lowers `target_id`'s hand on behalf of `actor_id`.
    ///
    /// Anyone may raise or lower their own hand, a presenter may lower an
    /// attendee's hand, and presenters never hold hand state.
    /// Returns whether the state changed.
    pub async fn set_hand_raised(
        &self,
        room_id: &str,
        actor_id: &str,
        target_id: &str,
        raised: bool,
    ) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        let members = rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::NotInRoom(room_id.to_string()))?;

        let actor_role = members
            .iter()
            .find(|p| p.user_id == actor_id)
            .map(|p| p.role)
            .ok_or_else(|| RoomError::NotInRoom(room_id.to_string()))?;

        let target = members
            .iter_mut()
            .find(|p| p.user_id == target_id)
            .ok_or_else(|| RoomError::ParticipantNotFound(target_id.to_string()))?;

        if target.role == Role::Presenter {
            return Err(RoomError::Forbidden(actor_id.to_string()));
        }

        let acting_on_self = actor_id == target_id;
        let allowed = acting_on_self || (!raised && actor_role == Role::Presenter);
        if !allowed {
            return Err(RoomError::Forbidden(actor_id.to_string()));
        }

        let changed = target.hand_raised != raised;
        target.hand_raised = raised;
        Ok(changed)
    }

    /// Presenter first, then everyone else in join order
    pub async fn list_members(&self, room_id: &str) -> Vec<Participant> {
        let rooms = self.rooms.read().await;
        let mut members = rooms.get(room_id).cloned().unwrap_or_default();
        members.sort_by_key(|p| p.role != Role::Presenter);
        members
    }

    pub async fn layout(&self, room_id: &str, page_size: usize) -> RoomLayout {
        paginate(self.list_members(room_id).await, page_size)
    }

    pub async fn connection_ids(&self, room_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|members| members.iter().map(|p| p.connection_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Drops every participant of the room and returns them
    pub async fn clear_room(&self, room_id: &str) -> Vec<Participant> {
        let mut rooms = self.rooms.write().await;
        rooms.remove(room_id).unwrap_or_default()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(Vec::len).unwrap_or(0)
    }
}

impl Default for MembershipTable {
    fn default() -> Self {
        Self::new()
    }
}

fn others_of(members: &[Participant], user_id: &str) -> Vec<Participant> {
    members
        .iter()
        .filter(|p| p.user_id != user_id)
        .cloned()
        .collect()
}

/// Splits an ordered member list into the presenter stage and attendee pages.
/// An empty room still has one (empty) page.
pub fn paginate(members: Vec<Participant>, page_size: usize) -> RoomLayout {
    let page_size = page_size.max(1);
    let (presenters, attendees): (Vec<_>, Vec<_>) = members
        .into_iter()
        .partition(|p| p.role == Role::Presenter);

    let mut pages: Vec<Vec<Participant>> = attendees
        .chunks(page_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    if pages.is_empty() {
        pages.push(Vec::new());
    }

    RoomLayout {
        stage: presenters.into_iter().next(),
        pages,
    }
}
