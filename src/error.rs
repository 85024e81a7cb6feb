use thiserror::Error;

/// Errors raised while coordinating live classroom rooms
#[derive(Debug, Error)]
pub enum RoomError {
    /// Authorization errors
    #[error("Classroom {0} not found")]
    ClassroomNotFound(String),

    #[error("User {user_id} is not a member of classroom {room_id}")]
    NotAMember { room_id: String, user_id: String },

    #[error("Class {0} is not live yet")]
    ClassNotLive(String),

    #[error("User {0} does not own this classroom")]
    NotOwner(String),

    #[error("User {0} is not allowed to perform this action")]
    Forbidden(String),

    /// Membership errors
    #[error("Connection has not joined room {0}")]
    NotInRoom(String),

    #[error("Participant {0} is not in the room")]
    ParticipantNotFound(String),

    /// Payload errors
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Persistence errors
    #[error("Classroom store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Convenience type alias for Results using RoomError
pub type Result<T> = std::result::Result<T, RoomError>;

impl RoomError {
    pub fn store(msg: impl Into<String>) -> Self {
        RoomError::Store(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        RoomError::InvalidPayload(msg.into())
    }

    /// Stable code sent to clients in `error` events
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::ClassroomNotFound(_) => "classroom-not-found",
            RoomError::NotAMember { .. } => "not-a-member",
            RoomError::ClassNotLive(_) => "class-not-live",
            RoomError::NotOwner(_) => "not-owner",
            RoomError::Forbidden(_) => "forbidden",
            RoomError::NotInRoom(_) => "not-in-room",
            RoomError::ParticipantNotFound(_) => "participant-not-found",
            RoomError::InvalidPayload(_) => "invalid-payload",
            RoomError::SerializationFailed(_)
            | RoomError::Store(_)
            | RoomError::InvalidConfiguration(_) => "server-error",
        }
    }

    /// Message safe to show to the requesting client.
    /// Server-side failures are reported generically and only logged in full.
    pub fn client_message(&self) -> String {
        match self.code() {
            "server-error" => "Server error, please try again".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the failure originated on the server rather than in the request
    pub fn is_server_error(&self) -> bool {
        self.code() == "server-error"
    }
}

impl From<reqwest::Error> for RoomError {
    fn from(err: reqwest::Error) -> Self {
        RoomError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RoomError::ClassNotLive("room-1".to_string());
        assert_eq!(err.to_string(), "Class room-1 is not live yet");
    }

    #[test]
    fn test_error_helpers() {
        let err = RoomError::invalid_payload("roomId is required");
        assert!(matches!(err, RoomError::InvalidPayload(_)));

        let err = RoomError::store("write refused");
        assert!(matches!(err, RoomError::Store(_)));
    }

    #[test]
    fn test_store_errors_are_reported_generically() {
        let err = RoomError::store("connection refused by 10.0.0.4:27017");
        assert_eq!(err.code(), "server-error");
        assert!(err.is_server_error());
        assert!(!err.client_message().contains("10.0.0.4"));
    }

    #[test]
    fn test_authorization_errors_keep_their_message() {
        let err = RoomError::NotAMember {
            room_id: "room-1".to_string(),
            user_id: "u-9".to_string(),
        };
        assert_eq!(err.code(), "not-a-member");
        assert!(!err.is_server_error());
        assert_eq!(
            err.client_message(),
            "User u-9 is not a member of classroom room-1"
        );
    }
}
