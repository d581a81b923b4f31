use shared::domain::RoomId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no current user; set a pseudonym before joining or sending")]
    MissingProfile,
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("not joined to room {0}")]
    NotJoined(RoomId),
}
