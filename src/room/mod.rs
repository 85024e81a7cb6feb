mod broadcast;
mod coordinator;
mod lifecycle;
mod membership;
pub mod protocol;
mod registry;
mod relay;

pub use broadcast::EventBroadcaster;
pub use coordinator::{RoomCoordinator, RoomSnapshot};
pub use lifecycle::{authorize_join, authorize_owner, JoinDecision, SessionLifecycle, SessionSnapshot};
pub use membership::{paginate, JoinOutcome, MediaState, MembershipTable, Participant, Role, RoomLayout};
pub use protocol::{ClientEvent, ContentEvent, ParticipantView, ServerEvent};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use relay::SignalingRelay;
