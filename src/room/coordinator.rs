use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use warp::ws::Message;

use super::broadcast::EventBroadcaster;
use super::lifecycle::{authorize_join, authorize_owner, SessionLifecycle};
use super::membership::{JoinOutcome, MediaState, MembershipTable, Participant};
use super::protocol::{
    ChatMessage, ClassStatus, ClientEvent, ContentEvent, DashboardRef, Departure, ErrorPayload,
    JoinRoom, MediaUpdate, ParticipantView, ReturningSignal, RoomUser, SendingSignal, ServerEvent,
    StartClass, ToggleMedia,
};
use super::registry::{ConnectionId, ConnectionRegistry};
use super::relay::SignalingRelay;
use crate::error::{Result, RoomError};
use crate::store::{ClassroomRecord, ClassroomStore};

/// Authoritative room state exposed over HTTP
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub is_live: bool,
    pub started_by: Option<String>,
    pub scheduled_end_at: Option<u64>,
    pub member_count: usize,
    /// Connections watching the classroom dashboard
    pub dashboard_subscribers: usize,
    pub stage: Option<ParticipantView>,
    pub pages: Vec<Vec<ParticipantView>>,
}

/// Owns every piece of live room state and applies client events to it.
///
/// Events from one connection are handled in order by its socket task.
/// Events for the same room that depend on liveness go through the room's
/// gate, so authorization, persistence and membership changes never
/// interleave. Table locks are never held across store I/O.
pub struct RoomCoordinator {
    registry: Arc<ConnectionRegistry>,
    membership: MembershipTable,
    lifecycle: SessionLifecycle,
    broadcaster: EventBroadcaster,
    relay: SignalingRelay,
    store: Arc<dyn ClassroomStore>,
    page_size: usize,
}

impl RoomCoordinator {
    pub fn new(store: Arc<dyn ClassroomStore>, page_size: usize) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());

        Arc::new(Self {
            membership: MembershipTable::new(),
            lifecycle: SessionLifecycle::new(),
            broadcaster: EventBroadcaster::new(registry.clone()),
            relay: SignalingRelay::new(registry.clone()),
            registry,
            store,
            page_size: page_size.max(1),
        })
    }

    /// Registers a new transport and returns its connection id
    pub async fn connect(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let connection_id = self.registry.register(sender).await;
        tracing::info!(connection_id = %connection_id, "Client connected");
        connection_id
    }

    /// Lifecycle hook for a closed transport. Safe to call more than once.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(rooms) = self.registry.unregister(connection_id).await else {
            return;
        };

        self.broadcaster.drop_connection(connection_id).await;

        for (room_id, user_id) in rooms {
            self.remove_participant(&room_id, &user_id, connection_id).await;
        }

        tracing::info!(connection_id = %connection_id, "Client disconnected");
    }

    /// Parses and applies one text frame
    pub async fn handle_text(self: &Arc<Self>, connection_id: &str, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(connection_id, event).await,
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse client event"
                );
                self.report(connection_id, &RoomError::invalid_payload(e.to_string()))
                    .await;
            }
        }
    }

    /// Applies one client event. Failures are reported to the sender only.
    pub async fn handle_event(self: &Arc<Self>, connection_id: &str, event: ClientEvent) {
        let name = event.name();
        tracing::debug!(connection_id = %connection_id, event = %name, "Handling client event");

        let result = match event {
            ClientEvent::JoinRoom(req) => self.join_room(connection_id, req).await,
            ClientEvent::LeaveRoom(req) => self.leave_room(connection_id, req).await,
            ClientEvent::StartClass(req) => self.start_class(connection_id, req).await,
            ClientEvent::EndClass(req) => self.end_class(connection_id, req).await,
            ClientEvent::RaiseHand(req) => self.set_hand(connection_id, req, true).await,
            ClientEvent::LowerHand(req) => self.set_hand(connection_id, req, false).await,
            ClientEvent::ToggleMedia(req) => self.toggle_media(connection_id, req).await,
            ClientEvent::SendMessage(msg) => self.send_message(connection_id, msg).await,
            ClientEvent::SendingSignal(req) => self.sending_signal(connection_id, req).await,
            ClientEvent::ReturningSignal(req) => self.returning_signal(connection_id, req).await,
            ClientEvent::JoinClassroomDashboard(req) => self.join_dashboard(connection_id, req).await,
            ClientEvent::LeaveClassroomDashboard(req) => {
                self.broadcaster
                    .unsubscribe_dashboard(&req.room_id, connection_id)
                    .await;
                Ok(())
            }
        };

        if let Err(e) = result {
            if e.is_server_error() {
                tracing::error!(
                    connection_id = %connection_id,
                    event = %name,
                    error = %e,
                    "Event handler failed"
                );
            } else {
                tracing::warn!(
                    connection_id = %connection_id,
                    event = %name,
                    error = %e,
                    "Event rejected"
                );
            }
            self.report(connection_id, &e).await;
        }
    }

    async fn report(&self, connection_id: &str, err: &RoomError) {
        let event = ServerEvent::Error(ErrorPayload {
            code: err.code().to_string(),
            message: err.client_message(),
        });
        self.broadcaster.to_connection(connection_id, &event).await;
    }

    async fn load_classroom(&self, room_id: &str) -> Result<ClassroomRecord> {
        self.store
            .load(room_id)
            .await?
            .ok_or_else(|| RoomError::ClassroomNotFound(room_id.to_string()))
    }

    /// Gate of a classroom known to the store. Callers re-load the record
    /// once the gate is held.
    async fn existing_gate(&self, room_id: &str) -> Result<Arc<Mutex<()>>> {
        self.load_classroom(room_id).await?;
        Ok(self.lifecycle.gate(room_id).await)
    }

    /// A connection joined to the room may only act as the identity it joined with
    async fn authorize_bound_owner(
        &self,
        record: &ClassroomRecord,
        room_id: &str,
        connection_id: &str,
    ) -> Result<()> {
        match self.registry.bound_user(connection_id, room_id).await {
            Some(actor) => authorize_owner(record, &actor),
            None => Ok(()),
        }
    }

    async fn acting_user(&self, connection_id: &str, room_id: &str) -> Result<String> {
        self.registry
            .bound_user(connection_id, room_id)
            .await
            .ok_or_else(|| RoomError::NotInRoom(room_id.to_string()))
    }

    async fn join_room(&self, connection_id: &str, req: JoinRoom) -> Result<()> {
        require(&req.room_id, "roomId")?;
        require(&req.user_id, "userId")?;
        let room_id = req.room_id.as_str();

        let gate = self.existing_gate(room_id).await?;
        let _guard = gate.lock().await;

        let record = self.load_classroom(room_id).await?;
        let decision = authorize_join(&record, &req.user_id)?;
        if decision.goes_live {
            self.go_live(room_id, &req.user_id, None).await?;
        }

        let display_name = if req.name.trim().is_empty() {
            req.user_id.clone()
        } else {
            req.name.clone()
        };
        let participant = Participant::new(
            &req.user_id,
            display_name,
            decision.role,
            connection_id,
            MediaState {
                is_muted: req.is_muted,
                is_video_off: req.is_video_off,
            },
        );
        let view = ParticipantView::from(&participant);

        // Same connection switching identity in this room: drop the old identity first
        if let Some(previous) = self.registry.bind(connection_id, room_id, &req.user_id).await {
            self.remove_participant(room_id, &previous, connection_id).await;
        }

        let outcome = self.membership.join(room_id, participant).await;

        let snapshot = ServerEvent::AllUsers(outcome.others().iter().map(ParticipantView::from).collect());
        self.broadcaster.to_connection(connection_id, &snapshot).await;

        match outcome {
            JoinOutcome::Duplicate { .. } => {}
            JoinOutcome::Joined { others } => {
                let targets: Vec<&str> = others.iter().map(|p| p.connection_id.as_str()).collect();
                self.broadcaster
                    .to_connections(targets, &ServerEvent::UserConnected(view))
                    .await;
            }
            JoinOutcome::Rejoined { others, replaced } => {
                self.registry
                    .unbind(&replaced.connection_id, room_id, &replaced.user_id)
                    .await;

                // Peers are keyed by connection: retire the stale one, announce the new one once
                let targets: Vec<&str> = others.iter().map(|p| p.connection_id.as_str()).collect();
                let departure = ServerEvent::UserDisconnected(Departure {
                    user_id: replaced.user_id.clone(),
                    socket_id: replaced.connection_id.clone(),
                });
                self.broadcaster.to_connections(targets.iter(), &departure).await;
                self.broadcaster
                    .to_connections(targets.iter(), &ServerEvent::UserConnected(view))
                    .await;
            }
        }

        Ok(())
    }

    async fn leave_room(&self, connection_id: &str, req: RoomUser) -> Result<()> {
        require(&req.room_id, "roomId")?;
        require(&req.user_id, "userId")?;

        if self
            .remove_participant(&req.room_id, &req.user_id, connection_id)
            .await
        {
            self.registry
                .unbind(connection_id, &req.room_id, &req.user_id)
                .await;
        }
        Ok(())
    }

    /// Removes the participant if `connection_id` still owns the entry and
    /// tells the remaining members. Returns whether anything was removed.
    async fn remove_participant(&self, room_id: &str, user_id: &str, connection_id: &str) -> bool {
        let Some(removed) = self.membership.leave(room_id, user_id, connection_id).await else {
            return false;
        };

        let remaining = self.membership.connection_ids(room_id).await;
        let event = ServerEvent::UserDisconnected(Departure {
            user_id: removed.user_id,
            socket_id: removed.connection_id,
        });
        self.broadcaster.to_connections(remaining, &event).await;
        true
    }

    async fn start_class(self: &Arc<Self>, connection_id: &str, req: StartClass) -> Result<()> {
        require(&req.room_id, "roomId")?;
        require(&req.user_id, "userId")?;
        let room_id = req.room_id.as_str();

        let gate = self.existing_gate(room_id).await?;
        let _guard = gate.lock().await;

        let record = self.load_classroom(room_id).await?;
        authorize_owner(&record, &req.user_id)?;
        self.authorize_bound_owner(&record, room_id, connection_id).await?;

        let minutes = req.duration.unwrap_or(0);
        let session_end_time =
            (minutes > 0).then(|| now_millis().saturating_add(minutes.saturating_mul(60_000)));

        if record.is_active && session_end_time.is_none() {
            self.announce_live(room_id, &req.user_id, None).await;
        } else {
            self.go_live(room_id, &req.user_id, session_end_time).await?;
        }

        if minutes > 0 {
            self.schedule_auto_end(room_id, Duration::from_secs(minutes.saturating_mul(60)))
                .await;
        }

        tracing::info!(
            room_id = %room_id,
            connection_id = %connection_id,
            duration_minutes = minutes,
            "Class started"
        );
        Ok(())
    }

    async fn end_class(&self, connection_id: &str, req: RoomUser) -> Result<()> {
        require(&req.room_id, "roomId")?;
        require(&req.user_id, "userId")?;
        let room_id = req.room_id.as_str();

        let gate = self.existing_gate(room_id).await?;
        let _guard = gate.lock().await;

        let record = self.load_classroom(room_id).await?;
        authorize_owner(&record, &req.user_id)?;
        self.authorize_bound_owner(&record, room_id, connection_id).await?;

        let cached_live = self.lifecycle.snapshot(room_id).await.is_live;
        if !record.is_active && !cached_live && self.membership.member_count(room_id).await == 0 {
            tracing::debug!(room_id = %room_id, "End requested for a class that is not live");
            return Ok(());
        }

        self.end_session(room_id).await
    }

    /// Persists, then announces. A failed write leaves the room as it was.
    async fn go_live(&self, room_id: &str, started_by: &str, session_end_time: Option<u64>) -> Result<()> {
        self.store.set_live(room_id, true, session_end_time).await?;
        self.announce_live(room_id, started_by, session_end_time).await;
        Ok(())
    }

    async fn announce_live(&self, room_id: &str, started_by: &str, session_end_time: Option<u64>) {
        self.lifecycle
            .mark_live(room_id, started_by, session_end_time)
            .await;
        self.broadcaster
            .to_dashboard(room_id, &ServerEvent::ClassStatusChanged(ClassStatus { is_active: true }))
            .await;
    }

    /// Live -> Offline. Caller must hold the room gate.
    async fn end_session(&self, room_id: &str) -> Result<()> {
        self.store.set_live(room_id, false, None).await?;
        self.lifecycle.mark_offline(room_id).await;

        let members = self.membership.clear_room(room_id).await;
        for p in &members {
            self.registry.unbind(&p.connection_id, room_id, &p.user_id).await;
        }

        let notified = self
            .broadcaster
            .to_connections(
                members.iter().map(|p| p.connection_id.as_str()),
                &ServerEvent::ClassEnded,
            )
            .await;
        self.broadcaster
            .to_dashboard(room_id, &ServerEvent::ClassStatusChanged(ClassStatus { is_active: false }))
            .await;

        tracing::info!(room_id = %room_id, notified = notified, "Class ended");
        Ok(())
    }

    /// Arms the auto-end timer, replacing any earlier one for the room
    pub async fn schedule_auto_end(self: &Arc<Self>, room_id: &str, after: Duration) {
        let generation = self.lifecycle.next_generation(room_id).await;
        let coordinator = Arc::downgrade(self);
        let room = room_id.to_string();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.auto_end(&room, generation).await;
            }
        });

        self.lifecycle.attach_timer(room_id, generation, timer).await;
        tracing::debug!(room_id = %room_id, after_secs = after.as_secs(), "Auto-end armed");
    }

    async fn auto_end(&self, room_id: &str, generation: u64) {
        let gate = self.lifecycle.gate(room_id).await;
        let _guard = gate.lock().await;

        if !self.lifecycle.is_current(room_id, generation).await {
            tracing::debug!(room_id = %room_id, "Auto-end timer superseded");
            return;
        }
        self.lifecycle.release_timer(room_id).await;

        let record = match self.load_classroom(room_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(room_id = %room_id, error = %e, "Auto-end could not load classroom");
                return;
            }
        };
        if !record.is_active {
            tracing::debug!(room_id = %room_id, "Auto-end found class already offline");
            return;
        }

        tracing::info!(room_id = %room_id, "Auto-ending class");
        if let Err(e) = self.end_session(room_id).await {
            tracing::error!(room_id = %room_id, error = %e, "Auto-end failed");
        }
    }

    async fn set_hand(&self, connection_id: &str, req: RoomUser, raised: bool) -> Result<()> {
        require(&req.room_id, "roomId")?;
        require(&req.user_id, "userId")?;
        let room_id = req.room_id.as_str();

        let actor = self.acting_user(connection_id, room_id).await?;
        if !raised && actor != req.user_id {
            let record = self.load_classroom(room_id).await?;
            authorize_owner(&record, &actor)?;
        }

        let changed = self
            .membership
            .set_hand_raised(room_id, &actor, &req.user_id, raised)
            .await?;
        if !changed {
            return Ok(());
        }

        let event = if raised {
            ServerEvent::UserRaisedHand(req.user_id)
        } else {
            ServerEvent::UserLoweredHand(req.user_id)
        };
        let members = self.membership.connection_ids(room_id).await;
        self.broadcaster.to_connections(members, &event).await;
        Ok(())
    }

    async fn toggle_media(&self, connection_id: &str, req: ToggleMedia) -> Result<()> {
        require(&req.room_id, "roomId")?;
        let room_id = req.room_id.as_str();

        let actor = self.acting_user(connection_id, room_id).await?;
        if actor != req.user_id {
            return Err(RoomError::Forbidden(actor));
        }

        let media = MediaState {
            is_muted: req.is_muted,
            is_video_off: req.is_video_off,
        };
        self.membership
            .update_media(room_id, &actor, media)
            .await
            .ok_or_else(|| RoomError::NotInRoom(room_id.to_string()))?;

        let event = ServerEvent::UserToggledMedia(MediaUpdate {
            user_id: actor,
            is_video_off: req.is_video_off,
            is_muted: req.is_muted,
        });
        let members = self.membership.connection_ids(room_id).await;
        self.broadcaster
            .to_connections_except(members, connection_id, &event)
            .await;
        Ok(())
    }

    async fn send_message(&self, connection_id: &str, msg: ChatMessage) -> Result<()> {
        require(&msg.room_id, "roomId")?;
        require(&msg.text, "text")?;
        self.acting_user(connection_id, &msg.room_id).await?;

        let members = self.membership.connection_ids(&msg.room_id).await;
        self.broadcaster
            .to_connections(members, &ServerEvent::ReceiveMessage(msg))
            .await;
        Ok(())
    }

    async fn sending_signal(&self, connection_id: &str, req: SendingSignal) -> Result<()> {
        require(&req.user_to_signal, "userToSignal")?;
        if let Some(claimed) = req.caller_id.as_deref() {
            if claimed != connection_id {
                tracing::debug!(
                    connection_id = %connection_id,
                    claimed = %claimed,
                    "Ignoring client-supplied caller id"
                );
            }
        }
        self.relay
            .relay_offer(connection_id, &req.user_to_signal, req.signal)
            .await;
        Ok(())
    }

    async fn returning_signal(&self, connection_id: &str, req: ReturningSignal) -> Result<()> {
        require(&req.caller_id, "callerID")?;
        self.relay
            .relay_answer(connection_id, &req.caller_id, req.signal)
            .await;
        Ok(())
    }

    async fn join_dashboard(&self, connection_id: &str, req: DashboardRef) -> Result<()> {
        require(&req.room_id, "roomId")?;
        self.broadcaster
            .subscribe_dashboard(&req.room_id, connection_id)
            .await;
        Ok(())
    }

    /// Fans a content notification out to the classroom's dashboard.
    /// Returns the number of subscribers reached.
    pub async fn publish_content(&self, classroom_id: &str, event: ContentEvent) -> usize {
        let delivered = self
            .broadcaster
            .to_dashboard(classroom_id, &ServerEvent::from(event))
            .await;
        tracing::debug!(classroom_id = %classroom_id, delivered = delivered, "Published content event");
        delivered
    }

    pub async fn room_snapshot(&self, room_id: &str, page_size: Option<usize>) -> RoomSnapshot {
        let session = self.lifecycle.snapshot(room_id).await;
        let layout = self
            .membership
            .layout(room_id, page_size.unwrap_or(self.page_size))
            .await;
        let member_count =
            layout.stage.iter().count() + layout.pages.iter().map(Vec::len).sum::<usize>();

        RoomSnapshot {
            room_id: room_id.to_string(),
            is_live: session.is_live,
            started_by: session.started_by,
            scheduled_end_at: session.scheduled_end_at,
            member_count,
            dashboard_subscribers: self.broadcaster.dashboard_subscribers(room_id).await,
            stage: layout.stage.as_ref().map(ParticipantView::from),
            pages: layout
                .pages
                .iter()
                .map(|page| page.iter().map(ParticipantView::from).collect())
                .collect(),
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(RoomError::invalid_payload(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
