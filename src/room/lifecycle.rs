//! Offline -> Live -> Offline session state per room.
//!
//! Authorization always works from a freshly loaded [`ClassroomRecord`]; the
//! cached state kept here only tracks timers and what the HTTP snapshot shows.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::membership::Role;
use crate::error::{Result, RoomError};
use crate::store::ClassroomRecord;

/// What a join request is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinDecision {
    pub role: Role,
    /// The joiner is the owner and the class is offline
    pub goes_live: bool,
}

pub fn authorize_join(record: &ClassroomRecord, user_id: &str) -> Result<JoinDecision> {
    let role = record.role_of(user_id).ok_or_else(|| RoomError::NotAMember {
        room_id: record.id.clone(),
        user_id: user_id.to_string(),
    })?;

    match role {
        Role::Presenter => Ok(JoinDecision {
            role,
            goes_live: !record.is_active,
        }),
        Role::Attendee if record.is_active => Ok(JoinDecision {
            role,
            goes_live: false,
        }),
        Role::Attendee => Err(RoomError::ClassNotLive(record.id.clone())),
    }
}

/// Start, end and forced hand-lower are reserved to the classroom owner
pub fn authorize_owner(record: &ClassroomRecord, user_id: &str) -> Result<()> {
    if record.teacher_id == user_id {
        Ok(())
    } else {
        Err(RoomError::NotOwner(user_id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub is_live: bool,
    pub started_by: Option<String>,
    pub scheduled_end_at: Option<u64>,
}

#[derive(Default)]
struct SessionState {
    is_live: bool,
    started_by: Option<String>,
    scheduled_end_at: Option<u64>,
    /// Bumped whenever a timer is armed or the session ends
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct SessionLifecycle {
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
    gates: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            gates: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Per-room mutex serializing authorization, persistence and membership
    /// changes that depend on liveness. Other rooms are unaffected.
    pub async fn gate(&self, room_id: &str) -> Arc<Mutex<()>> {
        {
            let gates = self.gates.read().await;
            if let Some(gate) = gates.get(room_id) {
                return gate.clone();
            }
        }
        let mut gates = self.gates.write().await;
        gates
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub(crate) async fn gate_count(&self) -> usize {
        self.gates.read().await.len()
    }

    pub async fn mark_live(&self, room_id: &str, started_by: &str, scheduled_end_at: Option<u64>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(room_id.to_string()).or_default();
        session.is_live = true;
        session.started_by = Some(started_by.to_string());
        if scheduled_end_at.is_some() {
            session.scheduled_end_at = scheduled_end_at;
        }
        tracing::info!(room_id = %room_id, started_by = %started_by, "Class is live");
    }

    /// Ends the cached session and cancels any pending auto-end timer
    pub async fn mark_offline(&self, room_id: &str) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(room_id.to_string()).or_default();
        session.is_live = false;
        session.started_by = None;
        session.scheduled_end_at = None;
        session.generation += 1;
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }
        tracing::info!(room_id = %room_id, "Class is offline");
    }

    /// Invalidates any armed timer and returns the generation a new one must carry
    pub async fn next_generation(&self, room_id: &str) -> u64 {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(room_id.to_string()).or_default();
        session.generation += 1;
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }
        session.generation
    }

    /// Stores the timer task; it is aborted right away if it is already stale
    pub async fn attach_timer(&self, room_id: &str, generation: u64, timer: JoinHandle<()>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(room_id.to_string()).or_default();
        if session.generation == generation {
            session.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// Detaches the timer handle without aborting it. A firing timer calls
    /// this before ending the session so that ending does not cancel itself.
    pub async fn release_timer(&self, room_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(room_id) {
            session.timer = None;
        }
    }

    pub async fn is_current(&self, room_id: &str, generation: u64) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(room_id)
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }

    pub async fn snapshot(&self, room_id: &str) -> SessionSnapshot {
        let sessions = self.sessions.read().await;
        match sessions.get(room_id) {
            Some(s) => SessionSnapshot {
                is_live: s.is_live,
                started_by: s.started_by.clone(),
                scheduled_end_at: s.scheduled_end_at,
            },
            None => SessionSnapshot {
                is_live: false,
                started_by: None,
                scheduled_end_at: None,
            },
        }
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn classroom(is_active: bool) -> ClassroomRecord {
        ClassroomRecord {
            id: "room-1".to_string(),
            teacher_id: "teacher".to_string(),
            student_ids: vec!["s1".to_string(), "s2".to_string()],
            is_active,
            session_end_time: None,
        }
    }

    #[test]
    fn test_owner_join_takes_room_live() {
        let decision = authorize_join(&classroom(false), "teacher").unwrap();
        assert_eq!(decision, JoinDecision { role: Role::Presenter, goes_live: true });

        let decision = authorize_join(&classroom(true), "teacher").unwrap();
        assert!(!decision.goes_live);
    }

    #[test]
    fn test_attendee_join_requires_live_class() {
        let err = authorize_join(&classroom(false), "s1").unwrap_err();
        assert!(matches!(err, RoomError::ClassNotLive(_)));

        let decision = authorize_join(&classroom(true), "s1").unwrap();
        assert_eq!(decision, JoinDecision { role: Role::Attendee, goes_live: false });
    }

    #[test]
    fn test_stranger_is_rejected() {
        let err = authorize_join(&classroom(true), "intruder").unwrap_err();
        assert!(matches!(err, RoomError::NotAMember { .. }));
    }

    #[test]
    fn test_only_owner_passes_owner_check() {
        assert!(authorize_owner(&classroom(true), "teacher").is_ok());
        assert!(matches!(
            authorize_owner(&classroom(true), "s1"),
            Err(RoomError::NotOwner(_))
        ));
    }

    #[tokio::test]
    async fn test_gate_is_shared_per_room() {
        let lifecycle = SessionLifecycle::new();
        let a1 = lifecycle.gate("a").await;
        let a2 = lifecycle.gate("a").await;
        let b = lifecycle.gate("b").await;

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        let _held = a1.lock().await;
        assert!(a2.try_lock().is_err());
        assert!(b.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_offline_invalidates_generation_and_aborts_timer() {
        let lifecycle = SessionLifecycle::new();
        lifecycle.mark_live("a", "teacher", Some(42)).await;

        let generation = lifecycle.next_generation("a").await;
        let timer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        lifecycle.attach_timer("a", generation, timer).await;
        assert!(lifecycle.is_current("a", generation).await);

        lifecycle.mark_offline("a").await;
        assert!(!lifecycle.is_current("a", generation).await);

        let snapshot = lifecycle.snapshot("a").await;
        assert!(!snapshot.is_live);
        assert_eq!(snapshot.scheduled_end_at, None);
    }

    #[tokio::test]
    async fn test_stale_timer_is_aborted_on_attach() {
        let lifecycle = SessionLifecycle::new();
        let stale = lifecycle.next_generation("a").await;
        lifecycle.next_generation("a").await;

        let timer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let handle = timer.abort_handle();
        lifecycle.attach_timer("a", stale, timer).await;

        let finished = tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(finished.is_ok());
    }
}
