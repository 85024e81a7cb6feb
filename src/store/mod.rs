//! Access to the persisted classroom record.
//!
//! The coordinator only needs the owner, the enrolled students and the
//! liveness flag. Everything else about a classroom belongs to the CRUD
//! service.

mod http;
mod memory;

pub use http::HttpClassroomStore;
pub use memory::MemoryClassroomStore;

use std::sync::Arc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, RoomError};
use crate::room::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRecord {
    pub id: String,
    pub teacher_id: String,
    #[serde(default)]
    pub student_ids: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
    /// Unix milliseconds at which a timed session ends
    #[serde(default)]
    pub session_end_time: Option<u64>,
}

impl ClassroomRecord {
    /// Role derived from the record, never from what the client claims
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if self.teacher_id == user_id {
            Some(Role::Presenter)
        } else if self.student_ids.iter().any(|id| id == user_id) {
            Some(Role::Attendee)
        } else {
            None
        }
    }
}

pub trait ClassroomStore: Send + Sync {
    fn load<'a>(&'a self, classroom_id: &'a str) -> BoxFuture<'a, Result<Option<ClassroomRecord>>>;

    fn set_live<'a>(
        &'a self,
        classroom_id: &'a str,
        is_active: bool,
        session_end_time: Option<u64>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Builds the store selected by configuration
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn ClassroomStore>> {
    match config.backend {
        StoreBackend::Memory => {
            let store = match &config.seed_file {
                Some(path) => MemoryClassroomStore::from_seed_file(path)?,
                None => MemoryClassroomStore::new(),
            };
            Ok(Arc::new(store))
        }
        StoreBackend::Http => {
            let base_url = config.api_url.as_deref().ok_or_else(|| {
                RoomError::InvalidConfiguration(
                    "CLASSROOM_API_URL is required for the http store".to_string(),
                )
            })?;
            Ok(Arc::new(HttpClassroomStore::new(base_url, config.timeout)?))
        }
    }
}
