use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::RwLock;

use super::{ClassroomRecord, ClassroomStore};
use crate::error::{Result, RoomError};

/// Classroom records held in process, for tests and local runs
pub struct MemoryClassroomStore {
    classrooms: Arc<RwLock<HashMap<String, ClassroomRecord>>>,
}

impl MemoryClassroomStore {
    pub fn new() -> Self {
        Self {
            classrooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_classrooms(records: impl IntoIterator<Item = ClassroomRecord>) -> Self {
        let classrooms = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            classrooms: Arc::new(RwLock::new(classrooms)),
        }
    }

    /// Loads a JSON array of classroom records
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RoomError::InvalidConfiguration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let records: Vec<ClassroomRecord> = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            count = records.len(),
            "Seeded in-memory classroom store"
        );
        Ok(Self::with_classrooms(records))
    }

    pub async fn insert(&self, record: ClassroomRecord) {
        let mut classrooms = self.classrooms.write().await;
        classrooms.insert(record.id.clone(), record);
    }

    pub async fn get(&self, classroom_id: &str) -> Option<ClassroomRecord> {
        let classrooms = self.classrooms.read().await;
        classrooms.get(classroom_id).cloned()
    }
}

impl Default for MemoryClassroomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassroomStore for MemoryClassroomStore {
    fn load<'a>(&'a self, classroom_id: &'a str) -> BoxFuture<'a, Result<Option<ClassroomRecord>>> {
        async move { Ok(self.get(classroom_id).await) }.boxed()
    }

    fn set_live<'a>(
        &'a self,
        classroom_id: &'a str,
        is_active: bool,
        session_end_time: Option<u64>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut classrooms = self.classrooms.write().await;
            let record = classrooms
                .get_mut(classroom_id)
                .ok_or_else(|| RoomError::ClassroomNotFound(classroom_id.to_string()))?;
            record.is_active = is_active;
            record.session_end_time = session_end_time;
            Ok(())
        }
        .boxed()
    }
}
