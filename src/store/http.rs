use std::time::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{ClassroomRecord, ClassroomStore};
use crate::error::{Result, RoomError};

/// Classroom store backed by the CRUD service's REST API
pub struct HttpClassroomStore {
    client: reqwest::Client,
    base_url: String,
}

/// User references come back either as bare ids or populated documents
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserRef {
    Id(String),
    Populated {
        #[serde(rename = "_id")]
        id: String,
    },
}

impl UserRef {
    fn into_id(self) -> String {
        match self {
            UserRef::Id(id) | UserRef::Populated { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiClassroom {
    #[serde(rename = "_id")]
    id: String,
    teacher_id: UserRef,
    #[serde(default)]
    student_ids: Vec<UserRef>,
    #[serde(default)]
    is_active: bool,
}

impl From<ApiClassroom> for ClassroomRecord {
    fn from(api: ApiClassroom) -> Self {
        Self {
            id: api.id,
            teacher_id: api.teacher_id.into_id(),
            student_ids: api.student_ids.into_iter().map(UserRef::into_id).collect(),
            is_active: api.is_active,
            session_end_time: None,
        }
    }
}

impl HttpClassroomStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RoomError::InvalidConfiguration(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn classroom_url(&self, classroom_id: &str) -> String {
        format!(
            "{}/api/classrooms/{}",
            self.base_url,
            urlencoding::encode(classroom_id)
        )
    }

    async fn fetch(&self, classroom_id: &str) -> Result<Option<ClassroomRecord>> {
        let response = self.client.get(self.classroom_url(classroom_id)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let classroom: ApiClassroom = response.json().await?;
                Ok(Some(classroom.into()))
            }
            status => Err(RoomError::store(format!(
                "loading classroom {} returned {}",
                classroom_id, status
            ))),
        }
    }

    async fn update_session(
        &self,
        classroom_id: &str,
        is_active: bool,
        session_end_time: Option<u64>,
    ) -> Result<()> {
        let url = format!("{}/session", self.classroom_url(classroom_id));
        let response = self
            .client
            .patch(url)
            .json(&json!({
                "isActive": is_active,
                "sessionEndTime": session_end_time,
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(RoomError::ClassroomNotFound(classroom_id.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(RoomError::store(format!(
                "updating session of {} returned {}",
                classroom_id, status
            ))),
        }
    }
}

impl ClassroomStore for HttpClassroomStore {
    fn load<'a>(&'a self, classroom_id: &'a str) -> BoxFuture<'a, Result<Option<ClassroomRecord>>> {
        self.fetch(classroom_id).boxed()
    }

    fn set_live<'a>(
        &'a self,
        classroom_id: &'a str,
        is_active: bool,
        session_end_time: Option<u64>,
    ) -> BoxFuture<'a, Result<()>> {
        self.update_session(classroom_id, is_active, session_end_time)
            .boxed()
    }
}
