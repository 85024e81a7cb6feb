use std::convert::Infallible;
use std::sync::Arc;
use serde::Deserialize;
use warp::http::StatusCode;
use warp::Filter;

use crate::room::{ContentEvent, RoomCoordinator};
use super::websocket;

/// Every HTTP and WebSocket route the server exposes
pub fn routes(
    coordinator: Arc<RoomCoordinator>,
    events_token: Option<String>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    websocket_route(coordinator.clone())
        .or(health_check(coordinator.clone()))
        .or(members_endpoint(coordinator.clone()))
        .or(content_events_endpoint(coordinator, events_token))
}

pub fn websocket_route(
    coordinator: Arc<RoomCoordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_coordinator(coordinator))
        .map(|ws: warp::ws::Ws, coordinator: Arc<RoomCoordinator>| {
            ws.on_upgrade(move |socket| websocket::handle_websocket(socket, coordinator))
        })
}

pub fn health_check(
    coordinator: Arc<RoomCoordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_coordinator(coordinator))
        .and_then(|coordinator: Arc<RoomCoordinator>| async move {
            Ok::<_, warp::Rejection>(warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Classroom Live",
                "version": env!("CARGO_PKG_VERSION"),
                "connections": coordinator.connection_count().await
            })))
        })
}

#[derive(Debug, Deserialize)]
pub struct MembersQuery {
    pub page_size: Option<usize>,
}

/// Stage plus paged attendees for a room, presenter first
pub fn members_endpoint(
    coordinator: Arc<RoomCoordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("rooms" / String / "members")
        .and(warp::get())
        .and(warp::query::<MembersQuery>())
        .and(with_coordinator(coordinator))
        .and_then(
            |room_id: String, query: MembersQuery, coordinator: Arc<RoomCoordinator>| async move {
                let snapshot = coordinator.room_snapshot(&room_id, query.page_size).await;
                Ok::<_, warp::Rejection>(warp::reply::json(&snapshot))
            },
        )
}

/// Entry point for the CRUD service to announce new classroom content.
/// With a token configured, callers must send `Authorization: Bearer <token>`.
pub fn content_events_endpoint(
    coordinator: Arc<RoomCoordinator>,
    events_token: Option<String>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let events_token = Arc::new(events_token);

    warp::path!("classrooms" / String / "events")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::json::<ContentEvent>())
        .and(with_coordinator(coordinator))
        .and(warp::any().map(move || events_token.clone()))
        .and_then(
            |classroom_id: String,
             authorization: Option<String>,
             event: ContentEvent,
             coordinator: Arc<RoomCoordinator>,
             events_token: Arc<Option<String>>| async move {
                if !bearer_matches(events_token.as_deref(), authorization.as_deref()) {
                    tracing::warn!(classroom_id = %classroom_id, "Rejected content event without valid token");
                    return Ok::<_, warp::Rejection>(warp::reply::with_status(
                        warp::reply::json(&serde_json::json!({ "error": "unauthorized" })),
                        StatusCode::UNAUTHORIZED,
                    ));
                }

                let delivered = coordinator.publish_content(&classroom_id, event).await;
                Ok(warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({ "delivered": delivered })),
                    StatusCode::OK,
                ))
            },
        )
}

fn bearer_matches(expected: Option<&str>, authorization: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(token) => authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|given| given.trim() == token)
            .unwrap_or(false),
    }
}

fn with_coordinator(
    coordinator: Arc<RoomCoordinator>,
) -> impl Filter<Extract = (Arc<RoomCoordinator>,), Error = Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}
