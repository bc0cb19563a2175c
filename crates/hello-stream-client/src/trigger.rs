//! HTTP trigger for the streaming session.
//!
//! `GET /sendMessage/greeting?firstname=..&lastname=..` runs one batch on the
//! shared [`Session`]. The session sits behind a [`Mutex`] so concurrent
//! requests send their batches one after another.

use crate::session::Session;
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use hello_stream_core::Error;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_FIRST_NAME: &str = "Billy";
pub const DEFAULT_LAST_NAME: &str = "Bob";

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug, Deserialize)]
pub struct Greeting {
    #[serde(rename = "firstname", default = "default_first_name")]
    pub first_name: String,
    #[serde(rename = "lastname", default = "default_last_name")]
    pub last_name: String,
}

fn default_first_name() -> String {
    DEFAULT_FIRST_NAME.to_string()
}

fn default_last_name() -> String {
    DEFAULT_LAST_NAME.to_string()
}

pub fn router(session: SharedSession) -> Router {
    Router::new()
        .route("/sendMessage/greeting", get(greeting))
        .with_state(session)
}

async fn greeting(
    State(session): State<SharedSession>,
    Query(params): Query<Greeting>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut session = session.lock().await;
    session
        .send_batch(&params.first_name, &params.last_name)
        .await
        .map(|()| StatusCode::OK)
        .map_err(|e| (status_for(&e), e.to_string()))
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Connection { .. } | Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
        Error::Transport { .. } => StatusCode::BAD_GATEWAY,
        Error::ServiceOverloaded { .. } => StatusCode::TOO_MANY_REQUESTS,
    }
}
