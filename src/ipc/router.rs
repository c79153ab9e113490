use super::auth;
use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLER_FAMILIES: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::faculties::try_handle,
    handlers::departments::try_handle,
    handlers::courses::try_handle,
    handlers::eligibility::try_handle,
    handlers::students::try_handle,
    handlers::lecturers::try_handle,
    handlers::registrations::try_handle,
    handlers::sessions::try_handle,
    handlers::attendance::try_handle,
    handlers::reports::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");

    if let Err(denied) = auth::authorize(&req) {
        tracing::warn!(method = %req.method, code = denied.code, "request denied");
        return denied.response(&req.id);
    }

    for try_handle in HANDLER_FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
