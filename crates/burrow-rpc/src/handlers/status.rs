//! Supervisor status handler.

use crate::server::AppState;
use serde_json::{json, Value};

pub async fn get_status(state: &AppState, _params: &Value) -> burrow_core::Result<Value> {
    let status = state.supervisor.status();
    Ok(json!({
        "success": true,
        "version": env!("CARGO_PKG_VERSION"),
        "ready": status.ready,
        "disabled": status.disabled,
        "binary": status.binary,
        "sync_interval_secs": status.sync_interval_secs,
        "platform": burrow_core::platform::current_platform(),
    }))
}
