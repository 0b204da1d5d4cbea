//! Tunnel mapping handlers.

use super::require_port_param;
use crate::server::AppState;
use serde_json::{json, Value};
use tracing::info;

pub async fn set_tunnel(state: &AppState, params: &Value) -> burrow_core::Result<Value> {
    let target_port = require_port_param(params, "target_port", "targetPort")?;
    let tunnel_port = require_port_param(params, "tunnel_port", "tunnelPort")?;

    info!(
        "set_tunnel: target port {} -> tunnel port {}",
        target_port, tunnel_port
    );
    let outcome = state.supervisor.set(target_port, tunnel_port).await?;
    Ok(serde_json::to_value(outcome)?)
}

pub async fn list_tunnels(state: &AppState, _params: &Value) -> burrow_core::Result<Value> {
    let overview = state.supervisor.list_tunnels().await?;
    Ok(serde_json::to_value(overview)?)
}

/// Run a reconciliation pass now instead of waiting for the next tick.
pub async fn sync_status(state: &AppState, _params: &Value) -> burrow_core::Result<Value> {
    let report = state.supervisor.sync_status().await?;
    Ok(json!({
        "ready": report.is_some(),
        "report": report,
    }))
}

pub async fn register_target(state: &AppState, params: &Value) -> burrow_core::Result<Value> {
    let target_port = require_port_param(params, "target_port", "targetPort")?;
    let created = state.store.register_target(target_port)?;
    if created {
        info!("Registered target port {}", target_port);
    }
    Ok(json!({ "target_port": target_port, "created": created }))
}

/// Delete a target and stop any tunnel still forwarding to it.
pub async fn remove_target(state: &AppState, params: &Value) -> burrow_core::Result<Value> {
    let target_port = require_port_param(params, "target_port", "targetPort")?;
    let outcome = state.supervisor.remove_target(target_port).await?;
    Ok(serde_json::to_value(outcome)?)
}
