use crate::flow::{Advance, FlowField, GuidedFlow};
use crate::ipc::helpers::{get_date, get_required_str, with_state, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::SaveTarget;
use crate::setup;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn flow_mut<'a>(
    flows: &'a mut std::collections::HashMap<String, GuidedFlow>,
    params: &Value,
) -> Result<&'a mut GuidedFlow, HandlerErr> {
    let flow_id = get_required_str(params, "flowId")?;
    flows
        .get_mut(&flow_id)
        .ok_or_else(|| HandlerErr::new("not_found", "flow not found"))
}

fn departments(conn: &Connection) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn.prepare("SELECT id, name FROM departments ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn flow_start(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let date = get_date(params, "date")?;
    let time_slots =
        setup::time_slots(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let departments = departments(conn)?;

    let flow = GuidedFlow::new(Uuid::new_v4().to_string(), date);
    let result = json!({
        "flow": flow.to_json(),
        "departments": departments,
        "timeSlots": time_slots
    });
    debug!(flow_id = flow.id(), date = %date, "attendance flow started");
    state.flows.insert(flow.id().to_string(), flow);
    Ok(result)
}

fn flow_get(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let flow = flow_mut(&mut state.flows, params)?;
    let session = flow
        .session_id
        .as_ref()
        .and_then(|id| state.sessions.get(id))
        .map(|s| s.to_json());
    Ok(json!({ "flow": flow.to_json(), "session": session }))
}

fn flow_select(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let flow = flow_mut(&mut state.flows, params)?;
    let raw_field = get_required_str(params, "field")?;
    let field = FlowField::parse(&raw_field).ok_or_else(|| {
        HandlerErr::bad_params("field must be one of: department, section, timeSlot")
    })?;
    // null or "" clears the selection
    let value = params.get("value").and_then(|v| v.as_str());
    flow.select(field, value);
    Ok(json!({ "flow": flow.to_json() }))
}

/// Advances the flow. Reaching the student step opens a live session over
/// the department/section roster. The flow's earlier session is only
/// dropped once the new one is open; if opening fails the flow goes back to
/// the time-slot step and keeps its earlier session.
fn flow_next(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let flow = flow_mut(&mut state.flows, params)?;
    let key = match flow.next()? {
        Advance::Step(step) => {
            debug!(flow_id = flow.id(), step = step.number(), "attendance flow advanced");
            return Ok(json!({ "flow": flow.to_json() }));
        }
        Advance::Students(key) => key,
    };

    match super::attendance::open_session(
        conn,
        &mut state.sessions,
        SaveTarget::DepartmentSection(key),
        false,
    ) {
        Ok(session) => {
            let opened = session
                .get("sessionId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if let Some(previous) = std::mem::replace(&mut flow.session_id, opened) {
                if let Some(old) = state.sessions.remove(&previous) {
                    if old.is_dirty() {
                        warn!(flow_id = flow.id(), session_id = %previous, "replaced session had unsaved edits");
                    }
                }
            }
            info!(flow_id = flow.id(), "attendance flow reached student step");
            Ok(json!({ "flow": flow.to_json(), "session": session }))
        }
        Err(e) => {
            flow.cancel_students();
            Err(e.with_details(json!({ "flow": flow.to_json() })))
        }
    }
}

fn flow_back(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let flow = flow_mut(&mut state.flows, params)?;
    flow.back()?;
    debug!(flow_id = flow.id(), step = flow.step().number(), "attendance flow moved back");
    Ok(json!({ "flow": flow.to_json() }))
}

fn flow_close(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let flow_id = get_required_str(params, "flowId")?;
    let flow = state
        .flows
        .remove(&flow_id)
        .ok_or_else(|| HandlerErr::new("not_found", "flow not found"))?;
    let session = flow
        .session_id
        .as_ref()
        .and_then(|id| state.sessions.remove(id));
    let discarded_unsaved = session.map(|s| s.is_dirty()).unwrap_or(false);
    Ok(json!({ "closed": true, "discardedUnsaved": discarded_unsaved }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "flow.start" => Some(with_state(state, req, flow_start)),
        "flow.get" => Some(with_state(state, req, flow_get)),
        "flow.select" => Some(with_state(state, req, flow_select)),
        "flow.next" => Some(with_state(state, req, flow_next)),
        "flow.back" => Some(with_state(state, req, flow_back)),
        "flow.close" => Some(with_state(state, req, flow_close)),
        _ => None,
    }
}
