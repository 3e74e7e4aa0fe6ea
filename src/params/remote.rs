//! Remote get/set surface over the parameter store.
//!
//! The transport layer hands each request body to [`RemoteParams::handle`]
//! and sends back whatever it returns.  Bodies are JSON tagged by `cmd`:
//!
//! ```text
//! {"cmd":"get","id":20}                  → {"status":"value","id":20,"value":100}
//! {"cmd":"set_key","key":"v1","value":1} → {"status":"ok"}
//! {"cmd":"set","id":21,"value":5}        → {"status":"error","reason":"value out of range"}
//! {"cmd":"error_reset"}                  → {"status":"ok"}
//! ```
//!
//! Status parameters are read-only here; only the firmware writes them.
//! `status` and `error_reset` go through the [`ControllerHandle`].
//!
//! Every request, valid or not, counts as contact from the control peer.

use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{ParamError, ParamId, ParamStore, StringParamId};
use crate::adapters::peer::PeerLink;
use crate::app::controller::ControllerHandle;
use crate::app::ports::Clock;
use crate::fsm::StateId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ParamRequest {
    Get { id: u16 },
    Set { id: u16, value: u32 },
    GetKey { key: String },
    SetKey { key: String, value: u32 },
    GetString { id: u16 },
    SetString { id: u16, value: String },
    Dump,
    /// Controller state, emergency flag and latched errors.
    Status,
    /// Acknowledge latched machine errors.
    ErrorReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParamResponse {
    Value { id: u16, value: u32 },
    Ok,
    #[serde(rename = "string")]
    Text { id: u16, value: String },
    Table { values: Vec<u32> },
    Controller {
        state: StateId,
        working: bool,
        emergency_disable: bool,
        machine_errors: u32,
    },
    Error { reason: String },
}

impl From<ParamError> for ParamResponse {
    fn from(e: ParamError) -> Self {
        Self::Error {
            reason: e.to_string(),
        }
    }
}

fn unavailable() -> ParamResponse {
    ParamResponse::Error {
        reason: "controller unavailable".to_string(),
    }
}

/// Write on behalf of the control peer.  Status values are refused.
fn remote_set(store: &ParamStore, id: ParamId, value: u32) -> Result<(), ParamError> {
    if !id.is_remote_writable() {
        warn!(target: "remote", "write to status {} refused", id.key());
        return Err(ParamError::ReadOnly);
    }
    store.set(id, value)
}

/// Apply one decoded request to the store.  Controller requests need a
/// [`ControllerHandle`] and are answered with an error here.
pub fn handle_request(store: &ParamStore, req: &ParamRequest) -> ParamResponse {
    let result = match req {
        ParamRequest::Get { id } => Ok(ParamResponse::Value {
            id: *id,
            value: store.get_by_index(*id),
        }),
        ParamRequest::Set { id, value } => ParamId::from_index(*id)
            .ok_or(ParamError::UnknownId)
            .and_then(|id| remote_set(store, id, *value))
            .map(|()| ParamResponse::Ok),
        ParamRequest::GetKey { key } => ParamId::from_key(key)
            .ok_or(ParamError::UnknownId)
            .map(|id| ParamResponse::Value {
                id: id as u16,
                value: store.get(id),
            }),
        ParamRequest::SetKey { key, value } => ParamId::from_key(key)
            .ok_or(ParamError::UnknownId)
            .and_then(|id| remote_set(store, id, *value))
            .map(|()| ParamResponse::Ok),
        ParamRequest::GetString { id } => StringParamId::from_index(*id)
            .ok_or(ParamError::UnknownId)
            .map(|sid| ParamResponse::Text {
                id: *id,
                value: store.get_string(sid).as_str().to_string(),
            }),
        ParamRequest::SetString { id, value } => StringParamId::from_index(*id)
            .ok_or(ParamError::UnknownId)
            .and_then(|sid| store.set_string(sid, value))
            .map(|()| ParamResponse::Ok),
        ParamRequest::Dump => Ok(ParamResponse::Table {
            values: store.snapshot().values().to_vec(),
        }),
        ParamRequest::Status | ParamRequest::ErrorReset => Ok(unavailable()),
    };
    result.unwrap_or_else(ParamResponse::from)
}

fn handle_controller_request(
    store: &ParamStore,
    controller: &ControllerHandle,
    req: &ParamRequest,
) -> ParamResponse {
    match req {
        ParamRequest::Status => ParamResponse::Controller {
            state: controller.state(),
            working: controller.is_working(),
            emergency_disable: controller.get_emergency_disable(),
            machine_errors: store.get(ParamId::MachineErrors),
        },
        ParamRequest::ErrorReset => {
            if controller.error_reset() {
                ParamResponse::Ok
            } else {
                ParamResponse::Error {
                    reason: "no latched error".to_string(),
                }
            }
        }
        other => handle_request(store, other),
    }
}

/// Request handler owned by the transport task.
pub struct RemoteParams<C: Clock> {
    store: Arc<ParamStore>,
    peer: Arc<PeerLink<C>>,
    controller: Option<ControllerHandle>,
}

impl<C: Clock> RemoteParams<C> {
    pub fn new(store: Arc<ParamStore>, peer: Arc<PeerLink<C>>) -> Self {
        Self {
            store,
            peer,
            controller: None,
        }
    }

    /// Route `status` and `error_reset` to the running controller.
    pub fn with_controller(mut self, controller: ControllerHandle) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Decode a JSON body, apply it and return the encoded response.
    /// Malformed input yields an `error` response, never a panic.
    pub fn handle(&self, body: &[u8]) -> Vec<u8> {
        self.peer.note_contact();

        let response = match serde_json::from_slice::<ParamRequest>(body) {
            Ok(req) => {
                debug!(target: "remote", "request {:?}", req);
                match &self.controller {
                    Some(controller) => handle_controller_request(&self.store, controller, &req),
                    None => handle_request(&self.store, &req),
                }
            }
            Err(e) => {
                warn!(target: "remote", "malformed request: {}", e);
                ParamResponse::Error {
                    reason: "malformed request".to_string(),
                }
            }
        };

        serde_json::to_vec(&response)
            .unwrap_or_else(|_| br#"{"status":"error","reason":"encode failed"}"#.to_vec())
    }
}
