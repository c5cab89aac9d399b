//! Client frame format on the project socket.
//!
//! A client frame is either `{"channel": ..., "message": <envelope>}` or a
//! bare envelope, which is taken to arrive on the action channel. The
//! channel may be given short (`"stroke"`) or as the full address
//! (`"project/{projectId}/stroke"`).

use serde_json::Value;
use sketchwire_collab::InboundChannel;
use thiserror::Error;

/// Why a client frame could not be unwrapped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame must be a JSON object")]
    NotAnObject,

    #[error("unknown channel `{0}`")]
    UnknownChannel(String),

    #[error("channel `{address}` does not belong to project `{project_id}`")]
    ForeignProject { address: String, project_id: String },
}

/// An unwrapped client frame
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    pub channel: InboundChannel,
    pub message: Value,
}

/// Unwrap a text frame received on the socket of `project_id`
pub fn parse_client_frame(project_id: &str, text: &str) -> Result<ClientFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(FrameError::NotAnObject);
    };

    let Some(message) = object.remove("message") else {
        return Ok(ClientFrame {
            channel: InboundChannel::Action,
            message: Value::Object(object),
        });
    };

    let channel = match object.get("channel") {
        None | Some(Value::Null) => InboundChannel::Action,
        Some(Value::String(address)) => parse_channel(project_id, address)?,
        Some(other) => return Err(FrameError::UnknownChannel(other.to_string())),
    };

    Ok(ClientFrame { channel, message })
}

fn parse_channel(project_id: &str, address: &str) -> Result<InboundChannel, FrameError> {
    let short = match address.strip_prefix("project/") {
        Some(rest) => {
            let (project, channel) = rest
                .rsplit_once('/')
                .ok_or_else(|| FrameError::UnknownChannel(address.to_string()))?;
            if project != project_id {
                return Err(FrameError::ForeignProject {
                    address: address.to_string(),
                    project_id: project_id.to_string(),
                });
            }
            channel
        }
        None => address,
    };

    match short {
        "action" => Ok(InboundChannel::Action),
        "stroke" => Ok(InboundChannel::Stroke),
        _ => Err(FrameError::UnknownChannel(address.to_string())),
    }
}
