//! Control message vocabulary and decoding
//!
//! Clients send one JSON object per message, tagged by an `action` field:
//!
//! ```json
//! {"action":"init","type":"xterm-256color","colorDepth":"24","features":["unicode"],"cols":80,"rows":24,"userAgent":"xterm.js"}
//! {"action":"read","data":"ls\r"}
//! {"action":"resize","cols":120,"rows":40}
//! ```
//!
//! Anything that does not decode into exactly one of these variants is a
//! [`ProtocolError`]. There is no fallback variant.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

use crate::types::Geometry;

/// Control protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed control message: {0}")]
    Malformed(String),

    #[error("Control message has no action")]
    MissingAction,

    #[error("Unrecognized action '{0}'")]
    UnknownAction(String),

    #[error("Invalid '{action}' message: {reason}")]
    InvalidField {
        action: &'static str,
        reason: String,
    },

    #[error("Invalid geometry {cols}x{rows}")]
    InvalidGeometry { cols: i64, rows: i64 },

    #[error("Unexpected '{action}' message while {state}")]
    UnexpectedMessage {
        action: &'static str,
        state: String,
    },

    #[error("Control frame too long: {len} bytes (max {max})")]
    FrameTooLong { len: usize, max: usize },
}

/// Terminal capabilities announced by the client's first message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    /// Terminal type, e.g. `xterm-256color`
    pub term_type: String,
    /// Color depth as reported by the client, e.g. `"24"` or `"8"`
    pub color_depth: String,
    pub features: BTreeSet<String>,
    pub geometry: Geometry,
    pub user_agent: String,
}

impl InitRequest {
    /// Whether the client reports 24-bit color support
    pub fn is_truecolor(&self) -> bool {
        let depth = self.color_depth.trim().to_ascii_lowercase();
        matches!(depth.as_str(), "24" | "24bit" | "truecolor" | "true_color")
    }
}

/// Decoded client-to-server control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Handshake; must be the first message on a connection
    Init(InitRequest),
    /// Keystroke/input payload
    Read { data: String },
    /// Geometry update
    Resize(Geometry),
}

impl ControlMessage {
    /// Wire name of this message's action
    pub fn action(&self) -> &'static str {
        match self {
            ControlMessage::Init(_) => "init",
            ControlMessage::Read { .. } => "read",
            ControlMessage::Resize(_) => "resize",
        }
    }

    /// Serialize to the wire format (used by clients and tests)
    pub fn to_json(&self) -> String {
        let value = match self {
            ControlMessage::Init(init) => serde_json::json!({
                "action": "init",
                "type": init.term_type,
                "colorDepth": init.color_depth,
                "features": init.features,
                "cols": init.geometry.cols,
                "rows": init.geometry.rows,
                "userAgent": init.user_agent,
            }),
            ControlMessage::Read { data } => serde_json::json!({
                "action": "read",
                "data": data,
            }),
            ControlMessage::Resize(geometry) => serde_json::json!({
                "action": "resize",
                "cols": geometry.cols,
                "rows": geometry.rows,
            }),
        };
        value.to_string()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitWire {
    #[serde(rename = "type")]
    term_type: String,
    #[serde(default)]
    color_depth: String,
    #[serde(default)]
    features: BTreeSet<String>,
    cols: i64,
    rows: i64,
    #[serde(default)]
    user_agent: String,
}

#[derive(Deserialize)]
struct ReadWire {
    data: String,
}

#[derive(Deserialize)]
struct ResizeWire {
    cols: i64,
    rows: i64,
}

/// Decode one raw control message
pub fn decode(raw: &str) -> Result<ControlMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(ref object) = value else {
        return Err(ProtocolError::Malformed("expected a JSON object".into()));
    };

    let action = match object.get("action") {
        Some(Value::String(action)) => action.as_str(),
        Some(other) => {
            return Err(ProtocolError::Malformed(format!(
                "action must be a string, got {}",
                other
            )))
        }
        None => return Err(ProtocolError::MissingAction),
    };

    match action {
        "init" => {
            let wire: InitWire = parse_fields("init", value.clone())?;
            Ok(ControlMessage::Init(InitRequest {
                term_type: wire.term_type,
                color_depth: wire.color_depth,
                features: wire.features,
                geometry: geometry(wire.cols, wire.rows)?,
                user_agent: wire.user_agent,
            }))
        }
        "read" => {
            let wire: ReadWire = parse_fields("read", value.clone())?;
            Ok(ControlMessage::Read { data: wire.data })
        }
        "resize" => {
            let wire: ResizeWire = parse_fields("resize", value.clone())?;
            Ok(ControlMessage::Resize(geometry(wire.cols, wire.rows)?))
        }
        other => Err(ProtocolError::UnknownAction(other.to_string())),
    }
}

fn parse_fields<T: serde::de::DeserializeOwned>(
    action: &'static str,
    value: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidField {
        action,
        reason: e.to_string(),
    })
}

fn geometry(cols: i64, rows: i64) -> Result<Geometry, ProtocolError> {
    let invalid = || ProtocolError::InvalidGeometry { cols, rows };
    let c = u16::try_from(cols).map_err(|_| invalid())?;
    let r = u16::try_from(rows).map_err(|_| invalid())?;
    Geometry::new(c, r).ok_or_else(invalid)
}
