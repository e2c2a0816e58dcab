//! Camera event model
//!
//! An `Event` is a best-effort projection of the notification body used for
//! logging. The raw bytes are what gets published, so the projection is
//! tolerant: every field is optional and unknown fields are ignored.
//!
//! Two field sets are recognised:
//! - Dahua ITS: `Plate.PlateNumber`, `SnapInfo.AllowUser`, `Picture.{NormalPic,CutoutPic,VehiclePic}`
//! - Generic ITS: `event_type`, `camera_id`, `timestamp`

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty event payload")]
    Empty,
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Role of a picture attached to a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureRole {
    /// Full scene
    Normal,
    /// Plate cutout
    Cutout,
    /// Vehicle crop
    Vehicle,
}

/// Opaque image blob. Content is carried as received (base64 text), never decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub role: PictureRole,
    pub name: String,
    pub content: String,
}

/// One camera detection
#[derive(Debug, Clone)]
pub struct Event {
    pub plate_number: String,
    /// Camera's own access decision. Advisory only.
    pub allow_user: bool,
    pub pictures: Vec<Picture>,
    pub camera_id: Option<String>,
    pub event_type: Option<String>,
    raw_payload: Bytes,
}

fn str_at(root: &Value, pointer: &str) -> Option<String> {
    root.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn picture_at(root: &Value, slot: &str, role: PictureRole) -> Option<Picture> {
    let pic = root.pointer(&format!("/Picture/{}", slot))?;
    if !pic.is_object() {
        return None;
    }
    Some(Picture {
        role,
        name: pic.get("PicName").and_then(Value::as_str).unwrap_or_default().to_string(),
        content: pic.get("Content").and_then(Value::as_str).unwrap_or_default().to_string(),
    })
}

impl Event {
    /// Parse a notification body.
    ///
    /// Fails only when the body is empty or not a JSON object. Missing fields
    /// and fields of an unexpected type take zero values.
    pub fn parse(raw: Bytes) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        let root = Value::Object(serde_json::from_slice::<Map<String, Value>>(&raw)?);

        let pictures = [
            ("NormalPic", PictureRole::Normal),
            ("CutoutPic", PictureRole::Cutout),
            ("VehiclePic", PictureRole::Vehicle),
        ]
        .into_iter()
        .filter_map(|(slot, role)| picture_at(&root, slot, role))
        .collect();

        Ok(Self {
            plate_number: str_at(&root, "/Plate/PlateNumber").unwrap_or_default(),
            allow_user: root
                .pointer("/SnapInfo/AllowUser")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            pictures,
            camera_id: str_at(&root, "/camera_id").or_else(|| str_at(&root, "/DeviceID")),
            event_type: str_at(&root, "/event_type"),
            raw_payload: raw,
        })
    }

    /// The exact bytes received
    pub fn raw_payload(&self) -> &Bytes {
        &self.raw_payload
    }

    /// Source label for log lines: camera id if present, else "unknown"
    pub fn source(&self) -> &str {
        self.camera_id.as_deref().unwrap_or("unknown")
    }
}
