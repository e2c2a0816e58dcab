//! Domain models
//!
//! - `Event` - inbound camera notification and its raw bytes
//! - `LaneMap` - static lane → barrier controller mapping

pub mod event;
pub mod lane;

pub use event::{Event, ParseError, Picture, PictureRole};
pub use lane::{Controller, Credentials, LaneMap};
