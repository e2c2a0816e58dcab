//! Static lane → barrier controller mapping

use rustc_hash::FxHashMap;
use std::fmt;

/// Controller login. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A barrier controller reachable over HTTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    /// Host or host:port, no scheme
    pub address: String,
    pub credentials: Credentials,
}

/// Lane id → controller. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct LaneMap {
    lanes: FxHashMap<String, Controller>,
}

impl LaneMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lane(mut self, lane: impl Into<String>, controller: Controller) -> Self {
        self.lanes.insert(lane.into(), controller);
        self
    }

    /// Look up the controller for a lane. Entries with an empty address count as absent.
    pub fn resolve(&self, lane: &str) -> Option<&Controller> {
        self.lanes.get(lane).filter(|c| !c.address.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Lane ids in sorted order (for startup logging)
    pub fn lane_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.lanes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl FromIterator<(String, Controller)> for LaneMap {
    fn from_iter<I: IntoIterator<Item = (String, Controller)>>(iter: I) -> Self {
        Self { lanes: iter.into_iter().collect() }
    }
}
