use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RouterErr;

/// Lifecycle status of a run, shared bit-exact with the router and any UI.
///
/// The router transports the integer code but reports display names on reads
/// ("Pending Aggregating"), so both forms are accepted when decoding and the
/// code is always used when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StatusRepr", into = "u8")]
#[repr(u8)]
pub enum Status {
    Failed = 0,
    PendingFailed = 1,
    Standby = 2,
    Preparing = 3,
    Running = 4,
    PendingSuccess = 5,
    PendingAggregating = 6,
    Aggregating = 7,
    Success = 8,
}

const ALL: [Status; 9] = [
    Status::Failed,
    Status::PendingFailed,
    Status::Standby,
    Status::Preparing,
    Status::Running,
    Status::PendingSuccess,
    Status::PendingAggregating,
    Status::Aggregating,
    Status::Success,
];

impl Status {
    /// The integer code used on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a wire code back into a status.
    ///
    /// # Errors
    /// `RouterErr::InvalidStatus` if `code` is not one of the nine canonical codes.
    pub fn from_code(code: u8) -> Result<Self, RouterErr> {
        ALL.get(code as usize)
            .copied()
            .ok_or_else(|| RouterErr::InvalidStatus(code.to_string()))
    }

    /// The display name, as rendered by the router.
    pub fn name(self) -> &'static str {
        match self {
            Status::Failed => "Failed",
            Status::PendingFailed => "Pending Failed",
            Status::Standby => "Standby",
            Status::Preparing => "Preparing",
            Status::Running => "Running",
            Status::PendingSuccess => "Pending Success",
            Status::PendingAggregating => "Pending Aggregating",
            Status::Aggregating => "Aggregating",
            Status::Success => "Success",
        }
    }

    /// Parses a status name, ignoring case and treating spaces and underscores alike.
    ///
    /// # Arguments
    /// * `name` - Something like `"Pending Aggregating"` or `"pending_aggregating"`.
    ///
    /// # Errors
    /// `RouterErr::InvalidStatus` for anything outside the canonical set.
    pub fn from_name(name: &str) -> Result<Self, RouterErr> {
        let normalized = normalize(name);

        ALL.into_iter()
            .find(|status| normalize(status.name()) == normalized)
            .ok_or_else(|| RouterErr::InvalidStatus(name.to_string()))
    }

    /// `Success` and `Failed` end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Failed)
    }

    /// Statuses that make a coordinator abandon the round.
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failed | Status::PendingFailed)
    }
}

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for Status {
    type Error = RouterErr;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Status::from_code(code)
    }
}

/// Either representation the router may send.
#[derive(Deserialize)]
#[serde(untagged)]
enum StatusRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<StatusRepr> for Status {
    type Error = RouterErr;

    fn try_from(repr: StatusRepr) -> Result<Self, Self::Error> {
        match repr {
            StatusRepr::Code(code) => Status::from_code(code),
            StatusRepr::Name(name) => match name.parse::<u8>() {
                Ok(code) => Status::from_code(code),
                Err(_) => Status::from_name(&name),
            },
        }
    }
}
