use std::{error::Error, fmt};

/// The result type used across the router client.
pub type Result<T> = std::result::Result<T, RouterErr>;

/// Failures while talking to the router or decoding what it sends.
#[derive(Debug)]
pub enum RouterErr {
    /// The request never produced a response (connect error, timeout, ...).
    Transport(reqwest::Error),
    /// The router answered with a non-success status code.
    Http { status: u16, body: String },
    /// The response body could not be decoded.
    Decode(serde_json::Error),
    /// A status code or name outside the canonical set.
    InvalidStatus(String),
    /// A run references a task sequence outside its task list.
    InvalidSequence { run: u64, cur_seq: usize, tasks: usize },
}

impl RouterErr {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RouterErr::Transport(_) => true,
            RouterErr::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for RouterErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterErr::Transport(e) => write!(f, "router unreachable: {e}"),
            RouterErr::Http { status, body } => write!(f, "router error ({status}): {body}"),
            RouterErr::Decode(e) => write!(f, "invalid router payload: {e}"),
            RouterErr::InvalidStatus(s) => write!(f, "unknown run status {s:?}"),
            RouterErr::InvalidSequence { run, cur_seq, tasks } => write!(
                f,
                "run {run} points at task {cur_seq} but only has {tasks} task(s)"
            ),
        }
    }
}

impl Error for RouterErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RouterErr::Transport(e) => Some(e),
            RouterErr::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RouterErr {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}

impl From<serde_json::Error> for RouterErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value)
    }
}
