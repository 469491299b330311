//! Unit of work handed to the agent.

/// One opaque request for the agent: an operation label plus payload.
///
/// The bridge never looks inside `body`; `path` is only used for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Label identifying the requested operation (e.g. `absence/register`).
    pub path: String,
    /// Opaque request payload.
    pub body: Vec<u8>,
}

impl WorkUnit {
    /// Create a new unit of work.
    #[must_use]
    pub fn new(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            body: body.into(),
        }
    }
}
