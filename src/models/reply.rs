//! Result returned by the agent for one unit of work.

/// Status code and opaque body produced by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    /// Agent-chosen status, conventionally an HTTP status code.
    pub status: i32,
    /// Opaque response payload.
    pub body: Vec<u8>,
}

impl Reply {
    /// Create a new reply.
    #[must_use]
    pub fn new(status: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Body interpreted as UTF-8, lossily.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
