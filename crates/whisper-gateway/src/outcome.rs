/// What a gateway operation did. On the wire every variant except `Applied`
/// is a silent no-op; internally callers and tests can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// State changed (or, for ephemeral operations, the event went out).
    Applied,
    /// Already in the requested state.
    Unchanged,
    /// Caller lacks the membership, admin or sender status required.
    Denied,
    /// The referenced message, user or membership does not exist.
    NotFound,
    /// The message is deleted; no further mutation is allowed.
    Gone,
    /// The input breaks a field limit.
    Invalid,
}

impl Outcome {
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}
