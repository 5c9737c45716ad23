use serde::{Deserialize, Serialize};

use crate::values::Timestamp;

/// Opaque session-token set returned by the game server on login.
///
/// Replaced wholesale on every (re)authentication; the delivery core
/// never inspects individual cookies, it only forwards them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub cookies: Vec<(String, String)>,
    pub issued_at: Timestamp,
}

impl Credentials {
    pub fn new(cookies: Vec<(String, String)>, issued_at: Timestamp) -> Self {
        Credentials { cookies, issued_at }
    }

    /// A credential set with no cookies cannot authenticate anything.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}
