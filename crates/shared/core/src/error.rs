//! Error taxonomy shared by every delivery component.
//!
//! All classification decisions elsewhere in the system are made on the
//! error *kind* (and the protocol family for engine verdicts), never on
//! message text. The free-form context map exists for observability only.

use thiserror::Error;

use crate::entities::Level;

/// Free-form observability context attached to every error
/// (game id, expected level, response snippets, ...).
pub type Context = Vec<(String, String)>;

/// Family of a game-engine protocol condition.
///
/// The family is the classification contract for engine verdicts: the
/// queue processor drops items whose failure family describes state the
/// server no longer recognizes, and the batch sender treats an answer
/// block as a transient pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    /// The level has an active answer-block window.
    AnswerBlock,
    /// The engine reported the level changed between read and write.
    LevelChanged,
    /// The level was already passed.
    LevelPassed,
    /// The level was dismissed by the game authors.
    LevelDismissed,
    /// Any other engine condition (game not started, banned, ...).
    Other,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Credentials are missing, stale, or were rejected by the server.
    #[error("authentication required")]
    AuthRequired {
        needs_auth: bool,
        /// Set once a centralized re-authentication has already failed,
        /// so callers stop ping-pong retrying.
        reauth_failed: bool,
        context: Context,
    },

    /// Transport-level failure. Resets, timeouts and 5xx are retryable;
    /// most 4xx are not.
    #[error("network failure: {detail}")]
    Network {
        retryable: bool,
        detail: String,
        context: Context,
    },

    /// The server asked us to slow down.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        context: Context,
    },

    /// The pre-send level check found a different live level; nothing
    /// was posted. Requires player arbitration, never an automatic retry.
    #[error("level changed from {} to {} before answer {answer:?} was sent", old_level.number, new_level.number)]
    LevelChanged {
        old_level: Level,
        new_level: Level,
        answer: String,
        context: Context,
    },

    /// A condition reported by the game engine itself.
    #[error("game engine: {message}")]
    Protocol {
        code: String,
        message: String,
        family: ProtocolFamily,
        retryable: bool,
        context: Context,
    },

    /// Failure of an out-of-process collaborator (storage, messaging).
    /// Never classified; surfaced and logged as-is.
    #[error("internal failure: {detail}")]
    Internal { detail: String, context: Context },
}

impl Error {
    pub fn auth_required() -> Self {
        Error::AuthRequired {
            needs_auth: true,
            reauth_failed: false,
            context: Context::new(),
        }
    }

    pub fn reauth_failed() -> Self {
        Error::AuthRequired {
            needs_auth: true,
            reauth_failed: true,
            context: Context::new(),
        }
    }

    pub fn network(retryable: bool, detail: impl Into<String>) -> Self {
        Error::Network {
            retryable,
            detail: detail.into(),
            context: Context::new(),
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Error::RateLimited {
            retry_after_secs,
            context: Context::new(),
        }
    }

    pub fn level_changed(old_level: Level, new_level: Level, answer: impl Into<String>) -> Self {
        Error::LevelChanged {
            old_level,
            new_level,
            answer: answer.into(),
            context: Context::new(),
        }
    }

    pub fn protocol(
        code: impl Into<String>,
        message: impl Into<String>,
        family: ProtocolFamily,
        retryable: bool,
    ) -> Self {
        Error::Protocol {
            code: code.into(),
            message: message.into(),
            family,
            retryable,
            context: Context::new(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Error::Internal {
            detail: detail.into(),
            context: Context::new(),
        }
    }

    /// Attach an observability key/value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().push((key.into(), value.into()));
        self
    }

    pub fn context(&self) -> &Context {
        match self {
            Error::AuthRequired { context, .. }
            | Error::Network { context, .. }
            | Error::RateLimited { context, .. }
            | Error::LevelChanged { context, .. }
            | Error::Protocol { context, .. }
            | Error::Internal { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut Context {
        match self {
            Error::AuthRequired { context, .. }
            | Error::Network { context, .. }
            | Error::RateLimited { context, .. }
            | Error::LevelChanged { context, .. }
            | Error::Protocol { context, .. }
            | Error::Internal { context, .. } => context,
        }
    }

    /// May the *core* retry this on its own (as opposed to asking the
    /// player or giving up)?
    pub fn retryable(&self) -> bool {
        match self {
            Error::AuthRequired { .. } => false,
            Error::Network { retryable, .. } => *retryable,
            Error::RateLimited { .. } => true,
            Error::LevelChanged { .. } => false,
            Error::Protocol { retryable, .. } => *retryable,
            Error::Internal { .. } => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::AuthRequired { .. })
    }

    /// True when a queued answer that failed with this error should be
    /// silently skipped: the server described the state the answer was
    /// aimed at as gone or already satisfied.
    pub fn is_ignorable_for_queue(&self) -> bool {
        matches!(
            self,
            Error::Protocol {
                family: ProtocolFamily::LevelPassed
                    | ProtocolFamily::LevelDismissed
                    | ProtocolFamily::LevelChanged,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn level(id: u32, number: u32) -> Level {
        Level { id, number }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::network(true, "connection reset").retryable());
        assert!(!Error::network(false, "404").retryable());
        assert!(Error::rate_limited(3).retryable());
        assert!(!Error::auth_required().retryable());
        assert!(!Error::level_changed(level(1, 1), level(2, 2), "x").retryable());
    }

    #[test]
    fn test_ignorable_for_queue() {
        let passed = Error::protocol("17", "level already passed", ProtocolFamily::LevelPassed, false);
        let dismissed =
            Error::protocol("18", "level dismissed", ProtocolFamily::LevelDismissed, false);
        let banned = Error::protocol("5", "player banned", ProtocolFamily::Other, false);
        assert!(passed.is_ignorable_for_queue());
        assert!(dismissed.is_ignorable_for_queue());
        assert!(!banned.is_ignorable_for_queue());
        assert!(!Error::network(true, "timeout").is_ignorable_for_queue());
    }

    #[test]
    fn test_context_accumulates() {
        let err = Error::auth_required()
            .with_context("game_id", "31415")
            .with_context("domain", "demo.example.com");
        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context()[0].0, "game_id");
    }

    #[test]
    fn test_reauth_failed_marker() {
        match Error::reauth_failed() {
            Error::AuthRequired { reauth_failed, .. } => assert!(reauth_failed),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
