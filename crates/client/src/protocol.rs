//! Wire model of the game engine's JSON protocol.
//!
//! The engine answers every request with HTTP 200 and a JSON body
//! carrying an `Event` code; anything other than `Event == 0` is a
//! game condition, classified here into the shared error taxonomy.
//! The engine may also answer with an HTML page (login wall, IP
//! block); those bodies must never reach the JSON parser.

use serde::Deserialize;

use questline_core::{Error, GameRef, Level, LevelState, ProtocolFamily, Result};

/// Engine event meaning "the session is stale, re-authenticate".
pub const EVENT_STALE_SESSION: i32 = 4;

/// Engine event meaning "the level changed since the last read".
pub const EVENT_LEVEL_CHANGED: i32 = 16;

pub fn login_url(domain: &str) -> String {
    format!("https://{domain}/login/signin?json=1")
}

pub fn play_url(game: &GameRef) -> String {
    format!(
        "https://{}/gameengines/encounter/play/{}?json=1",
        game.domain, game.game_id
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(rename = "Error")]
    pub error: i32,
}

#[derive(Debug, Deserialize)]
pub struct GameStateBody {
    #[serde(rename = "Event")]
    pub event: Option<i32>,
    #[serde(rename = "Level")]
    pub level: Option<LevelBody>,
    #[serde(rename = "EngineAction")]
    pub engine_action: Option<EngineActionBody>,
}

#[derive(Debug, Deserialize)]
pub struct LevelBody {
    #[serde(rename = "LevelId")]
    pub level_id: u32,
    #[serde(rename = "Number")]
    pub number: u32,
    #[serde(rename = "IsPassed", default)]
    pub is_passed: bool,
    #[serde(rename = "Dismissed", default)]
    pub dismissed: bool,
    #[serde(rename = "HasAnswerBlockRule", default)]
    pub has_answer_block_rule: bool,
    #[serde(rename = "BlockDuration", default)]
    pub block_duration: Option<i64>,
    #[serde(rename = "RequiredSectorsCount", default)]
    pub sectors_required: Option<u32>,
    #[serde(rename = "PassedSectorsCount", default)]
    pub sectors_passed: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EngineActionBody {
    #[serde(rename = "LevelAction")]
    pub level_action: Option<LevelActionBody>,
}

#[derive(Debug, Deserialize)]
pub struct LevelActionBody {
    #[serde(rename = "Answer")]
    pub answer: Option<String>,
    #[serde(rename = "IsCorrectAnswer")]
    pub is_correct_answer: Option<bool>,
}

impl LevelBody {
    pub fn to_level(&self) -> Level {
        Level::new(self.level_id, self.number)
    }

    /// Remaining seconds of an active answer-block window, if any.
    pub fn block_remaining_secs(&self) -> Option<u64> {
        if !self.has_answer_block_rule {
            return None;
        }
        match self.block_duration {
            Some(secs) if secs > 0 => Some(secs as u64),
            _ => None,
        }
    }

    pub fn to_state(&self) -> LevelState {
        LevelState {
            level: self.to_level(),
            is_passed: self.is_passed,
            dismissed: self.dismissed,
            block_remaining_secs: self.block_remaining_secs(),
            sectors_required: self.sectors_required,
            sectors_passed: self.sectors_passed,
            refreshed_credentials: None,
        }
    }
}

/// Content sniffing: an HTML body must never be parsed as JSON. On the
/// login endpoint it signals an IP block, elsewhere a dead session.
pub fn looks_like_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('<') || trimmed.to_ascii_lowercase().contains("<html")
}

/// Bounded snippet of a response body for diagnostics.
pub fn body_snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

pub fn parse_login(body: &str) -> Result<LoginBody> {
    serde_json::from_str(body).map_err(|e| {
        Error::protocol(
            "malformed_response",
            format!("malformed login response: {e}"),
            ProtocolFamily::Other,
            false,
        )
    })
}

pub fn parse_game_state(body: &str) -> Result<GameStateBody> {
    serde_json::from_str(body).map_err(|e| {
        Error::protocol(
            "malformed_response",
            format!("malformed engine response: {e}"),
            ProtocolFamily::Other,
            false,
        )
    })
}

/// Maps the login endpoint's numeric result code to a terminal error.
/// Code 0 is success and never reaches this function.
pub fn classify_login_error(code: i32) -> Error {
    let terminal = |c: &str, m: &str| Error::protocol(c, m, ProtocolFamily::Other, false);
    match code {
        1 => terminal("captcha_required", "captcha required, log in via a browser first"),
        2 => terminal("bad_credentials", "login or password is incorrect"),
        3 => terminal("account_blocked", "this account is blocked"),
        4 => terminal("ip_not_allowed", "this IP address is not allow-listed for the game"),
        5 => terminal("brute_force_suspected", "too many login attempts, try again later"),
        other => terminal("login_failed", &format!("login failed with code {other}")),
    }
}

/// Events in the level-changed family invalidate the level cache: the
/// cached level no longer reflects the game.
pub fn invalidates_cache(event: i32) -> bool {
    matches!(event, 16 | 17 | 18)
}

/// Maps a non-zero engine event to the shared error taxonomy.
pub fn classify_event(event: i32, level: Option<&LevelBody>) -> Error {
    let terminal =
        |code: String, msg: String| Error::protocol(code, msg, ProtocolFamily::Other, false);
    match event {
        EVENT_STALE_SESSION => Error::auth_required().with_context("event", "4"),
        1 => terminal("1".into(), "game not found".into()),
        2 => terminal("2".into(), "game has not started yet".into()),
        3 => terminal("3".into(), "game is already finished".into()),
        5 => terminal("5".into(), "player is banned from this game".into()),
        6 => terminal("6".into(), "player has no team".into()),
        7 => terminal("7".into(), "team is not accepted into the game".into()),
        8 => terminal("8".into(), "game participation requires payment".into()),
        9 => terminal("9".into(), "player is not signed up for the game".into()),
        10 => terminal("10".into(), "signup is not confirmed".into()),
        11 => Error::protocol(
            "11",
            "game is temporarily suspended",
            ProtocolFamily::Other,
            true,
        ),
        12 => Error::protocol(
            "12",
            "engine maintenance in progress",
            ProtocolFamily::Other,
            true,
        ),
        16 => Error::protocol(
            "16",
            "level changed since the last read",
            ProtocolFamily::LevelChanged,
            false,
        ),
        17 => Error::protocol(
            "17",
            "level is already passed",
            ProtocolFamily::LevelPassed,
            false,
        ),
        18 => Error::protocol(
            "18",
            "level was dismissed",
            ProtocolFamily::LevelDismissed,
            false,
        ),
        19 => {
            let secs = level.and_then(|l| l.block_remaining_secs());
            let msg = match secs {
                Some(s) => format!("answers are blocked for another {s}s"),
                None => "answers are blocked on this level".to_string(),
            };
            Error::protocol("19", msg, ProtocolFamily::AnswerBlock, true)
        }
        20 => terminal("20".into(), "game is over for this player".into()),
        other => terminal(
            other.to_string(),
            format!("unknown engine condition {other}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_sniffing() {
        assert!(looks_like_html("<!DOCTYPE html><html>...</html>"));
        assert!(looks_like_html("  \n<html lang=\"en\">"));
        assert!(!looks_like_html("{\"Event\": 0}"));
    }

    #[test]
    fn test_parse_game_state_full() {
        let body = r#"{
            "Event": 0,
            "Level": {
                "LevelId": 9001,
                "Number": 7,
                "IsPassed": false,
                "HasAnswerBlockRule": true,
                "BlockDuration": 42,
                "RequiredSectorsCount": 3,
                "PassedSectorsCount": 1
            },
            "EngineAction": { "LevelAction": { "Answer": "owl", "IsCorrectAnswer": true } }
        }"#;
        let parsed = parse_game_state(body).unwrap();
        assert_eq!(parsed.event, Some(0));
        let level = parsed.level.unwrap();
        assert_eq!(level.to_level(), Level::new(9001, 7));
        assert_eq!(level.block_remaining_secs(), Some(42));
        let verdict = parsed
            .engine_action
            .unwrap()
            .level_action
            .unwrap()
            .is_correct_answer;
        assert_eq!(verdict, Some(true));
    }

    #[test]
    fn test_missing_event_is_detectable() {
        let parsed = parse_game_state(r#"{"Level": null}"#).unwrap();
        assert_eq!(parsed.event, None);
    }

    #[test]
    fn test_event_classification() {
        assert!(classify_event(4, None).is_auth());
        assert!(classify_event(17, None).is_ignorable_for_queue());
        assert!(classify_event(18, None).is_ignorable_for_queue());
        assert!(classify_event(19, None).retryable());
        assert!(!classify_event(5, None).retryable());
        assert!(!classify_event(99, None).retryable());
    }

    #[test]
    fn test_cache_invalidation_events() {
        assert!(invalidates_cache(16));
        assert!(invalidates_cache(17));
        assert!(invalidates_cache(18));
        assert!(!invalidates_cache(0));
        assert!(!invalidates_cache(4));
    }

    #[test]
    fn test_login_error_codes() {
        for (code, expected) in [
            (1, "captcha_required"),
            (2, "bad_credentials"),
            (3, "account_blocked"),
            (4, "ip_not_allowed"),
            (5, "brute_force_suspected"),
            (77, "login_failed"),
        ] {
            match classify_login_error(code) {
                Error::Protocol { code: c, retryable, .. } => {
                    assert_eq!(c, expected);
                    assert!(!retryable);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }
}
