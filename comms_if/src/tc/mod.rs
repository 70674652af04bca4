//! # Teleop chatter module
//!
//! The teleop process broadcasts requests on its chatter topic. The follow executable listens for
//! requests to start and stop following and for configuration restart requests.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde_json::{self, json, Value};
use structopt::StructOpt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Value of the `following` field which enables following.
pub const START_FOLLOWING: &str = "Start Following";

/// Value of the `following` field which disables following.
pub const STOP_FOLLOWING: &str = "Stop Following";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A request recieved on the teleop chatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chatter {
    /// Begin following a target
    StartFollowing,

    /// Stop following, the vehicle shall be brought to the neutral command
    StopFollowing,

    /// Configuration has changed on disk and shall be reloaded
    Restart,

    /// A valid chatter message which isn't addressed to the follow executable
    Ignored,
}

/// A request which can be sent on the teleop chatter, used by tools driving the executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StructOpt)]
pub enum ChatterRequest {
    /// Start following the selected target.
    #[structopt(name = "start")]
    Start,

    /// Stop following and bring the vehicle to the neutral command.
    #[structopt(name = "stop")]
    Stop,

    /// Reload the configuration file.
    #[structopt(name = "restart")]
    Restart,
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum ChatterParseError {
    #[error("Chatter contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Chatter is not a JSON object")]
    NotAnObject,

    #[error("Unrecognised following request \"{0}\"")]
    InvalidFollowing(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Chatter {

    /// Parse a chatter message from its JSON payload.
    pub fn from_json(json_str: &str) -> Result<Self, ChatterParseError> {
        let val: Value = serde_json::from_str(json_str)
            .map_err(ChatterParseError::InvalidJson)?;

        if !val.is_object() {
            return Err(ChatterParseError::NotAnObject)
        }

        // Following requests take priority over commands
        if let Some(f) = val["following"].as_str() {
            return match f {
                START_FOLLOWING => Ok(Chatter::StartFollowing),
                STOP_FOLLOWING => Ok(Chatter::StopFollowing),
                other => Err(ChatterParseError::InvalidFollowing(other.to_string()))
            }
        }

        match val["command"].as_str() {
            Some("restart") => Ok(Chatter::Restart),
            _ => Ok(Chatter::Ignored)
        }
    }
}

impl ChatterRequest {
    /// The JSON payload of this request.
    pub fn to_json(&self) -> Value {
        match self {
            ChatterRequest::Start => json!({ "following": START_FOLLOWING }),
            ChatterRequest::Stop => json!({ "following": STOP_FOLLOWING }),
            ChatterRequest::Restart => json!({ "command": "restart" }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chatter_parse() {
        assert_eq!(
            Chatter::from_json(r#"{"following": "Start Following"}"#).unwrap(),
            Chatter::StartFollowing
        );
        assert_eq!(
            Chatter::from_json(r#"{"following": "Stop Following", "time": 1}"#).unwrap(),
            Chatter::StopFollowing
        );
        assert_eq!(
            Chatter::from_json(r#"{"time": 10, "command": "restart"}"#).unwrap(),
            Chatter::Restart
        );
        assert_eq!(
            Chatter::from_json(r#"{"camera_azimuth": 12.0}"#).unwrap(),
            Chatter::Ignored
        );
        assert!(Chatter::from_json(r#"{"following": "Maybe"}"#).is_err());
        assert!(Chatter::from_json("[1, 2]").is_err());
        assert!(Chatter::from_json("{not json").is_err());
    }

    #[test]
    fn test_request_parses_back() {
        for req in [ChatterRequest::Start, ChatterRequest::Stop, ChatterRequest::Restart].iter() {
            let parsed = Chatter::from_json(&req.to_json().to_string()).unwrap();
            let expected = match req {
                ChatterRequest::Start => Chatter::StartFollowing,
                ChatterRequest::Stop => Chatter::StopFollowing,
                ChatterRequest::Restart => Chatter::Restart,
            };
            assert_eq!(parsed, expected);
        }

        assert_eq!(
            ChatterRequest::from_iter_safe(&["test_chatter_pub", "stop"]).unwrap(),
            ChatterRequest::Stop
        );
    }
}
