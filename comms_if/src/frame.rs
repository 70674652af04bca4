//! # Topic framing
//!
//! Every message on the bus is a single frame made of the topic, one space, and the JSON payload.
//! Subscribers filter on the topic prefix.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{de::DeserializeOwned, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Topic \"{0}\" must not be empty or contain whitespace")]
    InvalidTopic(String),

    #[error("Message has no payload after the topic")]
    MissingPayload,

    #[error("Could not serialize the payload: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the payload: {0}")]
    DeserializeError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build a frame from a topic and an already-serialised payload.
pub fn join(topic: &str, payload: &str) -> Result<String, FrameError> {
    if topic.is_empty() || topic.contains(char::is_whitespace) {
        return Err(FrameError::InvalidTopic(topic.to_string()))
    }

    Ok(format!("{} {}", topic, payload))
}

/// Split a frame into its topic and payload.
pub fn split(frame: &str) -> Result<(&str, &str), FrameError> {
    match frame.find(' ') {
        Some(i) if i > 0 => Ok((&frame[..i], &frame[i + 1..])),
        Some(_) => Err(FrameError::InvalidTopic(String::new())),
        None => Err(FrameError::MissingPayload)
    }
}

/// Serialise the data into a frame on the given topic.
pub fn encode<T: Serialize>(topic: &str, data: &T) -> Result<String, FrameError> {
    let payload = serde_json::to_string(data)
        .map_err(FrameError::SerializationError)?;

    join(topic, &payload)
}

/// Deserialise the payload of a frame, returning the topic alongside the data.
pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<(&str, T), FrameError> {
    let (topic, payload) = split(frame)?;

    let data = serde_json::from_str(payload)
        .map_err(FrameError::DeserializeError)?;

    Ok((topic, data))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eqpt::perception::{DetectionBatch, DetectionRecord};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_frame_split() {
        assert_eq!(split("a/b {\"x\": 1}").unwrap(), ("a/b", "{\"x\": 1}"));
        assert!(split("nopayload").is_err());
        assert!(split(" {}").is_err());
        assert!(join("bad topic", "{}").is_err());
        assert!(join("", "{}").is_err());
    }

    #[test]
    fn test_frame_decode_batch() {
        let batch = DetectionBatch {
            frame_index: 3,
            timestamp: Utc.timestamp_millis(1_000),
            detections: vec![DetectionRecord::point(1.0, 2.0, 0.5)],
        };

        let frame = encode("aav/following/detections", &batch).unwrap();
        assert!(frame.starts_with("aav/following/detections {"));

        let (topic, decoded): (&str, DetectionBatch) = decode(&frame).unwrap();
        assert_eq!(topic, "aav/following/detections");
        assert_eq!(decoded, batch);

        assert!(matches!(
            decode::<DetectionBatch>("aav/following/detections {\"frame_index\": \"x\"}"),
            Err(FrameError::DeserializeError(_))
        ));
    }
}
