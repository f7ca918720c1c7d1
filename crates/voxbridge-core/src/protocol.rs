//! Telephony media-stream wire envelopes.
//!
//! The carrier exchanges one JSON object per WebSocket text message, tagged by
//! its `event` field. Inbound frames announce the call, carry µ-law audio,
//! echo marks back once playback reaches them, and signal the end of the
//! stream. Outbound frames carry synthesized audio, marks, and `clear`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Mark name appended after the final synthesized audio of a session.
pub const END_OF_INTERACTION_MARK: &str = "endOfInteraction";

/// A frame received from the telephony leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    Start { start: StartMeta },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    Stop {},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub call_sid: String,
    pub stream_sid: String,
}

/// Base64-encoded 8 kHz µ-law audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

impl MediaPayload {
    pub fn from_audio(audio: &[u8]) -> Self {
        Self {
            payload: STANDARD.encode(audio),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.payload.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// A frame sent to the telephony leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid", skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid", skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid", skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },
}

impl OutboundFrame {
    pub fn media(stream_sid: Option<&str>, audio: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.map(str::to_string),
            media: MediaPayload::from_audio(audio),
        }
    }

    pub fn end_of_interaction(stream_sid: Option<&str>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.map(str::to_string),
            mark: MarkPayload {
                name: END_OF_INTERACTION_MARK.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: Option<&str>) -> Self {
        Self::Clear {
            stream_sid: stream_sid.map(str::to_string),
        }
    }

    pub fn is_end_of_interaction(&self) -> bool {
        matches!(self, Self::Mark { mark, .. } if mark.name == END_OF_INTERACTION_MARK)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_twilio_start() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC0",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ1"
        }"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Start {
                start: StartMeta {
                    call_sid: "CA1".into(),
                    stream_sid: "MZ1".into(),
                }
            }
        );
    }

    #[test]
    fn test_parse_media_and_decode_payload() {
        let raw = r#"{"event":"media","sequenceNumber":"3","media":{"track":"inbound","chunk":"1","timestamp":"5","payload":"//7/"},"streamSid":"MZ1"}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        let InboundFrame::Media { media } = frame else {
            panic!("expected media frame");
        };
        assert_eq!(media.decode().unwrap(), vec![0xff, 0xfe, 0xff]);
    }

    #[test]
    fn test_parse_stop_with_body() {
        let raw = r#"{"event":"stop","stop":{"accountSid":"AC0","callSid":"CA1"},"streamSid":"MZ1"}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame, InboundFrame::Stop {});
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let raw = r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#;
        assert!(serde_json::from_str::<InboundFrame>(raw).is_err());
    }

    #[test]
    fn test_outbound_media_shape() {
        let frame = OutboundFrame::media(Some("MZ1"), &[0xff, 0x7f]);
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "MZ1");
        assert_eq!(value["media"]["payload"], "/38=");
    }

    #[test]
    fn test_outbound_mark_and_clear_shape() {
        let mark = OutboundFrame::end_of_interaction(Some("MZ1"));
        assert!(mark.is_end_of_interaction());
        let value: serde_json::Value = serde_json::from_str(&mark.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "mark");
        assert_eq!(value["mark"]["name"], "endOfInteraction");

        let clear = OutboundFrame::clear(Some("MZ1")).to_json().unwrap();
        assert_eq!(clear, r#"{"event":"clear","streamSid":"MZ1"}"#);
    }
}
