//! Carrier frame decoding and encoding.

use bytes::Bytes;
use tracing::debug;

use voxbridge_core::protocol::{InboundFrame, OutboundFrame};
use voxbridge_core::session::CallSession;

/// Parse one carrier message. Malformed JSON and unknown event tags are
/// dropped with a debug log.
pub fn decode_inbound(raw: &str) -> Option<InboundFrame> {
    match serde_json::from_str::<InboundFrame>(raw) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(error = %e, len = raw.len(), "Dropping unrecognized inbound frame");
            None
        }
    }
}

/// Raw µ-law bytes carried by a media frame. Other frames, media after the
/// session stopped, undecodable payloads, and empty payloads yield nothing.
pub fn media_payload(frame: &InboundFrame, stopped: bool) -> Option<Bytes> {
    let InboundFrame::Media { media } = frame else {
        return None;
    };
    if stopped {
        return None;
    }
    match media.decode() {
        Ok(audio) if !audio.is_empty() => Some(Bytes::from(audio)),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Dropping media frame with invalid base64 payload");
            None
        }
    }
}

/// Frames for one chunk of transcoded agent audio.
///
/// Audio is written until the terminal mark has gone out. The chunk that
/// follows (or carries) the stop is followed by the end-of-interaction mark,
/// exactly once per session.
pub fn encode_audio(session: &mut CallSession, audio: &[u8]) -> Vec<OutboundFrame> {
    if audio.is_empty() || session.end_mark_sent() {
        return Vec::new();
    }
    let mut frames = vec![OutboundFrame::media(session.stream_sid(), audio)];
    if session.claim_end_mark() {
        frames.push(OutboundFrame::end_of_interaction(session.stream_sid()));
    }
    frames
}

/// The terminal mark, when the session stopped but no audio carried it.
pub fn flush_end_mark(session: &mut CallSession) -> Option<OutboundFrame> {
    session
        .claim_end_mark()
        .then(|| OutboundFrame::end_of_interaction(session.stream_sid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbridge_core::protocol::MediaPayload;
    use voxbridge_core::session::SessionSignal;

    fn media(payload: &str) -> InboundFrame {
        InboundFrame::Media {
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }

    #[test]
    fn test_decode_inbound_drops_garbage() {
        assert!(decode_inbound("not json").is_none());
        assert!(decode_inbound(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#).is_none());
        assert!(decode_inbound(r#"{"event":"stop"}"#).is_some());
    }

    #[test]
    fn test_media_payload_without_start() {
        let frame = decode_inbound(r#"{"event":"media","media":{"payload":"AQID"}}"#).unwrap();
        assert_eq!(media_payload(&frame, false), Some(Bytes::from_static(&[1, 2, 3])));
    }

    #[test]
    fn test_media_payload_suppressed() {
        assert_eq!(media_payload(&media("AQID"), true), None);
        assert_eq!(media_payload(&media(""), false), None);
        assert_eq!(media_payload(&media("***"), false), None);
        assert_eq!(media_payload(&InboundFrame::Stop {}, false), None);
    }

    #[test]
    fn test_encode_audio_before_stop() {
        let mut session = CallSession::with_id("s");
        session.set_call("CA1", "MZ1");
        let frames = encode_audio(&mut session, &[0xff]);
        assert_eq!(frames, vec![OutboundFrame::media(Some("MZ1"), &[0xff])]);
    }

    #[test]
    fn test_mark_follows_audio_once() {
        let mut session = CallSession::with_id("s");
        session.set_call("CA1", "MZ1");
        session.apply(SessionSignal::Stop).unwrap();

        let frames = encode_audio(&mut session, &[0xff]);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_end_of_interaction());

        assert!(encode_audio(&mut session, &[0xff]).is_empty());
        assert!(flush_end_mark(&mut session).is_none());
    }

    #[test]
    fn test_flush_mark_without_audio() {
        let mut session = CallSession::with_id("s");
        assert!(flush_end_mark(&mut session).is_none());
        session.apply(SessionSignal::Stop).unwrap();
        let mark = flush_end_mark(&mut session).unwrap();
        assert!(mark.is_end_of_interaction());
        assert!(flush_end_mark(&mut session).is_none());
    }

    #[test]
    fn test_empty_audio_produces_no_frames() {
        let mut session = CallSession::with_id("s");
        session.apply(SessionSignal::Stop).unwrap();
        assert!(encode_audio(&mut session, &[]).is_empty());
        assert!(!session.end_mark_sent());
    }
}
