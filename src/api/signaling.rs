use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Call;

/// Media path proposal relayed verbatim between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Messages a connected client may send over the gateway socket. Each
/// variant carries an explicit schema and is rejected at the boundary when
/// it does not parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "call:join")]
    Join { call_id: Uuid },
    #[serde(rename = "call:leave")]
    Leave { call_id: Uuid },
    #[serde(rename = "call:offer")]
    Offer {
        call_id: Uuid,
        target_user_id: Uuid,
        sdp: String,
    },
    #[serde(rename = "call:answer")]
    Answer {
        call_id: Uuid,
        target_user_id: Uuid,
        sdp: String,
    },
    #[serde(rename = "call:ice-candidate")]
    IceCandidate {
        call_id: Uuid,
        target_user_id: Uuid,
        candidate: IceCandidate,
    },
    #[serde(rename = "call:media:toggle")]
    MediaToggle {
        call_id: Uuid,
        kind: MediaKind,
        enabled: bool,
    },
    #[serde(rename = "call:screen:start")]
    ScreenStart { call_id: Uuid },
    #[serde(rename = "call:screen:stop")]
    ScreenStop { call_id: Uuid },
    #[serde(rename = "ping")]
    Ping,
}

/// Messages pushed to clients, over the local socket or the per-user Redis
/// channel. Delivery is best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "call:incoming")]
    CallIncoming { call: Call },
    #[serde(rename = "call:accepted")]
    CallAccepted { call_id: Uuid, user_id: Uuid },
    #[serde(rename = "call:rejected")]
    CallRejected { call_id: Uuid, user_id: Uuid },
    #[serde(rename = "call:ended")]
    CallEnded {
        call_id: Uuid,
        user_id: Uuid,
        duration: Option<i32>,
    },
    #[serde(rename = "call:missed")]
    CallMissed { call_id: Uuid },
    #[serde(rename = "call:participant:joined")]
    ParticipantJoined { call_id: Uuid, user_id: Uuid },
    #[serde(rename = "call:participant:left")]
    ParticipantLeft { call_id: Uuid, user_id: Uuid },
    #[serde(rename = "call:offer:received")]
    OfferReceived {
        call_id: Uuid,
        from_user_id: Uuid,
        sdp: String,
    },
    #[serde(rename = "call:answer:received")]
    AnswerReceived {
        call_id: Uuid,
        from_user_id: Uuid,
        sdp: String,
    },
    #[serde(rename = "call:ice-candidate:received")]
    IceCandidateReceived {
        call_id: Uuid,
        from_user_id: Uuid,
        candidate: IceCandidate,
    },
    #[serde(rename = "call:media:toggled")]
    MediaToggled {
        call_id: Uuid,
        user_id: Uuid,
        kind: MediaKind,
        enabled: bool,
    },
    #[serde(rename = "call:screen:started")]
    ScreenStarted { call_id: Uuid, user_id: Uuid },
    #[serde(rename = "call:screen:stopped")]
    ScreenStopped { call_id: Uuid, user_id: Uuid },
    #[serde(rename = "recording:available")]
    RecordingAvailable {
        call_id: Uuid,
        recording_url: String,
    },
    #[serde(rename = "pong")]
    Pong,
}

/// Wire wrapper for events on per-user Redis channels. `origin` identifies
/// the publishing server process; a subscriber skips messages its own
/// process already delivered locally. Service-side publishers that do no
/// local delivery leave it unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub origin: Option<Uuid>,
    pub event: ServerEvent,
}

impl PublishedEvent {
    /// Whether a subscriber on `instance_id` should forward this message to
    /// its sockets. False only when that instance already delivered it.
    pub fn should_forward(&self, instance_id: Uuid) -> bool {
        self.origin != Some(instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_parse_by_discriminator() {
        let call_id = Uuid::new_v4();
        let target = Uuid::new_v4();
        let raw = json!({
            "type": "call:offer",
            "payload": {
                "call_id": call_id,
                "target_user_id": target,
                "sdp": "v=0..."
            }
        });

        match serde_json::from_value::<ClientEvent>(raw).unwrap() {
            ClientEvent::Offer {
                call_id: c,
                target_user_id: t,
                sdp,
            } => {
                assert_eq!(c, call_id);
                assert_eq!(t, target);
                assert_eq!(sdp, "v=0...");
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }

    #[test]
    fn ice_candidate_uses_browser_field_names() {
        let raw = json!({
            "type": "call:ice-candidate",
            "payload": {
                "call_id": Uuid::new_v4(),
                "target_user_id": Uuid::new_v4(),
                "candidate": {
                    "candidate": "candidate:0 1 UDP 2122252543 192.0.2.1 54321 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            }
        });

        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::IceCandidate { candidate, .. } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let raw = json!({ "type": "call:unknown", "payload": {} });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn published_events_skip_their_origin_instance() {
        let here = Uuid::new_v4();
        let published = PublishedEvent {
            origin: Some(here),
            event: ServerEvent::Pong,
        };
        // The publishing instance already handed the event to its own
        // sockets; forwarding again would deliver it twice.
        assert!(!published.should_forward(here));
        assert!(published.should_forward(Uuid::new_v4()));

        let from_service = PublishedEvent {
            origin: None,
            event: ServerEvent::Pong,
        };
        assert!(from_service.should_forward(here));
    }

    #[test]
    fn published_events_round_trip_with_origin() {
        let call_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let origin = Uuid::new_v4();
        let published = PublishedEvent {
            origin: Some(origin),
            event: ServerEvent::CallAccepted { call_id, user_id },
        };

        let json = serde_json::to_string(&published).unwrap();
        let parsed: PublishedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.origin, Some(origin));
        match parsed.event {
            ServerEvent::CallAccepted {
                call_id: c,
                user_id: u,
            } => {
                assert_eq!(c, call_id);
                assert_eq!(u, user_id);
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }

    #[test]
    fn server_events_tag_with_expected_names() {
        let event = ServerEvent::ParticipantLeft {
            call_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "call:participant:left");
        assert!(value["payload"]["user_id"].is_string());
    }
}
