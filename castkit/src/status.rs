//! Receiver Status
//!
//! Payload types for the receiver's `RECEIVER_STATUS` broadcasts and a diff
//! that turns successive statuses into lifecycle events.

use serde::{Deserialize, Serialize};

use crate::events::Event;

/// Payload `type` of a receiver status broadcast.
pub const TYPE_RECEIVER_STATUS: &str = "RECEIVER_STATUS";

/// Device status as reported by the receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub applications: Vec<ApplicationSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
}

/// One running application session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSession {
    #[serde(rename = "appId", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "statusText", skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(rename = "transportId", skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

/// Wire wrapper around [`Status`]:
/// `{"type":"RECEIVER_STATUS","requestId":...,"status":{...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiverStatusPayload {
    #[serde(default)]
    pub status: Status,
}

fn app_key(app: &ApplicationSession) -> &str {
    app.app_id.as_deref().unwrap_or("")
}

fn started_event(app: &ApplicationSession) -> Event {
    Event::AppStarted {
        app_id: app.app_id.clone().unwrap_or_default(),
        display_name: app.display_name.clone().unwrap_or_default(),
    }
}

fn stopped_event(app: &ApplicationSession) -> Event {
    Event::AppStopped {
        app_id: app.app_id.clone().unwrap_or_default(),
        display_name: app.display_name.clone().unwrap_or_default(),
    }
}

/// Compares successive statuses and yields the events between them.
#[derive(Default)]
pub struct StatusDiff {
    previous: Option<Status>,
}

impl StatusDiff {
    pub fn new() -> Self {
        StatusDiff::default()
    }

    /// Observes the next status, returning events in stopped/started/volume
    /// order. The first status reports every running app as started.
    pub fn observe(&mut self, status: Status) -> Vec<Event> {
        let mut events = Vec::new();
        let previous = self.previous.take().unwrap_or_default();

        for app in &previous.applications {
            if !status
                .applications
                .iter()
                .any(|next| app_key(next) == app_key(app))
            {
                events.push(stopped_event(app));
            }
        }
        for app in &status.applications {
            if !previous
                .applications
                .iter()
                .any(|prev| app_key(prev) == app_key(app))
            {
                events.push(started_event(app));
            }
        }

        if let Some(volume) = &status.volume {
            if previous.volume.as_ref() != Some(volume) {
                events.push(Event::StatusUpdated {
                    level: volume.level.unwrap_or(0.0),
                    muted: volume.muted.unwrap_or(false),
                });
            }
        }

        self.previous = Some(status);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str, name: &str) -> ApplicationSession {
        ApplicationSession {
            app_id: Some(id.to_string()),
            display_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn volume(level: f64, muted: bool) -> Volume {
        Volume {
            level: Some(level),
            muted: Some(muted),
        }
    }

    #[test]
    fn first_status_reports_all_apps_started() {
        let mut diff = StatusDiff::new();
        let events = diff.observe(Status {
            applications: vec![app("A1", "Player")],
            volume: Some(volume(0.5, false)),
        });
        assert_eq!(
            events,
            vec![
                Event::AppStarted {
                    app_id: "A1".into(),
                    display_name: "Player".into()
                },
                Event::StatusUpdated {
                    level: 0.5,
                    muted: false
                },
            ]
        );
    }

    #[test]
    fn app_churn_produces_stop_then_start() {
        let mut diff = StatusDiff::new();
        diff.observe(Status {
            applications: vec![app("A1", "Player")],
            volume: None,
        });
        let events = diff.observe(Status {
            applications: vec![app("A2", "Radio")],
            volume: None,
        });
        assert_eq!(
            events,
            vec![
                Event::AppStopped {
                    app_id: "A1".into(),
                    display_name: "Player".into()
                },
                Event::AppStarted {
                    app_id: "A2".into(),
                    display_name: "Radio".into()
                },
            ]
        );
    }

    #[test]
    fn unchanged_volume_is_quiet() {
        let mut diff = StatusDiff::new();
        diff.observe(Status {
            applications: vec![],
            volume: Some(volume(0.3, true)),
        });
        let events = diff.observe(Status {
            applications: vec![],
            volume: Some(volume(0.3, true)),
        });
        assert!(events.is_empty());

        let events = diff.observe(Status {
            applications: vec![],
            volume: Some(volume(0.4, true)),
        });
        assert_eq!(
            events,
            vec![Event::StatusUpdated {
                level: 0.4,
                muted: true
            }]
        );
    }

    #[test]
    fn status_payload_decodes_from_wire_shape() {
        let payload: ReceiverStatusPayload = serde_json::from_str(
            r#"{"type":"RECEIVER_STATUS","requestId":3,"status":{
                "applications":[{"appId":"A1","displayName":"Player","sessionId":"s1"}],
                "volume":{"level":0.25,"muted":false}}}"#,
        )
        .unwrap();
        assert_eq!(payload.status.applications.len(), 1);
        assert_eq!(payload.status.applications[0].app_id.as_deref(), Some("A1"));
        assert_eq!(payload.status.volume.unwrap().level, Some(0.25));
    }
}
