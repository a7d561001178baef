//! The outbound broadcast shapes: one JSON object per [`LifecycleEvent`], sent to every
//! live connection.

use serde::Serialize;
use slippi_authproxy_eventbus::LifecycleEvent;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Outbound {
    #[serde(rename = "searching")]
    Searching { discord_id: u64, bot_code: String, user_code: String },

    #[serde(rename = "authenticated")]
    Authenticated { discord_id: u64, user_code: String, user_name: String, user_ip: String },

    #[serde(rename = "slippiErr")]
    SlippiErr { discord_id: u64, user_code: String },

    #[serde(rename = "timeout")]
    Timeout { discord_id: u64, user_code: String },

    #[serde(rename = "noReadyClient")]
    NoReadyClient { discord_id: u64, user_code: String },
}

impl From<&LifecycleEvent> for Outbound {
    fn from(event: &LifecycleEvent) -> Self {
        match event.clone() {
            LifecycleEvent::Searching { requester_id, bot_connect_code, target_connect_code } => {
                Outbound::Searching { discord_id: requester_id, bot_code: bot_connect_code, user_code: target_connect_code }
            },

            LifecycleEvent::Authenticated { requester_id, target_connect_code, user_name, user_ip } => {
                Outbound::Authenticated { discord_id: requester_id, user_code: target_connect_code, user_name, user_ip }
            },

            LifecycleEvent::Timeout { requester_id, target_connect_code } => {
                Outbound::Timeout { discord_id: requester_id, user_code: target_connect_code }
            },

            LifecycleEvent::SlippiError { requester_id, target_connect_code } => {
                Outbound::SlippiErr { discord_id: requester_id, user_code: target_connect_code }
            },

            LifecycleEvent::NoReadyClient { requester_id, target_connect_code } => {
                Outbound::NoReadyClient { discord_id: requester_id, user_code: target_connect_code }
            },
        }
    }
}
