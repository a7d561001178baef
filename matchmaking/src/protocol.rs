//! Wire types for the upstream matchmaking service's reliable-UDP protocol. One JSON
//! object is sent per packet, over a dedicated ENet channel.

use serde::{Deserialize, Serialize};

pub const CREATE_TICKET: &str = "create-ticket";
pub const CREATE_TICKET_RESP: &str = "create-ticket-resp";
pub const GET_TICKET_RESP: &str = "get-ticket-resp";

/// `mode: 2` selects direct connect-code matchmaking — the only mode this proxy ever
/// requests, since its whole job is confirming a named opponent is reachable.
pub const DIRECT_MODE: u8 = 2;

#[derive(Debug, Serialize)]
pub struct CreateTicketUser<'a> {
    pub uid: &'a str,

    #[serde(rename = "playKey")]
    pub play_key: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateTicketSearch {
    pub mode: u8,

    #[serde(rename = "connectCode")]
    pub connect_code: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct CreateTicketRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,

    pub user: CreateTicketUser<'a>,
    pub search: CreateTicketSearch,

    #[serde(rename = "appVersion")]
    pub app_version: &'a str,

    #[serde(rename = "ipAddressLan")]
    pub ip_address_lan: String,
}

impl<'a> CreateTicketRequest<'a> {
    pub fn new(uid: &'a str, play_key: &'a str, target_connect_code: &str, app_version: &'a str, local_port: u16) -> Self {
        Self {
            kind: CREATE_TICKET,
            user: CreateTicketUser { uid, play_key },
            search: CreateTicketSearch {
                mode: DIRECT_MODE,
                connect_code: target_connect_code.as_bytes().to_vec(),
            },
            app_version,
            ip_address_lan: format!("127.0.0.1:{local_port}"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketResponse {
    #[serde(rename = "type")]
    pub kind: String,

    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlayerInfo {
    #[serde(rename = "connectCode")]
    pub connect_code: String,

    #[serde(rename = "ipAddress")]
    pub ip_address: String,

    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct GetTicketResponse {
    #[serde(rename = "type")]
    pub kind: String,

    pub error: Option<String>,

    #[serde(rename = "latestVersion", default)]
    pub latest_version: String,

    #[serde(default)]
    pub players: Vec<PlayerInfo>,
}

/// The parsed result of splitting a player's `host:port[:extra]` address string.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOpponent {
    pub host: String,
    pub port: u16,
    pub user_name: String,
}

/// Splits a player's `ipAddress` field (`host:port` or `host:port:aux`) into a host
/// and port, pairing it with the player's display name.
///
/// Returns `None` if the address is missing a port segment or the port isn't a valid
/// `u16`.
pub fn resolve_opponent(player: &PlayerInfo) -> Option<ResolvedOpponent> {
    let mut parts = player.ip_address.splitn(3, ':');
    let host = parts.next()?.to_string();
    let port: u16 = parts.next()?.parse().ok()?;

    Some(ResolvedOpponent { host, port, user_name: player.display_name.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_ticket_request_serializes_connect_code_as_byte_array() {
        let req = CreateTicketRequest::new("uid-1", "key-1", "AB", "3.5.1", 41000);
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["type"], "create-ticket");
        assert_eq!(value["search"]["mode"], 2);
        assert_eq!(value["search"]["connectCode"], serde_json::json!([65, 66]));
        assert_eq!(value["ipAddressLan"], "127.0.0.1:41000");
    }

    #[test]
    fn resolve_opponent_splits_host_port() {
        let player = PlayerInfo {
            connect_code: "OPP#042".into(),
            ip_address: "203.0.113.5:54321".into(),
            display_name: "Alice".into(),
        };

        let resolved = resolve_opponent(&player).unwrap();
        assert_eq!(resolved.host, "203.0.113.5");
        assert_eq!(resolved.port, 54321);
        assert_eq!(resolved.user_name, "Alice");
    }

    #[test]
    fn resolve_opponent_splits_host_port_with_trailing_extra_segment() {
        let player = PlayerInfo {
            connect_code: "OPP#042".into(),
            ip_address: "203.0.113.5:54321:extra".into(),
            display_name: "Alice".into(),
        };

        let resolved = resolve_opponent(&player).unwrap();
        assert_eq!(resolved.host, "203.0.113.5");
        assert_eq!(resolved.port, 54321);
    }

    #[test]
    fn resolve_opponent_rejects_missing_port() {
        let player = PlayerInfo {
            connect_code: "OPP#042".into(),
            ip_address: "203.0.113.5".into(),
            display_name: "Alice".into(),
        };

        assert!(resolve_opponent(&player).is_none());
    }

    #[test]
    fn get_ticket_response_defaults_players_and_latest_version() {
        let raw = r#"{"type":"get-ticket-resp"}"#;
        let parsed: GetTicketResponse = serde_json::from_str(raw).unwrap();

        assert_eq!(parsed.kind, "get-ticket-resp");
        assert!(parsed.players.is_empty());
        assert_eq!(parsed.latest_version, "");
        assert!(parsed.error.is_none());
    }
}
