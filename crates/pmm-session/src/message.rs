//! Stream wire protocol: outbound requests and inbound message
//! classification.
//!
//! The exchange speaks a table-oriented protocol: every data push is
//! `{"table": ..., "action": partial|insert|update|delete, "data": [...]}`,
//! operation acknowledgements carry `success` plus an echo of the
//! request, and the first frame after connect is an `info` banner.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound operation request.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    pub op: String,
    pub args: Vec<Value>,
}

impl StreamRequest {
    pub fn subscribe(channels: &[String]) -> Self {
        Self {
            op: "subscribe".to_string(),
            args: channels.iter().cloned().map(Value::from).collect(),
        }
    }

    /// Authentication handshake: key, expiry, signature over the
    /// stream endpoint.
    pub fn auth(api_key: &str, expires: i64, signature: &str) -> Self {
        Self {
            op: "authKeyExpires".to_string(),
            args: vec![
                Value::from(api_key),
                Value::from(expires),
                Value::from(signature),
            ],
        }
    }
}

/// Table mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableAction {
    Partial,
    Insert,
    Update,
    Delete,
}

/// One table push, rows left untyped until routed by table name.
#[derive(Debug, Clone, Deserialize)]
pub struct TableMessage {
    pub table: String,
    pub action: TableAction,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Classified inbound frame.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// Server banner sent on connect.
    Welcome,
    /// Acknowledgement of a subscribe request.
    SubscribeAck { channel: String, success: bool },
    /// Acknowledgement of the authentication handshake.
    AuthAck { success: bool },
    /// A data push for one table.
    Table(TableMessage),
    /// Server-reported operation error.
    Error(String),
}

impl StreamMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(err) = value.get("error").and_then(Value::as_str) {
            return Ok(Self::Error(err.to_string()));
        }
        if value.get("info").is_some() {
            return Ok(Self::Welcome);
        }
        if let Some(success) = value.get("success").and_then(Value::as_bool) {
            if let Some(channel) = value.get("subscribe").and_then(Value::as_str) {
                return Ok(Self::SubscribeAck {
                    channel: channel.to_string(),
                    success,
                });
            }
            let is_auth = value
                .pointer("/request/op")
                .and_then(Value::as_str)
                .is_some_and(|op| op == "authKeyExpires");
            if is_auth {
                return Ok(Self::AuthAck { success });
            }
            // Unsubscribe and other op acks are uninteresting.
            return Ok(Self::Welcome);
        }

        let table: TableMessage = serde_json::from_value(value)?;
        Ok(Self::Table(table))
    }
}

/// Instrument table row. Carries both static metadata and the composite
/// ticker fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRow {
    pub symbol: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub tick_size: Option<Decimal>,
    #[serde(default)]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub bid_price: Option<Decimal>,
    #[serde(default)]
    pub ask_price: Option<Decimal>,
    #[serde(default)]
    pub mid_price: Option<Decimal>,
}

/// Position table row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRow {
    pub symbol: String,
    #[serde(default)]
    pub current_qty: Option<Decimal>,
    #[serde(default)]
    pub avg_entry_price: Option<Decimal>,
}

/// Margin table row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginRow {
    #[serde(default)]
    pub wallet_balance: Option<Decimal>,
}

/// Order table row.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRow {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "clOrdID", default)]
    pub cl_ord_id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(rename = "orderQty", default)]
    pub order_qty: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(rename = "stopPx", default)]
    pub stop_px: Option<Decimal>,
    #[serde(rename = "ordType", default)]
    pub ord_type: Option<String>,
    #[serde(rename = "execInst", default)]
    pub exec_inst: Option<String>,
    #[serde(rename = "ordStatus", default)]
    pub ord_status: Option<String>,
    #[serde(rename = "leavesQty", default)]
    pub leaves_qty: Option<Decimal>,
}

impl OrderRow {
    /// Terminal order states no longer count as live.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.ord_status.as_deref(),
            Some("Filled") | Some("Canceled") | Some("Rejected") | Some("Expired")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_welcome() {
        let msg = StreamMessage::parse(r#"{"info":"Welcome to the realtime API.","version":"1.0"}"#)
            .unwrap();
        assert!(matches!(msg, StreamMessage::Welcome));
    }

    #[test]
    fn test_parse_subscribe_ack() {
        let msg = StreamMessage::parse(
            r#"{"success":true,"subscribe":"instrument:XBTUSD","request":{"op":"subscribe"}}"#,
        )
        .unwrap();
        match msg {
            StreamMessage::SubscribeAck { channel, success } => {
                assert_eq!(channel, "instrument:XBTUSD");
                assert!(success);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_auth_ack() {
        let msg = StreamMessage::parse(
            r#"{"success":true,"request":{"op":"authKeyExpires","args":["key",1,"sig"]}}"#,
        )
        .unwrap();
        assert!(matches!(msg, StreamMessage::AuthAck { success: true }));
    }

    #[test]
    fn test_parse_error() {
        let msg = StreamMessage::parse(r#"{"error":"Invalid signature.","status":401}"#).unwrap();
        match msg {
            StreamMessage::Error(text) => assert_eq!(text, "Invalid signature."),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_table_update() {
        let msg = StreamMessage::parse(
            r#"{"table":"instrument","action":"update","data":[{"symbol":"XBTUSD","lastPrice":40123.5,"midPrice":40121.25}]}"#,
        )
        .unwrap();
        let StreamMessage::Table(table) = msg else {
            panic!("expected table message");
        };
        assert_eq!(table.table, "instrument");
        assert_eq!(table.action, TableAction::Update);
        let row: InstrumentRow = serde_json::from_value(table.data[0].clone()).unwrap();
        assert_eq!(row.last_price, Some(dec!(40123.5)));
        assert_eq!(row.mid_price, Some(dec!(40121.25)));
        assert!(row.state.is_none());
    }

    #[test]
    fn test_order_row_terminal_states() {
        let row: OrderRow = serde_json::from_value(serde_json::json!({
            "orderID": "a", "ordStatus": "Canceled"
        }))
        .unwrap();
        assert!(row.is_terminal());

        let row: OrderRow = serde_json::from_value(serde_json::json!({
            "orderID": "a", "ordStatus": "New"
        }))
        .unwrap();
        assert!(!row.is_terminal());
    }

    #[test]
    fn test_auth_request_shape() {
        let req = StreamRequest::auth("key", 1718000000, "cafe");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "authKeyExpires");
        assert_eq!(json["args"][1], 1718000000);
    }
}
