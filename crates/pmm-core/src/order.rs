//! Order model and robot order identification.
//!
//! Orders are owned by the robot only if their client order id carries the
//! configured prefix; this is what separates robot orders from manually
//! placed orders sharing the same account.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of the configured client order id prefix.
pub const MAX_ORDER_ID_PREFIX_LEN: usize = 13;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Buy" => Ok(Self::Buy),
            "Sell" => Ok(Self::Sell),
            other => Err(CoreError::InvalidInstrument(format!(
                "unknown order side: {other:?}"
            ))),
        }
    }
}

/// Order type.
///
/// Stop orders carry a trigger price instead of a limit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Stop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "Limit"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// Execution instructions attached to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecInstructions {
    /// Reject taker execution, ensuring maker-side fees
    /// (ParticipateDoNotInitiate).
    pub post_only: bool,
    /// The order can only shrink, never grow, an existing position.
    pub reduce_only: bool,
    /// Close the position when triggered, priced off the last trade
    /// (Close,LastPrice). Used for stop exits.
    pub close_on_trigger: bool,
}

impl ExecInstructions {
    pub fn post_only() -> Self {
        Self {
            post_only: true,
            ..Default::default()
        }
    }

    pub fn exit_limit() -> Self {
        Self {
            post_only: true,
            reduce_only: true,
            close_on_trigger: false,
        }
    }

    pub fn exit_stop() -> Self {
        Self {
            post_only: false,
            reduce_only: false,
            close_on_trigger: true,
        }
    }

    /// Render the comma-joined wire representation, or None if no
    /// instructions are set.
    pub fn to_wire(&self) -> Option<String> {
        let mut parts = Vec::new();
        if self.post_only {
            parts.push("ParticipateDoNotInitiate");
        }
        if self.reduce_only {
            parts.push("ReduceOnly");
        }
        if self.close_on_trigger {
            parts.push("Close");
            parts.push("LastPrice");
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    /// Parse the wire representation back into flags.
    pub fn from_wire(s: &str) -> Self {
        let mut insts = Self::default();
        for part in s.split(',') {
            match part.trim() {
                "ParticipateDoNotInitiate" => insts.post_only = true,
                "ReduceOnly" => insts.reduce_only = true,
                "Close" => insts.close_on_trigger = true,
                _ => {}
            }
        }
        insts
    }
}

/// Validated client order id prefix.
///
/// The exchange caps the usable prefix at 13 characters so the generated
/// suffix still fits in the clOrdID field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderIdPrefix(String);

impl OrderIdPrefix {
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.len() > MAX_ORDER_ID_PREFIX_LEN {
            return Err(CoreError::InvalidOrderIdPrefix(format!(
                "prefix must be 1-{MAX_ORDER_ID_PREFIX_LEN} characters, got {:?}",
                prefix
            )));
        }
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrderIdPrefix {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<OrderIdPrefix> for String {
    fn from(p: OrderIdPrefix) -> Self {
        p.0
    }
}

impl fmt::Display for OrderIdPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-assigned order identifier.
///
/// Used to detect duplicate submissions and to scope which live orders
/// belong to this robot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Generate a fresh id: configured prefix + base64(uuid), padding
    /// stripped.
    pub fn generate(prefix: &OrderIdPrefix) -> Self {
        let raw = BASE64.encode(Uuid::new_v4().as_bytes());
        let body = raw.trim_end_matches('=');
        Self(format!("{}{}", prefix.as_str(), body))
    }

    /// Create from an existing string (for parsing responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id belongs to the robot with the given prefix.
    pub fn has_prefix(&self, prefix: &OrderIdPrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A desired order, before submission.
///
/// Limit orders carry `price`, stop orders carry `stop_price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Size,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub order_type: OrderType,
    pub exec_insts: ExecInstructions,
}

impl Order {
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Size,
        price: Price,
        exec_insts: ExecInstructions,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price: Some(price),
            stop_price: None,
            order_type: OrderType::Limit,
            exec_insts,
        }
    }

    pub fn stop(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Size,
        stop_price: Price,
        exec_insts: ExecInstructions,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
            stop_price: Some(stop_price),
            order_type: OrderType::Stop,
            exec_insts,
        }
    }
}
