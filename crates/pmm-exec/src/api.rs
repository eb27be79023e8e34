//! Typed trade-API operations over [`TradeClient`].

use crate::client::{ApiCall, TradeClient};
use crate::error::{ExecError, ExecResult};
use pmm_core::{ClientOrderId, Order, OrderType, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Order as the exchange represents it on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    #[serde(rename = "orderID", default)]
    pub order_id: Option<String>,
    #[serde(rename = "clOrdID", default)]
    pub cl_ord_id: Option<String>,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "orderQty")]
    pub order_qty: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(rename = "stopPx", default, skip_serializing_if = "Option::is_none")]
    pub stop_px: Option<Decimal>,
    #[serde(rename = "ordType", default, skip_serializing_if = "Option::is_none")]
    pub ord_type: Option<String>,
    #[serde(rename = "execInst", default, skip_serializing_if = "Option::is_none")]
    pub exec_inst: Option<String>,
    #[serde(rename = "ordStatus", default, skip_serializing_if = "Option::is_none")]
    pub ord_status: Option<String>,
}

impl ExchangeOrder {
    /// Wire form of a new order, stamped with a fresh prefixed clOrdID.
    pub fn from_order(order: &Order, cl_ord_id: ClientOrderId) -> Self {
        let ord_type = match order.order_type {
            OrderType::Limit => "Limit",
            OrderType::Stop => "Stop",
        };
        Self {
            order_id: None,
            cl_ord_id: Some(cl_ord_id.as_str().to_string()),
            symbol: order.symbol.clone(),
            side: order.side.to_string(),
            order_qty: order.quantity.inner(),
            price: order.price.map(|p| p.inner()),
            stop_px: order.stop_price.map(|p| p.inner()),
            ord_type: Some(ord_type.to_string()),
            exec_inst: order.exec_insts.to_wire(),
            ord_status: None,
        }
    }

    pub fn price_typed(&self) -> Option<Price> {
        self.price.map(Price::new)
    }

    pub fn stop_px_typed(&self) -> Option<Price> {
        self.stop_px.map(Price::new)
    }

    pub fn quantity_typed(&self) -> Size {
        Size::new(self.order_qty)
    }
}

impl TradeClient {
    /// Submit a batch of orders in one request.
    ///
    /// Bulk creation is the convergence primitive, so unlike single
    /// writes it gets the full retry budget: the duplicate-clOrdID
    /// recovery path makes re-submission safe.
    pub async fn create_bulk_orders(&self, orders: &[Order]) -> ExecResult<Vec<ExchangeOrder>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let wire: Vec<ExchangeOrder> = orders
            .iter()
            .map(|o| {
                let mut wire = ExchangeOrder::from_order(
                    o,
                    ClientOrderId::generate(self.order_id_prefix()),
                );
                if self.config().post_only && o.order_type == OrderType::Limit {
                    wire.exec_inst = Some(merge_exec_inst(
                        wire.exec_inst.as_deref(),
                        "ParticipateDoNotInitiate",
                    ));
                }
                wire
            })
            .collect();
        info!(count = wire.len(), "Creating orders");
        let body = serde_json::json!({ "orders": wire });
        let value = self
            .execute(
                ApiCall::post("order/bulk")
                    .body(body)
                    .retries(self.config().max_retries),
            )
            .await?;
        parse_orders(value)
    }

    /// Amend a batch of live orders in place.
    ///
    /// Amendments race against fills, so hard faults here are surfaced
    /// to the caller for a reconcile pass rather than forcing a restart.
    pub async fn amend_bulk_orders(&self, orders: &[ExchangeOrder]) -> ExecResult<Vec<ExchangeOrder>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = orders.len(), "Amending orders");
        let body = serde_json::json!({ "orders": orders });
        let value = self
            .execute(
                ApiCall::put("order/bulk")
                    .body(body)
                    .retries(self.config().max_retries)
                    .rethrow(),
            )
            .await?;
        parse_orders(value)
    }

    /// Live robot orders per the exchange, filtered to this robot's
    /// clOrdID prefix.
    pub async fn http_open_orders(&self) -> ExecResult<Vec<ExchangeOrder>> {
        let raw = self.http_open_orders_raw().await?;
        raw.into_iter()
            .map(|v| serde_json::from_value(v).map_err(ExecError::from))
            .collect()
    }

    /// Cancel specific orders by exchange id.
    pub async fn cancel_orders(&self, order_ids: &[String]) -> ExecResult<()> {
        if order_ids.is_empty() {
            return Ok(());
        }
        info!(count = order_ids.len(), "Cancelling orders");
        self.execute(
            ApiCall::delete("order").body(serde_json::json!({ "orderID": order_ids })),
        )
        .await?;
        Ok(())
    }

    /// Cancel every live order carrying this robot's prefix.
    pub async fn cancel_all_robot_orders(&self) -> ExecResult<()> {
        let open = self.http_open_orders().await?;
        let ids: Vec<String> = open.into_iter().filter_map(|o| o.order_id).collect();
        self.cancel_orders(&ids).await
    }
}

fn merge_exec_inst(existing: Option<&str>, inst: &str) -> String {
    match existing {
        Some(cur) if cur.split(',').any(|p| p == inst) => cur.to_string(),
        Some(cur) if !cur.is_empty() => format!("{cur},{inst}"),
        _ => inst.to_string(),
    }
}

fn parse_orders(value: Value) -> ExecResult<Vec<ExchangeOrder>> {
    // A delete recovered as already-gone yields null; map it to empty.
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value).map_err(ExecError::from)
}
