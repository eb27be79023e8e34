//! Trade-API client with a fault-aware retry state machine.
//!
//! Each call runs `Sending -> {Succeeded | HttpError | Timeout |
//! ConnectionFault}`; recoverable faults loop back through `WaitingRetry`
//! until the call-scoped budget runs out. The consumed-retry counter is a
//! local of the in-flight call, never shared across unrelated calls.

use crate::error::{ExecError, ExecResult};
use crate::signature;
use chrono::Utc;
use pmm_core::OrderIdPrefix;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{error, info, warn};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Base URL including the API path prefix, e.g.
    /// `https://www.example.com/api/v1/`.
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Prefix scoping which live orders belong to this robot.
    pub order_id_prefix: OrderIdPrefix,
    /// Apply post-only to every created order.
    pub post_only: bool,
    /// Per-call request timeout.
    pub timeout: Duration,
    /// Retry budget for idempotent (GET/DELETE) calls.
    pub max_retries: u32,
    /// Delay between generic retries.
    pub retry_delay: Duration,
    /// Delay after HTTP 503 before retrying.
    pub service_unavailable_delay: Duration,
    /// Delay after a connection fault before retrying.
    pub connection_fault_delay: Duration,
}

impl ExecutorConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        order_id_prefix: OrderIdPrefix,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            order_id_prefix,
            post_only: false,
            timeout: Duration::from_secs(7),
            max_retries: 24,
            retry_delay: Duration::from_secs(300),
            service_unavailable_delay: Duration::from_secs(3),
            connection_fault_delay: Duration::from_secs(1),
        }
    }
}

/// One trade-API call.
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub verb: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Per-call retry budget override. Defaults to zero for POST/PUT
    /// (retrying a non-idempotent write can duplicate effects) and the
    /// configured budget for GET/DELETE.
    pub max_retries: Option<u32>,
    /// Surface hard faults to the caller instead of demanding a restart.
    pub rethrow_errors: bool,
}

impl ApiCall {
    pub fn new(verb: Method, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            query: Vec::new(),
            body: None,
            max_retries: None,
            rethrow_errors: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn rethrow(mut self) -> Self {
        self.rethrow_errors = true;
        self
    }

    fn payload_for_log(&self) -> String {
        self.body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(|| {
                serde_json::to_string(&self.query).unwrap_or_default()
            })
    }
}

/// Per-attempt outcome inside the state machine.
enum Attempt {
    Done(Value),
    Retry {
        why: &'static str,
        delay: Duration,
        /// Error to surface if this was the last permitted attempt.
        /// None falls back to `MaxRetriesExceeded`.
        terminal: Option<ExecError>,
    },
    Fail(ExecError),
}

/// Authenticated trade-API client.
pub struct TradeClient {
    http: Client,
    cfg: ExecutorConfig,
}

impl TradeClient {
    pub fn new(cfg: ExecutorConfig) -> ExecResult<Self> {
        let http = Client::builder()
            .timeout(cfg.timeout)
            .user_agent(format!("pmm-robot/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.cfg
    }

    pub fn order_id_prefix(&self) -> &OrderIdPrefix {
        &self.cfg.order_id_prefix
    }

    /// Execute a call under the retry policy.
    ///
    /// The retry counter lives in this stack frame; nested calls made
    /// during recovery (duplicate-clOrdID fetch, rate-limit cancel) carry
    /// their own budgets.
    pub async fn execute(&self, call: ApiCall) -> ExecResult<Value> {
        let budget = call.max_retries.unwrap_or_else(|| {
            if matches!(call.verb, Method::POST | Method::PUT) {
                0
            } else {
                self.cfg.max_retries
            }
        });

        let mut consumed = 0u32;
        loop {
            match self.attempt(&call).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry { why, delay, terminal } => {
                    consumed += 1;
                    if consumed > budget {
                        let err = terminal.unwrap_or_else(|| ExecError::MaxRetriesExceeded {
                            max_retries: budget,
                            path: call.path.clone(),
                            payload: call.payload_for_log(),
                        });
                        error!(%err, "Retry budget exhausted");
                        return Err(self.finish_error(&call, err));
                    }
                    warn!(
                        why,
                        attempt = consumed,
                        budget,
                        delay_ms = delay.as_millis() as u64,
                        path = %call.path,
                        "Retrying trade-API call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Fail(err) => {
                    error!(
                        %err,
                        verb = %call.verb,
                        path = %call.path,
                        payload = %call.payload_for_log(),
                        "Trade-API call failed"
                    );
                    return Err(self.finish_error(&call, err));
                }
            }
        }
    }

    /// Boxed recursion point for nested calls made inside recovery paths.
    fn execute_boxed<'a>(
        &'a self,
        call: ApiCall,
    ) -> Pin<Box<dyn Future<Output = ExecResult<Value>> + Send + 'a>> {
        Box::pin(self.execute(call))
    }

    /// Apply the caller's rethrow preference. Authentication failures are
    /// always fatal, even under rethrow.
    fn finish_error(&self, call: &ApiCall, err: ExecError) -> ExecError {
        if call.rethrow_errors
            && err.requires_restart()
            && !matches!(err, ExecError::AuthenticationFailure(_))
        {
            ExecError::Propagated(Box::new(err))
        } else {
            err
        }
    }

    /// One `Sending` transition: build, sign, send, classify.
    async fn attempt(&self, call: &ApiCall) -> Attempt {
        let request = match self.build_signed_request(call) {
            Ok(req) => req,
            Err(err) => return Attempt::Fail(err),
        };

        info!(
            verb = %call.verb,
            path = %call.path,
            payload = %call.payload_for_log(),
            "Sending trade-API request"
        );

        let response = match self.http.execute(request).await {
            Ok(resp) => resp,
            Err(err) if err.is_timeout() => {
                return Attempt::Retry {
                    why: "timeout",
                    delay: Duration::ZERO,
                    terminal: None,
                };
            }
            Err(err) if err.is_connect() => {
                return Attempt::Retry {
                    why: "connection fault",
                    delay: self.cfg.connection_fault_delay,
                    terminal: None,
                };
            }
            Err(err) => return Attempt::Fail(err.into()),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<Value>().await {
                Ok(value) => Attempt::Done(value),
                Err(err) => Attempt::Fail(err.into()),
            };
        }

        self.classify_http_error(call, status, response).await
    }

    async fn classify_http_error(
        &self,
        call: &ApiCall,
        status: StatusCode,
        response: reqwest::Response,
    ) -> Attempt {
        match status {
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                error!("API key or secret incorrect, please check and restart");
                Attempt::Fail(ExecError::AuthenticationFailure(body))
            }

            StatusCode::NOT_FOUND => {
                if call.verb == Method::DELETE {
                    // Order already cancelled or never existed; treat the
                    // delete as done.
                    warn!(payload = %call.payload_for_log(), "Order not found on delete");
                    Attempt::Done(Value::Null)
                } else {
                    Attempt::Retry {
                        why: "not found",
                        delay: self.cfg.retry_delay,
                        terminal: Some(ExecError::NotFound {
                            verb: call.verb.to_string(),
                            path: call.path.clone(),
                        }),
                    }
                }
            }

            StatusCode::TOO_MANY_REQUESTS => {
                let reset_delay = rate_limit_reset_delay(&response)
                    .unwrap_or(self.cfg.retry_delay);
                error!(
                    path = %call.path,
                    sleep_secs = reset_delay.as_secs(),
                    "Rate limited; cancelling all robot orders, then sleeping until reset"
                );
                // We may be waiting a long time; flatten exposure first.
                if let Err(err) = self.cancel_all_robot_orders_inner().await {
                    return Attempt::Fail(err);
                }
                Attempt::Retry {
                    why: "rate limited",
                    delay: reset_delay,
                    terminal: None,
                }
            }

            StatusCode::SERVICE_UNAVAILABLE => Attempt::Retry {
                why: "service unavailable",
                delay: self.cfg.service_unavailable_delay,
                terminal: None,
            },

            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                let message = extract_error_message(&body).to_lowercase();

                if message.contains("duplicate clordid") {
                    // Probably a redeploy re-submitting the same order;
                    // go fetch the order(s) and verify they match.
                    match self.recover_duplicate(call).await {
                        Ok(orders) => Attempt::Done(orders),
                        Err(err) => Attempt::Fail(err),
                    }
                } else if message.contains("insufficient available balance") {
                    error!(message = %message, "Account out of funds");
                    Attempt::Fail(ExecError::InsufficientBalance(message))
                } else {
                    Attempt::Fail(ExecError::UnhandledStatus {
                        status: status.as_u16(),
                        verb: call.verb.to_string(),
                        path: call.path.clone(),
                        body,
                    })
                }
            }

            other => {
                let body = response.text().await.unwrap_or_default();
                Attempt::Fail(ExecError::UnhandledStatus {
                    status: other.as_u16(),
                    verb: call.verb.to_string(),
                    path: call.path.clone(),
                    body,
                })
            }
        }
    }

    /// Duplicate clOrdID recovery: re-fetch the submitted orders by their
    /// client ids and verify quantity/side/price/symbol field-for-field.
    /// A mismatch is a consistency violation, not a retryable fault.
    async fn recover_duplicate(&self, call: &ApiCall) -> ExecResult<Value> {
        let submitted = submitted_orders(call).ok_or_else(|| {
            ExecError::InvalidResponse(
                "duplicate clOrdID reported on a call without an order payload".to_string(),
            )
        })?;

        let ids: Vec<&str> = submitted
            .iter()
            .filter_map(|o| o.get("clOrdID").and_then(Value::as_str))
            .collect();
        let filter = serde_json::json!({ "clOrdID": ids }).to_string();

        let fetched = self
            .execute_boxed(ApiCall::get("order").query("filter", filter))
            .await?;
        let fetched_orders = fetched
            .as_array()
            .ok_or_else(|| ExecError::InvalidResponse("order fetch was not an array".into()))?;

        for submitted_order in &submitted {
            let cl_ord_id = submitted_order.get("clOrdID").and_then(Value::as_str);
            let matched = fetched_orders.iter().find(|o| {
                o.get("clOrdID").and_then(Value::as_str) == cl_ord_id
            });
            let Some(found) = matched else {
                return Err(ExecError::DuplicateMismatch {
                    submitted: submitted_order.to_string(),
                    returned: "<no order with matching clOrdID>".to_string(),
                });
            };
            if !order_fields_match(submitted_order, found) {
                return Err(ExecError::DuplicateMismatch {
                    submitted: submitted_order.to_string(),
                    returned: found.to_string(),
                });
            }
        }

        info!(count = fetched_orders.len(), "Recovered from duplicate clOrdID");
        Ok(fetched)
    }

    /// Defensive flatten used on the 429 path: enumerate robot orders
    /// over HTTP (the stream cache may itself be stale under pressure)
    /// and delete them.
    async fn cancel_all_robot_orders_inner(&self) -> ExecResult<()> {
        let orders = self.http_open_orders_raw().await?;
        let ids: Vec<String> = orders
            .iter()
            .filter_map(|o| o.get("orderID").and_then(Value::as_str))
            .map(String::from)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        warn!(count = ids.len(), "Cancelling all known robot orders");
        self.execute_boxed(
            ApiCall::delete("order").body(serde_json::json!({ "orderID": ids })),
        )
        .await?;
        Ok(())
    }

    /// Raw open-order listing with the robot prefix filter applied
    /// client-side.
    pub(crate) async fn http_open_orders_raw(&self) -> ExecResult<Vec<Value>> {
        let filter = serde_json::json!({ "ordStatus.isTerminated": false }).to_string();
        let value = self
            .execute_boxed(
                ApiCall::get("order")
                    .query("filter", filter)
                    .query("count", "500"),
            )
            .await?;
        let all = value
            .as_array()
            .ok_or_else(|| ExecError::InvalidResponse("order list was not an array".into()))?;
        let prefix = self.cfg.order_id_prefix.as_str();
        Ok(all
            .iter()
            .filter(|o| {
                o.get("clOrdID")
                    .and_then(Value::as_str)
                    .is_some_and(|id| id.starts_with(prefix))
            })
            .cloned()
            .collect())
    }

    fn build_signed_request(&self, call: &ApiCall) -> ExecResult<reqwest::Request> {
        let url = format!("{}{}", self.cfg.base_url, call.path);
        let mut builder = self
            .http
            .request(call.verb.clone(), &url)
            .header("content-type", "application/json")
            .header("accept", "application/json");
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }
        let mut request = builder.build()?;

        let expires = Utc::now().timestamp() + self.cfg.timeout.as_secs() as i64 + 5;
        let path_and_query = match request.url().query() {
            Some(q) => format!("{}?{}", request.url().path(), q),
            None => request.url().path().to_string(),
        };
        let body_str = request
            .body()
            .and_then(|b| b.as_bytes())
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let sig = signature::sign(
            &self.cfg.api_secret,
            call.verb.as_str(),
            &path_and_query,
            expires,
            &body_str,
        );

        let headers = request.headers_mut();
        headers.insert("api-expires", header_value(&expires.to_string())?);
        headers.insert("api-key", header_value(&self.cfg.api_key)?);
        headers.insert("api-signature", header_value(&sig)?);

        Ok(request)
    }
}

fn header_value(s: &str) -> ExecResult<reqwest::header::HeaderValue> {
    s.parse().map_err(|_| {
        ExecError::InvalidResponse(format!("value not representable as a header: {s:?}"))
    })
}

/// Seconds until the exchange-declared rate-limit reset.
fn rate_limit_reset_delay(response: &reqwest::Response) -> Option<Duration> {
    let reset: i64 = response
        .headers()
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    let now = Utc::now().timestamp();
    Some(Duration::from_secs(reset.saturating_sub(now).max(0) as u64))
}

/// Pull `error.message` out of an error body, falling back to the raw
/// text.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

/// The order payloads submitted in a create/amend call, whether bulk or
/// single.
fn submitted_orders(call: &ApiCall) -> Option<Vec<Value>> {
    let body = call.body.as_ref()?;
    if let Some(orders) = body.get("orders").and_then(Value::as_array) {
        Some(orders.clone())
    } else if body.is_object() {
        Some(vec![body.clone()])
    } else {
        None
    }
}

/// Field-for-field comparison between a submitted payload and a fetched
/// order. Quantities and prices compare numerically, not textually.
fn order_fields_match(submitted: &Value, fetched: &Value) -> bool {
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec_field(v: &Value, key: &str) -> Option<Decimal> {
        match v.get(key)? {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        }
    }
    fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
        v.get(key).and_then(Value::as_str)
    }

    if dec_field(submitted, "orderQty") != dec_field(fetched, "orderQty") {
        return false;
    }
    if str_field(submitted, "side") != str_field(fetched, "side") {
        return false;
    }
    if str_field(submitted, "symbol") != str_field(fetched, "symbol") {
        return false;
    }
    // Stop orders carry stopPx instead of price; compare whichever the
    // submission used.
    if submitted.get("price").is_some() && dec_field(submitted, "price") != dec_field(fetched, "price")
    {
        return false;
    }
    if submitted.get("stopPx").is_some()
        && dec_field(submitted, "stopPx") != dec_field(fetched, "stopPx")
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_budget_by_verb() {
        let call = ApiCall::post("order/bulk");
        assert!(call.max_retries.is_none());
        assert!(matches!(call.verb, Method::POST));

        let call = ApiCall::get("order").retries(3);
        assert_eq!(call.max_retries, Some(3));
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"error":{"message":"Duplicate clOrdID","name":"HTTPError"}}"#;
        assert_eq!(extract_error_message(body), "Duplicate clOrdID");
        assert_eq!(extract_error_message("plain text"), "plain text");
    }

    #[test]
    fn test_order_fields_match_numeric_equivalence() {
        let submitted = json!({"orderQty": 10, "side": "Buy", "price": 100, "symbol": "XBTUSD"});
        let fetched = json!({"orderQty": 10.0, "side": "Buy", "price": 100.0, "symbol": "XBTUSD"});
        assert!(order_fields_match(&submitted, &fetched));
    }

    #[test]
    fn test_order_fields_mismatch_on_price() {
        let submitted = json!({"orderQty": 10, "side": "Buy", "price": 100, "symbol": "XBTUSD"});
        let fetched = json!({"orderQty": 10, "side": "Buy", "price": 101, "symbol": "XBTUSD"});
        assert!(!order_fields_match(&submitted, &fetched));
    }

    #[test]
    fn test_submitted_orders_bulk_and_single() {
        let bulk = ApiCall::post("order/bulk")
            .body(json!({"orders": [{"clOrdID": "a"}, {"clOrdID": "b"}]}));
        assert_eq!(submitted_orders(&bulk).unwrap().len(), 2);

        let single = ApiCall::post("order").body(json!({"clOrdID": "a"}));
        assert_eq!(submitted_orders(&single).unwrap().len(), 1);

        let none = ApiCall::get("order");
        assert!(submitted_orders(&none).is_none());
    }
}
