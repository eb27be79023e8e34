//! Integration tests for the trade-API retry state machine, backed by a
//! mock exchange.

use pmm_core::{ExecInstructions, Order, OrderIdPrefix, OrderSide, Price, Size};
use pmm_exec::client::ApiCall;
use pmm_exec::{ExecError, ExecutorConfig, TradeClient};
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path, query_param_contains};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer) -> TradeClient {
    let mut cfg = ExecutorConfig::new(
        format!("{}/api/v1/", server.uri()),
        "test-key",
        "test-secret",
        OrderIdPrefix::new("mm_test_").unwrap(),
    );
    cfg.timeout = Duration::from_secs(5);
    cfg.max_retries = 3;
    cfg.retry_delay = Duration::from_millis(10);
    cfg.service_unavailable_delay = Duration::from_millis(10);
    cfg.connection_fault_delay = Duration::from_millis(10);
    TradeClient::new(cfg).unwrap()
}

fn sample_order() -> Order {
    Order::limit(
        "XBTUSD",
        OrderSide::Buy,
        Size::new(dec!(100)),
        Price::new(dec!(40000)),
        ExecInstructions::post_only(),
    )
}

#[tokio::test]
async fn requests_carry_auth_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/position"))
        .and(header_exists("api-key"))
        .and(header_exists("api-signature"))
        .and(header_exists("api-expires"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let value = client.execute(ApiCall::get("position")).await.unwrap();
    assert_eq!(value, json!([]));
}

#[tokio::test]
async fn delete_of_missing_order_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"message": "Not Found", "name": "HTTPError"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let ids = vec!["abc123".to_string()];
    client.cancel_orders(&ids).await.unwrap();
}

#[tokio::test]
async fn get_of_missing_resource_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/instrument"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client.execute(ApiCall::get("instrument")).await.unwrap_err();
    assert!(matches!(err, ExecError::NotFound { .. }));
    assert!(err.requires_restart());
}

#[tokio::test]
async fn service_unavailable_retries_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let value = client.execute(ApiCall::get("order")).await.unwrap();
    assert_eq!(value, json!([]));
}

#[tokio::test]
async fn post_gets_no_retry_budget_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .execute(ApiCall::post("order").body(json!({"symbol": "XBTUSD"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecError::MaxRetriesExceeded { max_retries: 0, .. }
    ));
}

#[tokio::test]
async fn retry_budget_is_per_call() {
    let server = MockServer::start().await;
    // Always 503: each call must exhaust its own full budget of 3, so
    // two sequential calls hit the server (1 + 3) * 2 times.
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(503))
        .expect(8)
        .mount(&server)
        .await;

    let client = test_client(&server);
    for _ in 0..2 {
        let err = client.execute(ApiCall::get("order")).await.unwrap_err();
        assert!(matches!(
            err,
            ExecError::MaxRetriesExceeded { max_retries: 3, .. }
        ));
    }
}

#[tokio::test]
async fn unauthorized_is_fatal_even_under_rethrow() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid API Key.", "name": "HTTPError"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .execute(ApiCall::get("order").rethrow())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::AuthenticationFailure(_)));
    assert!(err.requires_restart());
}

#[tokio::test]
async fn rethrow_downgrades_unhandled_status() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/order/bulk"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .execute(
            ApiCall::put("order/bulk")
                .body(json!({"orders": []}))
                .rethrow(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Propagated(_)));
    assert!(!err.requires_restart());
}

#[tokio::test]
async fn duplicate_clordid_recovers_when_fields_match() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order/bulk"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Duplicate clOrdID", "name": "HTTPError"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    // The recovery fetch filters by the submitted clOrdIDs; respond with
    // matching orders. The submitted ids are generated, so the mock
    // echoes whatever fields the robot submits except the ids, which the
    // robot matches by filter. We cannot know the generated id up front,
    // so serve the recovery through a catch-all GET and synthesize the
    // match from the filter parameter.
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .and(query_param_contains("filter", "clOrdID"))
        .respond_with(EchoFilteredOrders)
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let created = client.create_bulk_orders(&[sample_order()]).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].symbol, "XBTUSD");
    assert_eq!(created[0].order_qty, dec!(100));
}

/// Responds to the duplicate-recovery fetch with orders matching the
/// requested clOrdID filter, priced and sized like the sample order.
struct EchoFilteredOrders;

impl wiremock::Respond for EchoFilteredOrders {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let filter = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "filter")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        let parsed: serde_json::Value = serde_json::from_str(&filter).unwrap();
        let ids = parsed["clOrdID"].as_array().cloned().unwrap_or_default();
        let orders: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "orderID": "exch-1",
                    "clOrdID": id,
                    "symbol": "XBTUSD",
                    "side": "Buy",
                    "orderQty": 100,
                    "price": 40000,
                    "ordStatus": "New"
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(orders)
    }
}

#[tokio::test]
async fn duplicate_clordid_with_mismatched_fields_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order/bulk"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Duplicate clOrdID", "name": "HTTPError"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    // Recovery fetch returns an order at a different price.
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .respond_with(MismatchedOrders)
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .create_bulk_orders(&[sample_order()])
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::DuplicateMismatch { .. }));
    assert!(err.requires_restart());
}

struct MismatchedOrders;

impl wiremock::Respond for MismatchedOrders {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let filter = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "filter")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        let parsed: serde_json::Value = serde_json::from_str(&filter).unwrap();
        let ids = parsed["clOrdID"].as_array().cloned().unwrap_or_default();
        let orders: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "orderID": "exch-1",
                    "clOrdID": id,
                    "symbol": "XBTUSD",
                    "side": "Buy",
                    "orderQty": 100,
                    "price": 41000,
                    "ordStatus": "New"
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(orders)
    }
}

#[tokio::test]
async fn insufficient_balance_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order/bulk"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Account has insufficient Available Balance",
                "name": "ValidationError"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .create_bulk_orders(&[sample_order()])
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::InsufficientBalance(_)));
    assert!(err.requires_restart());
}

#[tokio::test]
async fn rate_limit_cancels_orders_and_retries() {
    let server = MockServer::start().await;
    // First create attempt:429 with an already-elapsed reset time.
    Mock::given(method("POST"))
        .and(path("/api/v1/order/bulk"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("x-ratelimit-reset", "0"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // The defensive flatten lists open orders and deletes the robot's.
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"orderID": "mine", "clOrdID": "mm_test_abc", "symbol": "XBTUSD",
             "side": "Buy", "orderQty": 50, "price": 39000, "ordStatus": "New"},
            {"orderID": "manual", "clOrdID": "", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 10, "price": 45000, "ordStatus": "New"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/order"))
        .and(wiremock::matchers::body_partial_json(json!({"orderID": ["mine"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    // Retried create succeeds.
    Mock::given(method("POST"))
        .and(path("/api/v1/order/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"orderID": "new-1", "clOrdID": "mm_test_new", "symbol": "XBTUSD",
             "side": "Buy", "orderQty": 100, "price": 40000, "ordStatus": "New"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let created = client.create_bulk_orders(&[sample_order()]).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].order_id.as_deref(), Some("new-1"));
}

#[tokio::test]
async fn open_orders_filters_to_robot_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/order"))
        .and(query_param_contains("filter", "isTerminated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"orderID": "a", "clOrdID": "mm_test_one", "symbol": "XBTUSD",
             "side": "Buy", "orderQty": 50, "price": 39000, "ordStatus": "New"},
            {"orderID": "b", "clOrdID": "other_bot_two", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 60, "price": 41000, "ordStatus": "New"},
            {"orderID": "c", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 70, "price": 42000, "ordStatus": "New"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let orders = client.http_open_orders().await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn create_bulk_applies_global_post_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order/bulk"))
        .and(wiremock::matchers::body_string_contains(
            "ParticipateDoNotInitiate",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"orderID": "x", "clOrdID": "mm_test_x", "symbol": "XBTUSD",
             "side": "Buy", "orderQty": 100, "price": 40000, "ordStatus": "New"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = ExecutorConfig::new(
        format!("{}/api/v1/", server.uri()),
        "test-key",
        "test-secret",
        OrderIdPrefix::new("mm_test_").unwrap(),
    );
    cfg.post_only = true;
    let client = TradeClient::new(cfg).unwrap();

    // Plain limit with no instructions set; the global flag adds one.
    let order = Order::limit(
        "XBTUSD",
        OrderSide::Buy,
        Size::new(dec!(100)),
        Price::new(dec!(40000)),
        ExecInstructions::default(),
    );
    let created = client.create_bulk_orders(&[order]).await.unwrap();
    assert_eq!(created.len(), 1);
}

#[tokio::test]
async fn amend_bulk_sends_put_and_parses_orders() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/order/bulk"))
        .and(wiremock::matchers::body_string_contains("\"orderID\":\"a\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"orderID": "a", "clOrdID": "mm_test_one", "symbol": "XBTUSD",
             "side": "Buy", "orderQty": 100, "price": 39500, "ordStatus": "New"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let cl_ord_id = pmm_core::ClientOrderId::generate(client.order_id_prefix());
    let mut amended = pmm_exec::ExchangeOrder::from_order(&sample_order(), cl_ord_id);
    amended.order_id = Some("a".to_string());
    amended.price = Some(dec!(39500));

    let orders = client.amend_bulk_orders(&[amended]).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].price, Some(dec!(39500)));
}
