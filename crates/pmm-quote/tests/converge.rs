//! Convergence behavior against a mock exchange.

use pmm_core::{OrderIdPrefix, QuotingSide};
use pmm_exec::{ExecutorConfig, TradeClient};
use pmm_quote::{OrderMakerStrategy, QuoteError, QuoteParams, QuotingEngine};
use pmm_session::MarketState;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(server: &MockServer, market: Arc<MarketState>) -> QuotingEngine<OrderMakerStrategy> {
    let cfg = ExecutorConfig::new(
        format!("{}/api/v1/", server.uri()),
        "test-key",
        "test-secret",
        OrderIdPrefix::new("mm_robot_").unwrap(),
    );
    let client = Arc::new(TradeClient::new(cfg).unwrap());
    QuotingEngine::new(OrderMakerStrategy::new(), client, market)
}

fn params() -> QuoteParams {
    QuoteParams {
        quoting_side: QuotingSide::Both,
        live_mode: false,
        atr_pct_5m: dec!(0.002),
        min_position: dec!(-220000),
        max_position: dec!(200000),
    }
}

fn apply(market: &MarketState, table: &str, action: &str, data: serde_json::Value) {
    let msg = serde_json::from_value(json!({
        "table": table,
        "action": action,
        "data": data,
    }))
    .unwrap();
    market.apply(&msg);
}

fn seed_open_market(market: &MarketState) {
    apply(
        market,
        "instrument",
        "partial",
        json!([{
            "symbol": "XBTUSD", "state": "Open", "tickSize": 0.5,
            "lastPrice": 20000, "bidPrice": 19999.5, "askPrice": 20000.5,
            "midPrice": 20000
        }]),
    );
}

#[tokio::test]
async fn matching_live_orders_issue_no_calls() {
    let server = MockServer::start().await;
    let market = Arc::new(MarketState::new());
    seed_open_market(&market);
    apply(
        &market,
        "position",
        "partial",
        json!([{"symbol": "XBTUSD", "currentQty": 5, "avgEntryPrice": 20000}]),
    );
    // Exactly the TP/SL pair the strategy would compute.
    apply(
        &market,
        "order",
        "partial",
        json!([
            {"orderID": "tp", "clOrdID": "mm_robot_tp", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 5, "price": 20240,
             "ordType": "Limit", "ordStatus": "New"},
            {"orderID": "sl", "clOrdID": "mm_robot_sl", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 5, "stopPx": 19920,
             "ordType": "Stop", "ordStatus": "New"}
        ]),
    );

    // No mocks mounted: any HTTP call would fail the cycle.
    let engine = engine(&server, market);
    let replaced = engine.run_cycle("XBTUSD", &params()).await.unwrap();
    assert!(!replaced);
}

#[tokio::test]
async fn position_flip_replaces_all_orders() {
    let server = MockServer::start().await;
    let market = Arc::new(MarketState::new());
    seed_open_market(&market);
    // Stale flat ladder still resting while the position is now long 5.
    apply(
        &market,
        "position",
        "partial",
        json!([{"symbol": "XBTUSD", "currentQty": 5, "avgEntryPrice": 20000}]),
    );
    apply(
        &market,
        "order",
        "partial",
        json!([
            {"orderID": "stale-buy", "clOrdID": "mm_robot_b", "symbol": "XBTUSD",
             "side": "Buy", "orderQty": 200000, "price": 19980,
             "ordType": "Limit", "ordStatus": "New"},
            {"orderID": "stale-sell", "clOrdID": "mm_robot_s", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 220000, "price": 20020,
             "ordType": "Limit", "ordStatus": "New"}
        ]),
    );

    Mock::given(method("DELETE"))
        .and(path("/api/v1/order"))
        .and(body_string_contains("stale-buy"))
        .and(body_string_contains("stale-sell"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order/bulk"))
        .and(body_string_contains("\"ordType\":\"Stop\""))
        .and(body_string_contains("\"orderQty\":\"5\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"orderID": "tp", "clOrdID": "mm_robot_tp", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 5, "price": 20240, "ordStatus": "New"},
            {"orderID": "sl", "clOrdID": "mm_robot_sl", "symbol": "XBTUSD",
             "side": "Sell", "orderQty": 5, "stopPx": 19920, "ordStatus": "New"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server, market);
    let replaced = engine.run_cycle("XBTUSD", &params()).await.unwrap();
    assert!(replaced);
}

#[tokio::test]
async fn empty_book_skips_cycle_without_calls() {
    let server = MockServer::start().await;
    let market = Arc::new(MarketState::new());
    // Instrument present but no mid price: the book is empty.
    apply(
        &market,
        "instrument",
        "partial",
        json!([{
            "symbol": "XBTUSD", "state": "Open", "tickSize": 0.5,
            "lastPrice": 20000, "bidPrice": 19999.5, "askPrice": 20000.5
        }]),
    );

    let engine = engine(&server, market);
    let err = engine.run_cycle("XBTUSD", &params()).await.unwrap_err();
    assert!(matches!(err, QuoteError::MarketEmpty(_)));
    assert!(err.skips_cycle());
}

#[tokio::test]
async fn unlisted_market_skips_cycle() {
    let server = MockServer::start().await;
    let market = Arc::new(MarketState::new());
    apply(
        &market,
        "instrument",
        "partial",
        json!([{
            "symbol": "XBTUSD", "state": "Unlisted", "tickSize": 0.5,
            "lastPrice": 20000, "bidPrice": 19999.5, "askPrice": 20000.5,
            "midPrice": 20000
        }]),
    );

    let engine = engine(&server, market);
    let err = engine.run_cycle("XBTUSD", &params()).await.unwrap_err();
    assert!(matches!(err, QuoteError::MarketClosed { .. }));
    assert!(err.skips_cycle());
}

#[tokio::test]
async fn missing_instrument_skips_cycle() {
    let server = MockServer::start().await;
    let market = Arc::new(MarketState::new());
    let engine = engine(&server, market);
    let err = engine.run_cycle("XBTUSD", &params()).await.unwrap_err();
    assert!(matches!(err, QuoteError::MissingData { .. }));
}
