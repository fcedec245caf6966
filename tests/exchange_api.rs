// tests/exchange_api.rs
//
// Drives the real ApiClient, handles and acquisition engine against an
// in-process fake exchange served by axum on an ephemeral port.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use chock_rs::api::client::{ClientOptions, Credentials};
use chock_rs::daemon::{AccountHandle, InstrumentHandle};
use chock_rs::engine::acquisition::{AcquisitionConfig, AcquisitionEngine, Outcome};
use chock_rs::engine::retry::RetryPolicy;
use chock_rs::engine::types::{Direction, OrderRequest, OrderStatus, OrderType};
use chock_rs::{ApiClient, ApiError};

const API_KEY: &str = "test-api-key";
const ACCOUNT: &str = "EXB123456";

type Reply = (StatusCode, Json<Value>);

#[derive(Default)]
struct FakeExchange {
    // live venue -> listed symbols
    venues: HashMap<String, Vec<String>>,
    // venues whose account order listing blows up
    broken_orders: Vec<String>,
    // listed venues that currently answer 404
    dark: Mutex<HashSet<String>>,
    listing_requests: AtomicUsize,
    quotes: Mutex<VecDeque<Value>>,
    default_quote: Value,
    // per-order cap on how much an IOC order fills; empty = fill everything
    fill_caps: Mutex<VecDeque<u64>>,
    orders: Mutex<Vec<Value>>,
    posted_bodies: Mutex<Vec<Value>>,
    auth_headers: Mutex<Vec<String>>,
    query_accounts: Mutex<Vec<String>>,
}

impl FakeExchange {
    fn new() -> Self {
        let mut venues = HashMap::new();
        venues.insert("TESTEX".to_string(), vec!["FOOBAR".to_string(), "BAZ".to_string()]);
        venues.insert("BROKEX".to_string(), vec!["QUX".to_string()]);
        Self {
            venues,
            broken_orders: vec!["BROKEX".to_string()],
            default_quote: json!({"ok": true, "symbol": "FOOBAR", "venue": "TESTEX",
                "ask": 10, "askSize": 50, "askDepth": 50, "bidSize": 0, "bidDepth": 0}),
            ..Self::default()
        }
    }

    fn record(&self, headers: &HeaderMap, query: &HashMap<String, String>) {
        if let Some(v) = headers.get("x-starfighter-authorization") {
            self.auth_headers.lock().push(v.to_str().unwrap_or_default().to_string());
        }
        if let Some(account) = query.get("account") {
            self.query_accounts.lock().push(account.clone());
        }
    }
}

fn ok(value: Value) -> Reply {
    (StatusCode::OK, Json(value))
}

fn fail(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({"ok": false, "error": message})))
}

async fn heartbeat(State(ex): State<Arc<FakeExchange>>, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Reply {
    ex.record(&headers, &q);
    ok(json!({"ok": true, "error": ""}))
}

async fn stocks(
    State(ex): State<Arc<FakeExchange>>,
    Path(venue): Path<String>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Reply {
    ex.record(&headers, &q);
    ex.listing_requests.fetch_add(1, Ordering::SeqCst);
    if ex.dark.lock().contains(&venue) {
        return fail(StatusCode::NOT_FOUND, &format!("No venue exists with the symbol {venue}"));
    }
    match ex.venues.get(&venue) {
        Some(symbols) => {
            let listed: Vec<Value> = symbols.iter().map(|s| json!({"name": format!("{s} Inc"), "symbol": s})).collect();
            ok(json!({"ok": true, "symbols": listed}))
        }
        None => fail(StatusCode::NOT_FOUND, &format!("No venue exists with the symbol {venue}")),
    }
}

async fn order_book(State(ex): State<Arc<FakeExchange>>, Path((venue, stock)): Path<(String, String)>) -> Reply {
    if !ex.venues.get(&venue).is_some_and(|s| s.contains(&stock)) {
        return fail(StatusCode::NOT_FOUND, &format!("Stock {stock} does not trade on venue {venue}"));
    }
    ok(json!({"ok": true, "venue": venue, "symbol": stock,
        "bids": [{"price": 90, "qty": 5, "isBuy": true}, {"price": 95, "qty": 3, "isBuy": true}],
        "asks": null, "ts": "2015-12-04T09:02:16.680986205Z"}))
}

async fn quote(
    State(ex): State<Arc<FakeExchange>>,
    Path((venue, stock)): Path<(String, String)>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Reply {
    ex.record(&headers, &q);
    if !ex.venues.get(&venue).is_some_and(|s| s.contains(&stock)) {
        return fail(StatusCode::NOT_FOUND, &format!("Stock {stock} does not trade on venue {venue}"));
    }
    let next = ex.quotes.lock().pop_front();
    ok(next.unwrap_or_else(|| ex.default_quote.clone()))
}

async fn place_order(
    State(ex): State<Arc<FakeExchange>>,
    Path((venue, stock)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Reply {
    ex.posted_bodies.lock().push(body.clone());
    let qty = body["qty"].as_u64().unwrap_or(0);
    let price = body["price"].as_u64().unwrap_or(0);
    let order_type = body["orderType"].as_str().unwrap_or("limit").to_string();
    let filled = match order_type.as_str() {
        "immediate-or-cancel" => qty.min(ex.fill_caps.lock().pop_front().unwrap_or(u64::MAX)),
        _ => 0,
    };
    let mut orders = ex.orders.lock();
    let id = orders.len() as u64 + 1;
    let fills: Vec<Value> = if filled > 0 {
        vec![json!({"price": price, "qty": filled, "ts": "2015-12-04T09:02:16.680986205Z"})]
    } else {
        vec![]
    };
    let order = json!({
        "symbol": stock, "venue": venue, "direction": body["direction"], "originalQty": qty,
        "qty": qty - filled, "price": price, "orderType": order_type, "id": id,
        "account": body["account"], "ts": "2015-12-04T09:02:16.680986205Z", "fills": fills,
        "totalFilled": filled, "open": order_type == "limit"
    });
    orders.push(order.clone());
    let mut reply = order;
    reply["ok"] = json!(true);
    ok(reply)
}

async fn order_status(State(ex): State<Arc<FakeExchange>>, Path((_venue, _stock, id)): Path<(String, String, u64)>) -> Reply {
    match ex.orders.lock().get((id as usize).wrapping_sub(1)) {
        Some(order) => {
            let mut reply = order.clone();
            reply["ok"] = json!(true);
            ok(reply)
        }
        None => fail(StatusCode::NOT_FOUND, &format!("No order {id}")),
    }
}

async fn cancel(State(ex): State<Arc<FakeExchange>>, Path((_venue, _stock, id)): Path<(String, String, u64)>) -> Reply {
    let mut orders = ex.orders.lock();
    match orders.get_mut((id as usize).wrapping_sub(1)) {
        Some(order) => {
            order["open"] = json!(false);
            order["qty"] = json!(0);
            let mut reply = order.clone();
            reply["ok"] = json!(true);
            ok(reply)
        }
        None => fail(StatusCode::UNAUTHORIZED, &format!("You don't own order {id}")),
    }
}

async fn account_orders(
    State(ex): State<Arc<FakeExchange>>,
    Path((venue, account)): Path<(String, String)>,
) -> Reply {
    if ex.broken_orders.contains(&venue) {
        return fail(StatusCode::INTERNAL_SERVER_ERROR, "boom");
    }
    let orders: Vec<Value> = ex
        .orders
        .lock()
        .iter()
        .filter(|o| o["venue"] == json!(venue) && o["account"] == json!(account))
        .cloned()
        .collect();
    ok(json!({"ok": true, "venue": venue, "orders": orders}))
}

async fn slow() -> Reply {
    tokio::time::sleep(Duration::from_secs(3)).await;
    ok(json!({"ok": true}))
}

async fn serve(exchange: Arc<FakeExchange>) -> String {
    let app = Router::new()
        .route("/ob/api/heartbeat", get(heartbeat))
        .route("/ob/api/slow", get(slow))
        .route("/ob/api/venues/:venue/stocks", get(stocks))
        .route("/ob/api/venues/:venue/stocks/:stock", get(order_book))
        .route("/ob/api/venues/:venue/stocks/:stock/quote", get(quote))
        .route("/ob/api/venues/:venue/stocks/:stock/orders", post(place_order))
        .route("/ob/api/venues/:venue/stocks/:stock/orders/:id", get(order_status))
        .route("/ob/api/venues/:venue/stocks/:stock/orders/:id/cancel", post(cancel))
        .route("/ob/api/venues/:venue/accounts/:account/orders", get(account_orders))
        .with_state(exchange);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/ob/api")
}

fn client_for(base_url: String, timeout: Duration) -> Arc<ApiClient> {
    let creds = Credentials::new(API_KEY, ACCOUNT).unwrap();
    Arc::new(ApiClient::new(creds, ClientOptions { base_url, timeout }).unwrap())
}

async fn setup() -> (Arc<FakeExchange>, AccountHandle) {
    setup_with(FakeExchange::new()).await
}

async fn setup_with(exchange: FakeExchange) -> (Arc<FakeExchange>, AccountHandle) {
    let exchange = Arc::new(exchange);
    let base = serve(exchange.clone()).await;
    (exchange, AccountHandle::new(client_for(base, Duration::from_secs(5))))
}

async fn foobar(account: &AccountHandle) -> Arc<InstrumentHandle> {
    account.spawn_instrument_handles(&["TESTEX"]).await;
    account.instrument("TESTEX", "FOOBAR").expect("FOOBAR discovered")
}

#[tokio::test]
async fn every_request_is_authenticated_and_scoped_to_the_account() {
    let (exchange, account) = setup().await;
    assert!(account.is_service_up().await);

    let stock = foobar(&account).await;
    stock.get_quote().await.unwrap();
    let request = OrderRequest::new(7, OrderType::Limit).unwrap().with_price(42);
    stock.post_order(request).await.unwrap();

    let headers = exchange.auth_headers.lock().clone();
    assert!(!headers.is_empty());
    assert!(headers.iter().all(|h| h == API_KEY));
    assert!(exchange.query_accounts.lock().iter().all(|a| a == ACCOUNT));

    let body = exchange.posted_bodies.lock()[0].clone();
    assert_eq!(
        body,
        json!({"account": ACCOUNT, "venue": "TESTEX", "stock": "FOOBAR", "price": 42,
               "qty": 7, "direction": "buy", "orderType": "limit"})
    );
}

#[tokio::test]
async fn dead_venue_is_silently_left_out() {
    let (_exchange, account) = setup().await;

    let table = account.spawn_instrument_handles(&["TESTEX", "DEAD"]).await;
    assert!(table.contains_key("TESTEX"));
    assert!(!table.contains_key("DEAD"));
    let mut symbols: Vec<_> = table["TESTEX"].keys().cloned().collect();
    symbols.sort();
    assert_eq!(symbols, vec!["BAZ", "FOOBAR"]);

    assert!(!account.is_venue_up("DEAD").await);
    assert_eq!(
        account.discover_instruments("DEAD").await,
        Err(ApiError::VenueUnavailable { venue: "DEAD".into() })
    );
    assert_eq!(account.venues(), vec!["TESTEX"]);
}

#[tokio::test]
async fn venue_that_goes_down_is_dropped_from_the_table() {
    let (exchange, account) = setup().await;
    foobar(&account).await;
    assert_eq!(account.venues(), vec!["TESTEX"]);

    exchange.dark.lock().insert("TESTEX".to_string());
    let table = account.spawn_instrument_handles(&["TESTEX"]).await;

    assert!(table.is_empty());
    assert!(account.venues().is_empty());
    assert!(account.instrument("TESTEX", "FOOBAR").is_none());
    assert!(account.all_order_statuses().await.is_empty());
}

#[tokio::test]
async fn discovery_lists_a_venue_with_one_request() {
    let (exchange, account) = setup().await;

    let mut symbols = account.discover_instruments("TESTEX").await.unwrap();
    symbols.sort();
    assert_eq!(symbols, vec!["BAZ", "FOOBAR"]);
    assert_eq!(exchange.listing_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_discovery_reuses_handles() {
    let (_exchange, account) = setup().await;

    let first = account.spawn_instrument_handles(&["TESTEX"]).await;
    let second = account.spawn_instrument_handles(&["TESTEX"]).await;

    let mut a: Vec<_> = first["TESTEX"].keys().collect();
    let mut b: Vec<_> = second["TESTEX"].keys().collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert!(Arc::ptr_eq(&first["TESTEX"]["FOOBAR"], &second["TESTEX"]["FOOBAR"]));
    assert_eq!(first["TESTEX"]["FOOBAR"].to_string(), "TESTEX: FOOBAR");
}

#[tokio::test]
async fn fan_out_keeps_per_venue_failures() {
    let (_exchange, account) = setup().await;
    let stock = foobar(&account).await;
    account.spawn_instrument_handles(&["BROKEX"]).await;
    stock.post_order(OrderRequest::new(3, OrderType::Limit).unwrap()).await.unwrap();

    let statuses = account.all_order_statuses().await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses["TESTEX"].as_ref().unwrap().len(), 1);
    assert_eq!(
        statuses["BROKEX"],
        Err(ApiError::Rejected { status: 500, message: "boom".into() })
    );

    let single = account.venue_order_statuses("TESTEX").await.unwrap();
    assert_eq!(single[0].symbol, "FOOBAR");
}

#[tokio::test]
async fn order_lifecycle_passes_service_answers_through() {
    let (_exchange, account) = setup().await;
    let stock = foobar(&account).await;
    let baz = account.instrument("TESTEX", "BAZ").unwrap();

    let request = OrderRequest::new(100, OrderType::Limit).unwrap().with_price(5100).with_direction(Direction::Sell);
    let placed = stock.post_order(request).await.unwrap();
    baz.post_order(OrderRequest::new(1, OrderType::Limit).unwrap()).await.unwrap();
    assert_eq!(placed.status(), OrderStatus::Open);
    assert_eq!(placed.direction, Direction::Sell);

    let status = stock.get_order_status(placed.id).await.unwrap();
    assert_eq!(status.id, placed.id);
    assert!(status.open);

    // instrument-level listing only shows this instrument's orders
    let mine = stock.get_order_statuses().await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, placed.id);

    let cancelled = stock.cancel_order(placed.id).await.unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    // cancelling again is not a local error
    assert!(stock.cancel_order(placed.id).await.is_ok());

    assert_eq!(
        stock.cancel_order(999).await,
        Err(ApiError::Rejected { status: 401, message: "You don't own order 999".into() })
    );
}

#[tokio::test]
async fn order_book_and_unknown_stock() {
    let (_exchange, account) = setup().await;
    let stock = foobar(&account).await;

    let book = stock.get_order_book().await.unwrap();
    assert_eq!(book.bids[0].price, 95);
    assert_eq!(book.bids[1].price, 90);
    assert!(book.asks.is_empty());

    let ghost = InstrumentHandle::new(account.client().clone(), "TESTEX", "NOPE").unwrap();
    let err = ghost.get_quote().await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Rejected { status: 404, message: "Stock NOPE does not trade on venue TESTEX".into() }
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn acquisition_runs_to_target_against_partial_fills() {
    let exchange = FakeExchange::new();
    exchange.fill_caps.lock().extend([20, 50]);
    exchange.quotes.lock().push_back(json!({"ok": true, "ask": 12, "askSize": 500, "askDepth": 500}));
    let (exchange, account) = setup_with(exchange).await;
    let stock = foobar(&account).await;

    let config = AcquisitionConfig {
        target_quantity: 100,
        reference_price: 11,
        poll_interval: Duration::from_millis(1),
        max_cycles: Some(50),
        retry: RetryPolicy { max_attempts: 2, initial_backoff_ms: 1, max_backoff_ms: 5, multiplier: 2.0, jitter: false },
    };
    let report = AcquisitionEngine::new(stock, config).run().await.unwrap();

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.state.filled(), 100);
    // first quote is too expensive; then 50 (20 filled), 50 (50 filled), 30
    assert_eq!(report.cycles, 4);
    let requested: Vec<u64> = exchange.posted_bodies.lock().iter().map(|b| b["qty"].as_u64().unwrap()).collect();
    assert_eq!(requested, vec![50, 50, 30]);
    assert!(exchange
        .posted_bodies
        .lock()
        .iter()
        .all(|b| b["orderType"] == "immediate-or-cancel" && b["price"] == 10 && b["direction"] == "buy"));
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let account = AccountHandle::new(client_for(format!("http://{addr}/ob/api"), Duration::from_secs(2)));
    assert!(!account.is_service_up().await);
    let err = account.client().get("heartbeat").await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "got {err:?}");
    assert!(err.is_transient());
    assert!(account.spawn_instrument_handles(&["TESTEX"]).await.is_empty());
}

#[tokio::test]
async fn slow_service_times_out_as_transport_error() {
    let exchange = Arc::new(FakeExchange::new());
    let base = serve(exchange).await;
    let client = client_for(base, Duration::from_millis(200));

    let err = client.get("slow").await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "got {err:?}");
    assert!(err.is_transient());
}
