use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use paper_trader::{
    api::router,
    runner::ingest,
    state::{AppState, EngineConfig},
    tick::Tick,
};

async fn spawn_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let app: Router = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let ok = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(r) = client.get(format!("{}/market", base)).send().await {
                if r.status().is_success() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .is_ok();
    assert!(ok, "server did not become ready in time");

    (base, handle)
}

async fn next_event<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("ws recv timeout")
        .expect("ws closed")
        .expect("ws error");
    let text = match msg {
        Message::Text(t) => t,
        other => panic!("expected text frame, got {:?}", other),
    };
    serde_json::from_str(&text).expect("parse event")
}

#[tokio::test]
async fn websocket_backlog_then_live_fill() {
    let state = AppState::new(EngineConfig {
        accept_latency: Duration::from_millis(20),
        ..EngineConfig::default()
    });
    state
        .engine()
        .log(paper_trader::events::Level::Info, "Initializing paper trader");
    let (http_base, server) = spawn_server(state.clone()).await;
    let ws_url = http_base.replace("http://", "ws://") + "/ws";

    let (mut ws, _resp) = connect_async(&ws_url).await.expect("ws connect");

    let first = next_event(&mut ws).await;
    assert_eq!(first["id"], 1);
    assert_eq!(first["message"], "Initializing paper trader");

    let client = reqwest::Client::new();
    let r = client
        .post(format!("{}/orders", http_base))
        .json(&json!({ "side": "SELL", "order_type": "MARKET", "quantity": "0.01" }))
        .send()
        .await
        .unwrap();
    assert!(r.status().is_success());
    let order: Value = r.json().await.unwrap();
    assert_eq!(order["status"], "OPEN");

    ingest(&state, Tick::now(dec!(3150.25)).unwrap());

    let fill = loop {
        let ev = next_event(&mut ws).await;
        if ev["level"] == "SUCCESS" {
            break ev;
        }
        assert_eq!(ev["level"], "INFO");
    };
    assert_eq!(
        fill["message"],
        "Market order FILLED: SELL 0.01 BTCUSDT @ 3150.25"
    );

    let r = client
        .get(format!("{}/orders/{}", http_base, order["id"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    let filled: Value = r.json().await.unwrap();
    assert_eq!(filled["fill_price"], "3150.25");

    server.abort();
}
