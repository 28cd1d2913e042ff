//! End-to-end dispatcher and handler behavior over in-memory managers.

mod support;

use common::{OrdType, Side, TimeInForce};
use gateway::services::{AlgoManager, AlgoSelector, ServerState};
use serde_json::json;
use support::Harness;

fn frames_with_head<'a>(
    frames: &'a [serde_json::Value],
    head: &str,
) -> Vec<&'a serde_json::Value> {
    frames.iter().filter(|f| f[0] == json!(head)).collect()
}

#[test]
fn heartbeat_echoes_without_parsing() {
    let mut h = Harness::new();
    h.session.handle_frame("h", None);
    assert_eq!(h.drain_raw(), vec!["h".to_string()]);
}

#[test]
fn invalid_json_reports_parse_error() {
    let mut h = Harness::new();
    h.session.handle_frame("{nope", None);
    let frames = h.drain();
    assert_eq!(frames, vec![json!(["error", "json", "{nope", "invalid json string"])]);
}

#[test]
fn empty_action_is_rejected() {
    let mut h = Harness::new();
    h.frame(json!(["", 1]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "msg", "action", "empty action"])]
    );
}

#[test]
fn anonymous_sessions_must_login_first() {
    let mut h = Harness::new();
    h.frame(json!(["securities"]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "msg", "action", "you must login first"])]
    );
}

#[test]
fn token_adoption_reattaches_user() {
    let mut h = Harness::new();
    let token = h.login("alice", "secret");

    // A fresh stateless session presents the token alongside the frame.
    let (mut other, mut rx) = h.sibling(true);
    other.handle_frame(&json!(["securities"]).to_string(), Some(&token));
    let mut frames = Vec::new();
    while let Ok(text) = rx.try_recv() {
        frames.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
    }
    // One batched reply, not an error.
    assert_eq!(frames.len(), 1);
    assert!(frames[0].is_array());
    assert_eq!(frames[0][0][0], json!("security"));

    // An unknown token is still rejected.
    let (mut third, mut rx3) = h.sibling(true);
    third.handle_frame(&json!(["securities"]).to_string(), Some("bogus"));
    let text = rx3.try_recv().unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&text).unwrap(),
        json!(["error", "msg", "action", "you must login first"])
    );
}

#[test]
fn login_states() {
    let mut h = Harness::new();
    h.frame(json!(["login", "ghost", "x"]));
    assert_eq!(h.drain(), vec![json!(["connection", "unknown user"])]);

    h.frame(json!(["login", "alice", "wrong"]));
    assert_eq!(h.drain(), vec![json!(["connection", "wrong password"])]);

    h.frame(json!(["login", "bob", "pw"]));
    assert_eq!(h.drain(), vec![json!(["connection", "disabled"])]);
}

#[test]
fn login_mints_token_and_fans_out_capabilities() {
    let mut h = Harness::new();
    h.frame(json!(["login", "alice", "secret"]));
    let frames = h.drain();

    let conn = &frames_with_head(&frames, "connection")[0];
    assert_eq!(conn[1], json!("ok"));
    let detail = &conn[2];
    assert_eq!(detail["userId"], json!(1));
    assert_eq!(detail["session"], json!("sim"));
    let token = detail["sessionToken"].as_str().unwrap();
    assert_eq!(h.services.tokens.get(token).unwrap().id, 1);
    assert!(detail["securitiesCheckSum"].is_string());
    assert!(detail["startTime"].as_i64().unwrap() > 0);

    let subs = frames_with_head(&frames, "sub_account");
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0][1], json!(7));
    assert_eq!(subs[0][2], json!("main"));

    // Non-admins do not receive the user cross-product.
    assert!(frames_with_head(&frames, "user_sub_account").is_empty());

    let brokers = frames_with_head(&frames, "broker_account");
    assert_eq!(brokers.len(), 1);
    assert_eq!(brokers[0][1], json!(11));

    let defs = frames_with_head(&frames, "algo_def");
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0][1], json!("TWAP"));
    // [name, tag(, value), required, min, max, precision]
    assert_eq!(defs[0][2][0], json!("target"));
    assert_eq!(defs[0][2][1], json!("security"));
    assert_eq!(defs[0][3], json!(["minutes", "int", 30, false, 1.0, 390.0, 0]));
}

#[test]
fn repeated_login_yields_coexisting_tokens() {
    let mut h = Harness::new();
    let first = h.login("alice", "secret");
    h.frame(json!(["login", "alice", "secret"]));
    let frames = h.drain();
    let conn = &frames_with_head(&frames, "connection")[0];
    let second = conn[2]["sessionToken"].as_str().unwrap().to_string();
    assert_ne!(first, second);
    assert_eq!(h.services.tokens.get(&first).unwrap().id, 1);
    assert_eq!(h.services.tokens.get(&second).unwrap().id, 1);
}

#[test]
fn admin_login_fans_out_user_cross_product() {
    let mut h = Harness::new();
    h.frame(json!(["login", "admin", "root"]));
    let frames = h.drain();
    let cross = frames_with_head(&frames, "user_sub_account");
    // alice{7} + admin{7,8}; bob has no sub-accounts.
    assert_eq!(cross.len(), 3);
    assert!(cross.iter().any(|f| f[1] == json!(1) && f[2] == json!(7)));
    assert!(cross.iter().any(|f| f[1] == json!(2) && f[2] == json!(8)));
}

#[test]
fn validate_user_echoes_token() {
    let mut h = Harness::new();
    h.frame(json!(["validate_user", "alice", "secret", 99]));
    assert_eq!(h.drain(), vec![json!(["user_validation", 1, 99])]);

    h.frame(json!(["validate_user", "alice", "wrong", 100]));
    assert_eq!(h.drain(), vec![json!(["user_validation", 0, 100])]);
}

#[test]
fn order_requires_stop_price_for_stop_types() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!(["order", 42, "main", "buy", "stop", "Day", 100, 50.0, 0]));
    assert_eq!(
        h.drain(),
        vec![json!([
            "error",
            "order",
            "stop price",
            "Miss stop price for stop order"
        ])]
    );
    assert!(h.stack.exchange.placed().is_empty());
}

#[test]
fn order_validation_failures() {
    let mut h = Harness::new();
    h.login("alice", "secret");

    h.frame(json!(["order", 42, "ghost", "buy", "limit", "Day", 1, 1.0, 0]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "order", "sub_account", "Invalid sub_account: ghost"])]
    );

    h.frame(json!(["order", 999999, "main", "buy", "limit", "Day", 1, 1.0, 0]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "order", "security id", "Invalid security id: 999999"])]
    );

    h.frame(json!(["order", 42, "main", "hold", "limit", "Day", 1, 1.0, 0]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "order", "side", "Invalid side: hold"])]
    );
}

#[test]
fn order_reaches_exchange_with_parsed_fields() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!([
        "order", 42, "main", "short", "Stop Limit", "gtc", 200, 49.5, 48.0
    ]));
    assert!(h.drain().is_empty());
    let placed = h.stack.exchange.placed();
    assert_eq!(placed.len(), 1);
    let order = &placed[0];
    assert_eq!(order.contract.sec.id, 42);
    assert_eq!(order.contract.sub_account.id, 7);
    assert_eq!(order.contract.side, Side::Short);
    assert_eq!(order.contract.typ, OrdType::StopLimit);
    assert_eq!(order.contract.tif, TimeInForce::GoodTillCancel);
    assert_eq!(order.contract.qty, 200.0);
    assert_eq!(order.contract.stop_price, 48.0);
    assert_eq!(order.user.id, 1);

    // Unrecognized type and tif spellings fall back to limit/Day.
    h.frame(json!(["order", 42, "main", "buy", "bogus", "bogus", 1, 1.0, 0]));
    let placed = h.stack.exchange.placed();
    assert_eq!(placed[1].contract.typ, OrdType::Limit);
    assert_eq!(placed[1].contract.tif, TimeInForce::Day);
}

#[test]
fn cancel_unknown_order_is_rejected() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!(["cancel", 555]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "cancel", "order id", "Invalid order id: 555"])]
    );

    let order = support::order_for(&h.stack, 42, 7, 1, 900);
    h.stack.orders.insert_order(order);
    h.frame(json!(["cancel", 900]));
    assert!(h.drain().is_empty());
    assert_eq!(h.stack.exchange.cancelled(), vec![900]);
}

#[test]
fn algo_duplicate_token_is_rejected() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.stack.algos.mark_running("tok1");
    h.frame(json!(["algo", "new", "TWAP", "tok1", {}]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "algo", "duplicate token", "tok1"])]
    );
    assert!(h.stack.algos.spawned().is_empty());
}

#[test]
fn algo_new_enforces_sub_account_ownership() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!([
        "algo",
        "new",
        "TWAP",
        "tok1",
        {"target": {"qty": 1000, "side": "buy", "src": "", "sec": 42, "acc": 8}}
    ]));
    assert_eq!(
        h.drain(),
        vec![json!([
            "error",
            "algo",
            "invalid params",
            "tok1",
            "No permission to trade with account: acct8"
        ])]
    );
    assert!(h.stack.algos.spawned().is_empty());
}

#[test]
fn algo_new_spawns_with_owned_account() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!([
        "algo",
        "new",
        "TWAP",
        "tok1",
        {"target": {"qty": 1000, "side": "buy", "src": "", "sec": 42, "acc": 7}}
    ]));
    assert!(h.drain().is_empty());
    let spawned = h.stack.algos.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].name, "TWAP");
    assert_eq!(spawned[0].token, "tok1");
    assert!(spawned[0].with_params);
    assert_eq!(spawned[0].user_id, 1);
    assert!(h.stack.algos.is_running("tok1"));
}

#[test]
fn algo_unknown_name_with_params_errors() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!([
        "algo",
        "new",
        "VWAP",
        "tok2",
        {"target": {"qty": 10, "side": "sell", "src": "", "sec": 42, "acc": 7}}
    ]));
    assert_eq!(
        h.drain(),
        vec![json!([
            "error",
            "algo",
            "invalid params",
            "tok2",
            "Unknown algo name: VWAP"
        ])]
    );
}

#[test]
fn algo_invalid_action_is_reported() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!(["algo", "pause", "TWAP", "tok"]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "algo", "invalid action", "pause"])]
    );
}

#[test]
fn algo_cancel_by_token_and_id() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.stack.algos.mark_running("tok9");
    h.frame(json!(["algo", "cancel", "tok9"]));
    h.frame(json!(["algo", "cancel", 31]));
    assert!(h.drain().is_empty());
    let stops = h.stack.algos.stops();
    assert_eq!(stops.len(), 2);
    assert!(matches!(&stops[0], AlgoSelector::Token(t) if t == "tok9"));
    assert!(matches!(stops[1], AlgoSelector::Id(31)));
    assert!(!h.stack.algos.is_running("tok9"));
}

#[test]
fn algo_modify_forwards_params() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!(["algo", "modify", "tok9", {"minutes": 15}]));
    assert!(h.drain().is_empty());
    let modifies = h.stack.algos.modifies();
    assert_eq!(modifies.len(), 1);
    assert!(matches!(&modifies[0], AlgoSelector::Token(t) if t == "tok9"));
}

#[test]
fn securities_dump_stateful_ends_with_sentinel() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!(["securities"]));
    let frames = h.drain();
    assert_eq!(frames.len(), 3);
    // Non-admin record: [tag, id, symbol, exchange, type, lot, multiplier].
    assert_eq!(
        frames[0],
        json!(["security", 42, "AAPL", "NASDAQ", "STK", 100.0, 1.0])
    );
    assert_eq!(frames[1][1], json!(43));
    assert_eq!(frames[2], json!(["securities", "complete"]));
}

#[test]
fn securities_dump_stateless_batches_without_sentinel() {
    let mut h = Harness::with_stateless(true);
    h.frame(json!(["login", "alice", "secret"]));
    let frames = h.drain();
    // Stateless transports get the reply but no capability fan-out.
    assert_eq!(frames.len(), 1);
    let token = frames[0][2]["sessionToken"]
        .as_str()
        .map(String::from)
        .unwrap();
    h.frame_with_token(json!(["securities"]), &token);
    let frames = h.drain();
    assert_eq!(frames.len(), 1);
    let batch = frames[0].as_array().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0][0], json!("security"));
    assert!(frames.iter().all(|f| f[0] != json!("securities")));
}

#[test]
fn securities_dump_admin_gets_full_record() {
    let mut h = Harness::new();
    h.login("admin", "root");
    h.frame(json!(["securities"]));
    let frames = h.drain();
    let rec = frames[0].as_array().unwrap();
    assert_eq!(rec.len(), 20);
    assert_eq!(rec[5], json!(1.0));
    // Classification codes travel stringified.
    assert_eq!(rec[11], json!("45"));
}

#[test]
fn offline_replay_order_and_sentinels() {
    let mut h = Harness::new();
    h.login("alice", "secret");

    let o1 = support::order_for(&h.stack, 42, 7, 1, 1);
    let o2 = support::order_for(&h.stack, 42, 7, 1, 2);
    h.stack.orders.push_confirmation(support::fill(std::sync::Arc::new(o1), 999));
    h.stack.orders.push_confirmation(support::fill(std::sync::Arc::new(o2), 1001));
    h.stack.algos.push_record(common::AlgoStatus {
        seq: 400,
        id: 70,
        tm: 1,
        token: "t0".into(),
        name: "TWAP".into(),
        status: "active".into(),
        body: String::new(),
        user_id: 1,
    });
    h.stack.algos.push_record(common::AlgoStatus {
        seq: 501,
        id: 71,
        tm: 2,
        token: "t1".into(),
        name: "TWAP".into(),
        status: "active".into(),
        body: String::new(),
        user_id: 1,
    });

    h.frame(json!(["offline", 1000, 500]));
    let frames = h.drain();
    let heads: Vec<String> = frames
        .iter()
        .map(|f| f[0].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(heads, vec!["Order", "Algo", "offline_orders", "offline_algos", "offline"]);
    // Only records beyond the cursors replay.
    assert_eq!(frames[0][3], json!(1001));
    assert_eq!(frames[1][1], json!(501));
    assert_eq!(frames[2], json!(["offline_orders", "complete"]));
    assert_eq!(frames[3], json!(["offline_algos", "complete"]));
    assert_eq!(frames[4], json!(["offline", "complete"]));
}

#[test]
fn offline_without_algo_cursor_skips_algo_sentinel() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!(["offline", 0]));
    let frames = h.drain();
    assert_eq!(
        frames,
        vec![
            json!(["offline_orders", "complete"]),
            json!(["offline", "complete"])
        ]
    );
}

#[test]
fn shutdown_from_non_admin_is_a_silent_noop() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    h.frame(json!(["shutdown"]));
    assert!(h.drain().is_empty());
    assert_eq!(h.services.shutdown.state(), ServerState::Running);
    assert!(!h.stack.algos.halted());
    assert_eq!(h.stack.orders.cancel_all_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_clamps_seconds_and_cancels_per_interval() {
    let mut h = Harness::new();
    h.login("admin", "root");
    // seconds=1 clamps up to 3; default interval 1.
    h.frame(json!(["shutdown", 1]));
    assert_eq!(h.services.shutdown.state(), ServerState::Draining);
    assert!(h.stack.algos.halted());

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert_eq!(h.stack.orders.cancel_all_calls(), 3);
    assert_eq!(h.services.shutdown.state(), ServerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn shutdown_accepts_sub_second_interval() {
    let mut h = Harness::new();
    h.login("admin", "root");
    h.frame(json!(["shutdown", 3, 0.5]));
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert_eq!(h.stack.orders.cancel_all_calls(), 6);
    assert_eq!(h.services.shutdown.state(), ServerState::Stopped);
}

#[test]
fn position_reply_echoes_request() {
    let mut h = Harness::new();
    h.login("alice", "secret");
    let req = json!(["position", 42, "main"]);
    h.frame(req.clone());
    assert_eq!(h.drain(), vec![req]);

    h.frame(json!(["position", 1, "main"]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "position", "security id", "Invalid security id: 1"])]
    );

    h.frame(json!(["position", 42, "ghost"]));
    assert_eq!(
        h.drain(),
        vec![json!(["error", "position", "account name", "Invalid account name: ghost"])]
    );

    // Broker route exists for sec 42 (exchange 1), so the broker variant
    // echoes too; acct8 has no route and errors.
    let req = json!(["position", 42, "main", true]);
    h.frame(req.clone());
    assert_eq!(h.drain(), vec![req]);

    h.frame(json!(["position", 42, "acct8", true]));
    assert_eq!(
        h.drain(),
        vec![json!([
            "error",
            "position",
            "account name",
            "Can not find broker for this account and security pair"
        ])]
    );
}

#[test]
fn reconnect_targets_feed_then_exchange_adapters() {
    let mut h = Harness::new();
    let feed = gateway::memory::StaticAdapter::new("SIMFEED", true);
    let venue = gateway::memory::StaticAdapter::new("SIM", true);
    h.stack.market_data.add_adapter(feed.clone());
    h.stack.exchange.add_adapter(venue.clone());
    h.login("alice", "secret");

    h.frame(json!(["reconnect", "SIMFEED"]));
    h.frame(json!(["reconnect", "SIM"]));
    h.frame(json!(["reconnect", "nope"]));
    assert!(h.drain().is_empty());
    assert_eq!(feed.reconnects(), 1);
    assert_eq!(venue.reconnects(), 1);
}

#[test]
fn algo_file_round_trip() {
    let mut h = Harness::new();
    h.login("alice", "secret");

    h.frame(json!(["saveAlgoFile", "sweep.py", "def run():\n    pass\n"]));
    assert_eq!(h.drain(), vec![json!(["saveAlgoFile", "sweep.py"])]);

    h.frame(json!(["algoFile", "sweep.py"]));
    assert_eq!(
        h.drain(),
        vec![json!(["algoFile", "sweep.py", "def run():\n    pass\n"])]
    );

    h.frame(json!(["algoFile", "missing.py"]));
    assert_eq!(
        h.drain(),
        vec![json!(["algoFile", "missing.py", null, "Not found"])]
    );

    h.frame(json!(["deleteAlgoFile", "sweep.py"]));
    assert_eq!(h.drain(), vec![json!(["deleteAlgoFile", "sweep.py"])]);

    // Deleting again reports the filesystem error.
    h.frame(json!(["deleteAlgoFile", "sweep.py"]));
    let frames = h.drain();
    assert_eq!(frames[0][0], json!("deleteAlgoFile"));
    assert_eq!(frames[0].as_array().unwrap().len(), 3);
}

#[test]
fn login_lists_visible_algo_files() {
    let mut h = Harness::new();
    std::fs::write(h.algo_root.path().join("alpha.py"), "x").unwrap();
    std::fs::write(h.algo_root.path().join("_hidden.py"), "x").unwrap();
    std::fs::write(h.algo_root.path().join(".dot"), "x").unwrap();
    h.frame(json!(["login", "alice", "secret"]));
    let frames = h.drain();
    let files = frames
        .iter()
        .find(|f| f[0] == json!("algoFiles"))
        .expect("algoFiles frame");
    assert_eq!(files[1], json!(["alpha.py"]));
}
