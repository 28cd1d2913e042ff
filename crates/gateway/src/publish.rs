//! Differential publishers: market data, PnL and connectivity status.
//!
//! Each session caches the last values it sent and emits only what changed
//! since, on a shared 1 Hz cadence. The caches are strictly per-session;
//! the compression contract breaks if they are ever shared.

use common::{MarketData, SecurityId};
use serde_json::{json, Map, Value};

use crate::session::{unix_now, Session};

/// Delta between two snapshots, or None when the snapshot has not ticked.
///
/// The delta always carries the timestamp under `t`; trade fields use the
/// abbreviated keys `o/h/l/c/q/v/V` and depth levels `a<i>/A<i>/b<i>/B<i>`
/// for ask-price/ask-size/bid-price/bid-size at level `i`.
pub fn market_data_delta(md: &MarketData, last: &MarketData) -> Option<Value> {
    if md.tm == last.tm {
        return None;
    }
    let mut delta = Map::new();
    delta.insert("t".into(), json!(md.tm));
    let t = &md.trade;
    let t0 = &last.trade;
    if t.open != t0.open {
        delta.insert("o".into(), json!(t.open));
    }
    if t.high != t0.high {
        delta.insert("h".into(), json!(t.high));
    }
    if t.low != t0.low {
        delta.insert("l".into(), json!(t.low));
    }
    if t.close != t0.close {
        delta.insert("c".into(), json!(t.close));
    }
    if t.qty != t0.qty {
        delta.insert("q".into(), json!(t.qty));
    }
    if t.volume != t0.volume {
        delta.insert("v".into(), json!(t.volume));
    }
    if t.vwap != t0.vwap {
        delta.insert("V".into(), json!(t.vwap));
    }
    for i in 0..5 {
        let d = &md.depth[i];
        let d0 = &last.depth[i];
        if d.ask_price != d0.ask_price {
            delta.insert(format!("a{i}"), json!(d.ask_price));
        }
        if d.ask_size != d0.ask_size {
            delta.insert(format!("A{i}"), json!(d.ask_size));
        }
        if d.bid_price != d0.bid_price {
            delta.insert(format!("b{i}"), json!(d.bid_price));
        }
        if d.bid_size != d0.bid_size {
            delta.insert(format!("B{i}"), json!(d.bid_size));
        }
    }
    Some(Value::Object(delta))
}

/// The `[id, {…deltas}]` entry of an `"md"` frame.
pub(crate) fn md_entry(id: SecurityId, delta: Value) -> Value {
    json!([id, delta])
}

impl Session {
    /// One publish pass: connectivity status, then market-data diffs, then
    /// (when streaming is enabled) both PnL diffs. Runs on the strand.
    pub fn publish(&mut self) {
        if self.is_closed() || !self.publishing {
            return;
        }
        self.publish_market_status();
        self.publish_market_data();
        self.publish_pnl();
    }

    fn publish_market_status(&mut self) {
        let services = self.services.clone();
        for adapter in services.exchange.adapters() {
            let connected = adapter.connected();
            let name = adapter.name().to_string();
            if self.exchange_status.get(&name) != Some(&connected) {
                self.exchange_status.insert(name.clone(), connected);
                self.send_json(&json!(["market", "exchange", name, connected]));
            }
        }
        for adapter in services.market_data.adapters() {
            let connected = adapter.connected();
            let name = adapter.name().to_string();
            if self.feed_status.get(&name) != Some(&connected) {
                self.feed_status.insert(name.clone(), connected);
                self.send_json(&json!(["market", "data", name, connected]));
            }
        }
    }

    fn publish_market_data(&mut self) {
        let services = self.services.clone();
        let mut entries = Vec::new();
        for (id, sub) in self.subs.iter_mut() {
            let md = services.market_data.snapshot(*id);
            if let Some(delta) = market_data_delta(&md, &sub.last) {
                entries.push(md_entry(*id, delta));
            }
            sub.last = md;
        }
        if !entries.is_empty() {
            let mut frame = vec![json!("md")];
            frame.extend(entries);
            self.send_json(&Value::Array(frame));
        }
    }

    fn publish_pnl(&mut self) {
        if !self.sub_pnl {
            return;
        }
        let Some(user) = self.user.clone() else { return };
        let services = self.services.clone();

        for ((acc, sec), pos) in services.positions.sub_positions() {
            if !user.has_sub_account(acc) {
                continue;
            }
            let cache = self.single_pnls.entry((acc, sec)).or_default();
            let realized_changed = pos.realized_pnl != cache.0;
            let changed = realized_changed || pos.unrealized_pnl != cache.1;
            if !changed {
                continue;
            }
            cache.0 = pos.realized_pnl;
            cache.1 = pos.unrealized_pnl;
            let mut frame = vec![
                json!("pnl"),
                json!(acc),
                json!(sec),
                json!(pos.unrealized_pnl),
            ];
            if realized_changed {
                frame.push(json!(pos.realized_pnl));
            }
            self.send_json(&Value::Array(frame));
        }

        for (acc, pnl) in services.positions.pnls() {
            if !user.has_sub_account(acc) {
                continue;
            }
            let cache = self.account_pnls.entry(acc).or_default();
            let changed = pnl.realized != cache.0 || pnl.unrealized != cache.1;
            if !changed {
                continue;
            }
            *cache = (pnl.realized, pnl.unrealized);
            self.send_json(&json!([
                "Pnl",
                acc,
                unix_now(),
                pnl.realized,
                pnl.unrealized
            ]));
        }
    }
}
