//! Action handlers: one method per inbound action, all running on the
//! session's strand. Handlers either reply directly or raise a
//! [`GatewayError`] for the dispatcher's central guard.

use std::sync::Arc;
use std::time::Duration;

use common::{
    Contract, OrdType, Order, ParamScalar, ParamValue, Side, TimeInForce, User,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::codec::{self, get_bool, get_i64, get_num, get_str};
use crate::encoder;
use crate::error::{GatewayError, Result};
use crate::publish::{market_data_delta, md_entry};
use crate::services::AlgoSelector;
use crate::session::{unix_now, Session};

fn algo_selector(v: &Value) -> Result<AlgoSelector> {
    if let Some(token) = v.as_str() {
        return Ok(AlgoSelector::Token(token.to_string()));
    }
    Ok(AlgoSelector::Id(get_i64(v)?))
}

impl Session {
    fn current_user(&self) -> Result<Arc<User>> {
        self.user
            .clone()
            .ok_or_else(|| GatewayError::Domain("you must login first".into()))
    }

    pub(crate) fn on_login(&mut self, action: &str, j: &Value) -> Result<()> {
        let services = self.services.clone();
        let name = get_str(&j[1])?;
        let password = crate::tokens::password_digest(get_str(&j[2])?);
        let user = services.accounts.get_user(name);
        let state = match &user {
            None => "unknown user",
            Some(u) if u.password != password => "wrong password",
            Some(u) if u.is_disabled => "disabled",
            _ => "ok",
        };
        if action == "validate_user" {
            let token = get_i64(&j[3])?;
            let id = match (&user, state) {
                (Some(u), "ok") => u.id,
                _ => 0,
            };
            self.send_json(&json!(["user_validation", id, token]));
            return Ok(());
        }
        if state != "ok" {
            self.send_json(&json!(["connection", state]));
            return Ok(());
        }
        let user = user.unwrap_or_default();
        let token = services.tokens.mint();
        services.tokens.insert(token.clone(), user.clone());
        self.send_json(&json!([
            "connection",
            state,
            {
                "session": services.positions.session(),
                "userId": user.id,
                "startTime": services.start_time,
                "sessionToken": token,
                "securitiesCheckSum": services.securities.check_sum(),
            }
        ]));

        // First successful login on a stateful transport adopts the user,
        // arms the publish timer and fans out the session capabilities.
        if self.user.is_none() && !self.stateless {
            self.user = Some(user.clone());
            self.publishing = true;
            for (id, acc) in user.sub_accounts.iter() {
                self.send_json(&json!(["sub_account", id, acc.name]));
            }
            if user.is_admin {
                for other in services.accounts.users() {
                    for (sub_id, sub) in other.sub_accounts.iter() {
                        self.send_json(&json!([
                            "user_sub_account",
                            other.id,
                            sub_id,
                            sub.name
                        ]));
                    }
                }
            }
            for broker in services.accounts.broker_accounts() {
                self.send_json(&json!(["broker_account", broker.id, broker.name]));
            }
            for def in services.algos.definitions() {
                let mut frame = vec![json!("algo_def"), json!(def.name)];
                for p in &def.params {
                    let mut entry = vec![json!(p.name)];
                    if let Some(v) = &p.default_value {
                        codec::jsonify(v, &mut entry);
                    }
                    entry.push(json!(p.required));
                    entry.push(json!(p.min_value));
                    entry.push(json!(p.max_value));
                    entry.push(json!(p.precision));
                    frame.push(Value::Array(entry));
                }
                self.send_json(&Value::Array(frame));
            }
            let files = self.list_algo_files();
            if !files.is_empty() {
                self.send_json(&json!(["algoFiles", files]));
            }
        }
        Ok(())
    }

    fn list_algo_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.services.algo_root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || name.starts_with('_') {
                    continue;
                }
                files.push(name);
            }
        }
        files
    }

    pub(crate) fn on_bod(&mut self) -> Result<()> {
        let user = self.current_user()?;
        let services = self.services.clone();
        for ((acc, sec), pos) in services.positions.bods() {
            if !user.is_admin && !user.has_sub_account(acc) {
                continue;
            }
            self.send_json(&json!([
                "bod",
                acc,
                sec,
                pos.qty,
                pos.avg_px,
                pos.realized_pnl,
                pos.broker_account_id,
                pos.tm
            ]));
        }
        Ok(())
    }

    pub(crate) fn on_reconnect(&mut self, j: &Value) -> Result<()> {
        let name = get_str(&j[1])?;
        if let Some(adapter) = self.services.market_data.get_adapter(name) {
            adapter.reconnect();
            return Ok(());
        }
        if let Some(adapter) = self.services.exchange.get_adapter(name) {
            adapter.reconnect();
        }
        Ok(())
    }

    pub(crate) fn on_securities(&mut self) -> Result<()> {
        let user = self.current_user()?;
        debug!(session = %self.id(), "securities requested");
        let mut batch = Vec::new();
        for s in self.services.securities.securities() {
            let frame = if user.is_admin {
                json!([
                    "security",
                    s.id,
                    s.symbol,
                    s.exchange_name,
                    s.sec_type,
                    s.multiplier,
                    s.close_price,
                    s.rate,
                    s.currency,
                    s.adv20,
                    s.market_cap,
                    s.sector.to_string(),
                    s.industry_group.to_string(),
                    s.industry.to_string(),
                    s.sub_industry.to_string(),
                    s.local_symbol,
                    s.bbgid,
                    s.cusip,
                    s.sedol,
                    s.isin
                ])
            } else {
                json!([
                    "security",
                    s.id,
                    s.symbol,
                    s.exchange_name,
                    s.sec_type,
                    s.lot_size,
                    s.multiplier
                ])
            };
            if self.stateless {
                batch.push(frame);
            } else {
                self.send_json(&frame);
            }
        }
        if self.stateless {
            self.send_json(&Value::Array(batch));
        } else {
            self.send_json(&json!(["securities", "complete"]));
        }
        Ok(())
    }

    pub(crate) fn on_position(&mut self, j: &Value, msg: &str) -> Result<()> {
        let security_id = get_i64(&j[1])?;
        let Some(sec) = self.services.securities.get(security_id) else {
            let frame = json!([
                "error",
                "position",
                "security id",
                format!("Invalid security id: {security_id}")
            ]);
            debug!(session = %self.id(), frame = %frame, msg, "position rejected");
            self.send_json(&frame);
            return Ok(());
        };
        let acc_name = get_str(&j[2])?;
        let Some(acc) = self.services.accounts.find_sub_account(acc_name) else {
            let frame = json!([
                "error",
                "position",
                "account name",
                format!("Invalid account name: {acc_name}")
            ]);
            debug!(session = %self.id(), frame = %frame, msg, "position rejected");
            self.send_json(&frame);
            return Ok(());
        };
        let broker = match j.get(3) {
            Some(v) => get_bool(v)?,
            None => false,
        };
        let _pos = if broker {
            let Some(broker_acc) = acc.broker(&sec) else {
                let frame = json!([
                    "error",
                    "position",
                    "account name",
                    "Can not find broker for this account and security pair"
                ]);
                debug!(session = %self.id(), frame = %frame, msg, "position rejected");
                self.send_json(&frame);
                return Ok(());
            };
            self.services.positions.broker_position(broker_acc.id, sec.id)
        } else {
            self.services.positions.position(acc.id, sec.id)
        };
        // Clients correlate the reply by the echoed request; position state
        // itself flows on the streaming side.
        self.send_json(j);
        Ok(())
    }

    pub(crate) fn on_offline(&mut self, j: &Value) -> Result<()> {
        let services = self.services.clone();
        let seq_orders = get_i64(&j[1])?;
        debug!(session = %self.id(), seq = seq_orders, "offline confirmations requested");
        for cm in services.orders.replay(seq_orders) {
            if let Some(frame) = encoder::confirmation_frame(&cm, true) {
                self.send_json(&frame);
            }
        }
        let replay_algos = j.get(2).is_some();
        if let Some(v) = j.get(2) {
            let seq_algos = get_i64(v)?;
            debug!(session = %self.id(), seq = seq_algos, "offline algos requested");
            for st in services.algos.replay(seq_algos) {
                self.send_json(&encoder::algo_status_frame(&st, true));
            }
        }
        self.send_json(&json!(["offline_orders", "complete"]));
        if replay_algos {
            self.send_json(&json!(["offline_algos", "complete"]));
        }
        self.send_json(&json!(["offline", "complete"]));
        Ok(())
    }

    pub(crate) fn on_shutdown(&mut self, j: &Value) -> Result<()> {
        let user = self.current_user()?;
        if !user.is_admin {
            return Ok(());
        }
        let mut seconds = 3.0_f64;
        let mut interval = 1.0_f64;
        if let Some(v) = j.get(1) {
            let n = get_num(v)?;
            if n > seconds {
                seconds = n;
            }
        }
        if let Some(v) = j.get(2) {
            let n = get_num(v)?;
            if n > 0.0 && n < seconds {
                interval = n;
            }
        }
        let services = self.services.clone();
        services.shutdown.drain();
        services.algos.stop_all();
        info!("shutting down");
        tokio::spawn(async move {
            let mut remaining = seconds;
            while remaining > 0.0 {
                info!(remaining, "shutdown countdown");
                tokio::time::sleep(Duration::from_secs_f64(interval)).await;
                services.orders.cancel_all();
                remaining -= interval;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            services.shutdown.stop();
        });
        Ok(())
    }

    pub(crate) fn on_cancel(&mut self, j: &Value, msg: &str) -> Result<()> {
        let id = get_i64(&j[1])?;
        let Some(order) = self.services.orders.get(id) else {
            let frame = json!([
                "error",
                "cancel",
                "order id",
                format!("Invalid order id: {id}")
            ]);
            debug!(session = %self.id(), frame = %frame, msg, "cancel rejected");
            self.send_json(&frame);
            return Ok(());
        };
        self.services.exchange.cancel(&order);
        Ok(())
    }

    pub(crate) fn on_order(&mut self, j: &Value, msg: &str) -> Result<()> {
        let user = self.current_user()?;
        let security_id = get_i64(&j[1])?;
        let sub_account = get_str(&j[2])?;
        let Some(acc) = self.services.accounts.find_sub_account(sub_account) else {
            let frame = json!([
                "error",
                "order",
                "sub_account",
                format!("Invalid sub_account: {sub_account}")
            ]);
            debug!(session = %self.id(), frame = %frame, msg, "order rejected");
            self.send_json(&frame);
            return Ok(());
        };
        let side_str = get_str(&j[3])?;
        let type_str = get_str(&j[4])?;
        let tif_str = get_str(&j[5])?;
        let qty = get_num(&j[6])?;
        let price = get_num(&j[7])?;
        let stop_price = get_num(&j[8])?;
        let Some(sec) = self.services.securities.get(security_id) else {
            let frame = json!([
                "error",
                "order",
                "security id",
                format!("Invalid security id: {security_id}")
            ]);
            debug!(session = %self.id(), frame = %frame, msg, "order rejected");
            self.send_json(&frame);
            return Ok(());
        };
        let Some(side) = Side::parse(side_str) else {
            let frame = json!([
                "error",
                "order",
                "side",
                format!("Invalid side: {side_str}")
            ]);
            debug!(session = %self.id(), frame = %frame, msg, "order rejected");
            self.send_json(&frame);
            return Ok(());
        };
        let typ = OrdType::parse_or_limit(type_str);
        if typ.needs_stop_price() && stop_price <= 0.0 {
            let frame = json!([
                "error",
                "order",
                "stop price",
                "Miss stop price for stop order"
            ]);
            debug!(session = %self.id(), frame = %frame, msg, "order rejected");
            self.send_json(&frame);
            return Ok(());
        }
        let tif = TimeInForce::parse_or_day(tif_str);
        let order = Order {
            contract: Contract {
                sec,
                sub_account: acc,
                side,
                typ,
                tif,
                qty,
                price,
                stop_price,
            },
            id: 0,
            user,
            algo_id: 0,
            broker_account_id: 0,
            orig_id: 0,
            tm: unix_now(),
            seq: 0,
        };
        self.services.exchange.place(order);
        Ok(())
    }

    pub(crate) fn on_algo(&mut self, j: &Value, msg: &str) -> Result<()> {
        let action = get_str(&j[1])?.to_string();
        match action.as_str() {
            "cancel" => {
                self.services.algos.stop(algo_selector(&j[2])?);
                Ok(())
            }
            "modify" => {
                let params = codec::parse_params(&j[3], &self.services)?;
                self.services.algos.modify(algo_selector(&j[2])?, params);
                Ok(())
            }
            "new" | "test" => {
                let algo_name = get_str(&j[2])?.to_string();
                let token = get_str(&j[3])?.to_string();
                if self.services.algos.is_running(&token) {
                    let frame = json!(["error", "algo", "duplicate token", token]);
                    debug!(session = %self.id(), frame = %frame, msg, "algo rejected");
                    self.send_json(&frame);
                    return Ok(());
                }
                let user = self.current_user()?;
                if let Err(err) = self.spawn_algo(&action, &algo_name, &token, j, &user) {
                    debug!(session = %self.id(), %err, msg, "algo spawn failed");
                    self.send_json(&json!([
                        "error",
                        "algo",
                        "invalid params",
                        token,
                        err.to_string()
                    ]));
                }
                Ok(())
            }
            _ => {
                self.send_json(&json!(["error", "algo", "invalid action", action]));
                Ok(())
            }
        }
    }

    fn spawn_algo(
        &mut self,
        action: &str,
        algo_name: &str,
        token: &str,
        j: &Value,
        user: &Arc<User>,
    ) -> Result<()> {
        let mut params = None;
        if action == "new" {
            let parsed = codec::parse_params(&j[4], &self.services)?;
            for value in parsed.values() {
                if let ParamValue::Scalar(ParamScalar::Security(tuple)) = value {
                    if let Some(acc) = &tuple.acc {
                        if !user.has_sub_account(acc.id) {
                            return Err(GatewayError::Domain(format!(
                                "No permission to trade with account: {}",
                                acc.name
                            )));
                        }
                    }
                }
            }
            params = Some(parsed);
        } else if !token.is_empty() {
            // Test output frames are routed back only to this session.
            self.test_algo_tokens.insert(token.to_string());
        }
        let raw = j[4].to_string();
        let has_params = params.is_some();
        if !self
            .services
            .algos
            .spawn(params, algo_name, user.clone(), &raw, token)
            && has_params
        {
            return Err(GatewayError::Domain(format!(
                "Unknown algo name: {algo_name}"
            )));
        }
        Ok(())
    }

    pub(crate) fn on_pnl(&mut self, j: &Value) -> Result<()> {
        let user = self.current_user()?;
        let services = self.services.clone();
        let mut tm0 = 0_i64;
        if let Some(v) = j.get(1) {
            tm0 = get_i64(v)?;
        }
        // History replays at most the trailing 24 hours.
        tm0 = tm0.max(unix_now() - 24 * 3600);
        for (acc, _) in services.positions.pnls() {
            if !user.has_sub_account(acc) {
                continue;
            }
            let path = services.pnl_root.join(format!("pnl-{acc}"));
            let mut rows = Vec::new();
            if let Ok(contents) = std::fs::read_to_string(&path) {
                for line in contents.lines() {
                    let mut fields = line.split_whitespace();
                    let (Some(tm), Some(a), Some(b)) =
                        (fields.next(), fields.next(), fields.next())
                    else {
                        continue;
                    };
                    let (Ok(tm), Ok(a), Ok(b)) =
                        (tm.parse::<i64>(), a.parse::<f64>(), b.parse::<f64>())
                    else {
                        continue;
                    };
                    if tm <= tm0 {
                        continue;
                    }
                    rows.push(json!([tm, a, b]));
                }
            }
            if !rows.is_empty() {
                self.send_json(&json!(["Pnl", acc, rows]));
            }
        }
        self.sub_pnl = true;
        Ok(())
    }

    pub(crate) fn on_sub(&mut self, j: &Value) -> Result<()> {
        let services = self.services.clone();
        let len = j.as_array().map(|a| a.len()).unwrap_or(0);
        let mut entries = Vec::new();
        for i in 1..len {
            let id = get_i64(&j[i])?;
            if services.securities.get(id).is_none() {
                continue;
            }
            let md = services.market_data.snapshot(id);
            let sub = self.subs.entry(id).or_default();
            if let Some(delta) = market_data_delta(&md, &sub.last) {
                entries.push(md_entry(id, delta));
            }
            sub.last = md;
            sub.refs += 1;
        }
        if !entries.is_empty() {
            let mut frame = vec![json!("md")];
            frame.extend(entries);
            self.send_json(&Value::Array(frame));
        }
        Ok(())
    }

    pub(crate) fn on_unsub(&mut self, j: &Value) -> Result<()> {
        let len = j.as_array().map(|a| a.len()).unwrap_or(0);
        for i in 1..len {
            let id = get_i64(&j[i])?;
            // An id with no live subscription abandons the rest of the
            // frame.
            let Some(sub) = self.subs.get_mut(&id) else {
                return Ok(());
            };
            sub.refs -= 1;
            if sub.refs <= 0 {
                self.subs.remove(&id);
            }
        }
        Ok(())
    }

    pub(crate) fn on_algo_file(&mut self, j: &Value) -> Result<()> {
        let name = get_str(&j[1])?;
        let path = self.services.algo_root.join(name);
        let mut frame = vec![json!("algoFile"), json!(name)];
        match std::fs::read_to_string(&path) {
            Ok(text) => frame.push(json!(text)),
            Err(_) => {
                frame.push(Value::Null);
                frame.push(json!("Not found"));
            }
        }
        self.send_json(&Value::Array(frame));
        Ok(())
    }

    pub(crate) fn on_delete_algo_file(&mut self, j: &Value) -> Result<()> {
        let name = get_str(&j[1])?;
        let path = self.services.algo_root.join(name);
        let mut frame = vec![json!("deleteAlgoFile"), json!(name)];
        if let Err(err) = std::fs::remove_file(&path) {
            frame.push(json!(err.to_string()));
        }
        self.send_json(&Value::Array(frame));
        Ok(())
    }

    pub(crate) fn on_save_algo_file(&mut self, j: &Value) -> Result<()> {
        let name = get_str(&j[1])?;
        let text = get_str(&j[2])?;
        let path = self.services.algo_root.join(name);
        let mut frame = vec![json!("saveAlgoFile"), json!(name)];
        if std::fs::write(&path, text).is_err() {
            frame.push(json!("Can not write"));
        }
        self.send_json(&Value::Array(frame));
        Ok(())
    }
}
