//! Shared fixture: a session wired to seeded in-memory managers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use common::{
    AlgoDefinition, AlgoParamDef, BrokerAccount, Confirmation, Contract, ExecType, OrdType, Order,
    OrderId, ParamScalar, ParamValue, Security, SecurityTuple, Side, SubAccount, TimeInForce,
    TransType, User,
};
use gateway::memory::MemoryStack;
use gateway::password_digest;
use gateway::services::{AccountManager, SecurityMaster, Services};
use gateway::Session;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub struct Harness {
    pub stack: MemoryStack,
    pub services: Arc<Services>,
    pub session: Session,
    pub rx: mpsc::UnboundedReceiver<String>,
    pub algo_root: TempDir,
    pub pnl_root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stateless(false)
    }

    pub fn with_stateless(stateless: bool) -> Self {
        let stack = seeded_stack();
        let algo_root = TempDir::new().expect("algo root");
        let pnl_root = TempDir::new().expect("pnl root");
        let services = stack.services(
            algo_root.path().to_path_buf(),
            pnl_root.path().to_path_buf(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(tx, stateless, services.clone());
        Self {
            stack,
            services,
            session,
            rx,
            algo_root,
            pnl_root,
        }
    }

    /// Open a second session against the same managers.
    pub fn sibling(&self, stateless: bool) -> (Session, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(tx, stateless, self.services.clone()), rx)
    }

    pub fn frame(&mut self, v: Value) {
        self.session.handle_frame(&v.to_string(), None);
    }

    pub fn frame_with_token(&mut self, v: Value, token: &str) {
        self.session.handle_frame(&v.to_string(), Some(token));
    }

    /// Everything emitted since the last drain, parsed.
    pub fn drain(&mut self) -> Vec<Value> {
        self.drain_raw()
            .iter()
            .map(|text| serde_json::from_str(text).expect("outbound frame is json"))
            .collect()
    }

    pub fn drain_raw(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            out.push(text);
        }
        out
    }

    /// Log in and return the minted session token.
    pub fn login(&mut self, name: &str, password: &str) -> String {
        self.frame(json!(["login", name, password]));
        let frames = self.drain();
        for f in &frames {
            if f[0] == json!("connection") && f[1] == json!("ok") {
                return f[2]["sessionToken"]
                    .as_str()
                    .expect("session token")
                    .to_string();
            }
        }
        panic!("login did not succeed: {frames:?}");
    }
}

/// Managers seeded with two securities, three users, two sub-accounts, a
/// broker route and one algo adapter.
pub fn seeded_stack() -> MemoryStack {
    let stack = MemoryStack::new();

    stack.securities.insert(Security {
        id: 42,
        symbol: "AAPL".into(),
        exchange_id: 1,
        exchange_name: "NASDAQ".into(),
        sec_type: "STK".into(),
        lot_size: 100.0,
        multiplier: 1.0,
        close_price: 101.0,
        currency: "USD".into(),
        sector: 45,
        ..Security::default()
    });
    stack.securities.insert(Security {
        id: 43,
        symbol: "MSFT".into(),
        exchange_id: 1,
        exchange_name: "NASDAQ".into(),
        sec_type: "STK".into(),
        lot_size: 100.0,
        multiplier: 1.0,
        ..Security::default()
    });

    let broker = stack.accounts.add_broker_account(BrokerAccount {
        id: 11,
        name: "prime".into(),
    });
    let main = stack.accounts.add_sub_account(SubAccount {
        id: 7,
        name: "main".into(),
        broker_accounts: HashMap::from([(1, broker)]),
    });
    let acct8 = stack.accounts.add_sub_account(SubAccount {
        id: 8,
        name: "acct8".into(),
        ..SubAccount::default()
    });

    stack.accounts.add_user(User {
        id: 1,
        name: "alice".into(),
        password: password_digest("secret"),
        sub_accounts: Arc::new(HashMap::from([(7, main.clone())])),
        ..User::default()
    });
    stack.accounts.add_user(User {
        id: 2,
        name: "admin".into(),
        password: password_digest("root"),
        is_admin: true,
        sub_accounts: Arc::new(HashMap::from([(7, main), (8, acct8)])),
        ..User::default()
    });
    stack.accounts.add_user(User {
        id: 3,
        name: "bob".into(),
        password: password_digest("pw"),
        is_disabled: true,
        ..User::default()
    });

    stack.algos.add_definition(AlgoDefinition {
        name: "TWAP".into(),
        params: vec![
            AlgoParamDef {
                name: "target".into(),
                default_value: Some(ParamValue::Scalar(ParamScalar::Security(
                    SecurityTuple::default(),
                ))),
                required: true,
                min_value: 0.0,
                max_value: 0.0,
                precision: 0,
            },
            AlgoParamDef {
                name: "minutes".into(),
                default_value: Some(ParamValue::Scalar(ParamScalar::Int(30))),
                required: false,
                min_value: 1.0,
                max_value: 390.0,
                precision: 0,
            },
        ],
    });

    stack
}

/// An order for `sec_id`/`acc_id` owned by `user_id`, ready for the
/// confirmation builders.
pub fn order_for(stack: &MemoryStack, sec_id: i64, acc_id: i64, user_id: i64, id: OrderId) -> Order {
    let sec = stack.securities.get(sec_id).expect("seeded security");
    let acc = stack.accounts.get_sub_account(acc_id).expect("seeded sub account");
    let user = stack
        .accounts
        .users()
        .into_iter()
        .find(|u| u.id == user_id)
        .expect("seeded user");
    Order {
        contract: Contract {
            sec,
            sub_account: acc,
            side: Side::Buy,
            typ: OrdType::Limit,
            tif: TimeInForce::Day,
            qty: 100.0,
            price: 50.0,
            stop_price: 0.0,
        },
        id,
        user,
        algo_id: 0,
        broker_account_id: 11,
        orig_id: 0,
        tm: 0,
        seq: id as u32,
    }
}

pub fn fill(order: Arc<Order>, seq: u32) -> Arc<Confirmation> {
    Arc::new(Confirmation {
        order,
        exec_type: ExecType::Filled,
        transaction_time: 1_700_000_000_000_000,
        seq,
        exec_id: "E1".into(),
        text: String::new(),
        last_shares: 100.0,
        last_px: 50.25,
        trans_type: TransType::New,
        exchange_order_id: String::new(),
    })
}
