//! In-memory collaborator implementations.
//!
//! These back the development binary and the test suites. Deployments
//! replace them with the server's real manager singletons; the traits in
//! [`crate::services`] are the only coupling point.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{
    AccountId, AlgoDefinition, AlgoStatus, BodPosition, BrokerAccount, Confirmation, MarketData,
    Order, OrderId, ParamMap, Pnl, Position, Security, SecurityId, SubAccount, User, UserId,
};
use dashmap::DashMap;

use crate::services::{
    AccountManager, Adapter, AlgoManager, AlgoSelector, ExchangeConnectivity, MarketDataManager,
    OrderStore, PositionManager, SecurityMaster, Services, ShutdownSignal,
};
use crate::session::unix_now;
use crate::tokens::TokenRegistry;

/// Adapter with a settable connected flag; reconnect requests are counted.
pub struct StaticAdapter {
    name: String,
    connected: AtomicBool,
    reconnects: AtomicUsize,
}

impl StaticAdapter {
    pub fn new(name: impl Into<String>, connected: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            connected: AtomicBool::new(connected),
            reconnects: AtomicUsize::new(0),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::Relaxed)
    }
}

impl Adapter for StaticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct MemorySecurityMaster {
    secs: DashMap<SecurityId, Arc<Security>>,
}

impl MemorySecurityMaster {
    pub fn insert(&self, sec: Security) -> Arc<Security> {
        let sec = Arc::new(sec);
        self.secs.insert(sec.id, sec.clone());
        sec
    }
}

impl SecurityMaster for MemorySecurityMaster {
    fn get(&self, id: SecurityId) -> Option<Arc<Security>> {
        self.secs.get(&id).map(|s| s.clone())
    }

    fn securities(&self) -> Vec<Arc<Security>> {
        let mut all: Vec<_> = self.secs.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    fn check_sum(&self) -> String {
        let mut hasher = crc32fast::Hasher::new();
        for sec in self.securities() {
            hasher.update(format!("{}:{}|", sec.id, sec.symbol).as_bytes());
        }
        format!("{:08x}", hasher.finalize())
    }
}

#[derive(Default)]
pub struct MemoryAccountManager {
    users: DashMap<String, Arc<User>>,
    subs_by_id: DashMap<AccountId, Arc<SubAccount>>,
    subs_by_name: DashMap<String, Arc<SubAccount>>,
    brokers: DashMap<AccountId, Arc<BrokerAccount>>,
}

impl MemoryAccountManager {
    pub fn add_user(&self, user: User) -> Arc<User> {
        let user = Arc::new(user);
        self.users.insert(user.name.clone(), user.clone());
        user
    }

    pub fn add_sub_account(&self, acc: SubAccount) -> Arc<SubAccount> {
        let acc = Arc::new(acc);
        self.subs_by_id.insert(acc.id, acc.clone());
        self.subs_by_name.insert(acc.name.clone(), acc.clone());
        acc
    }

    pub fn add_broker_account(&self, acc: BrokerAccount) -> Arc<BrokerAccount> {
        let acc = Arc::new(acc);
        self.brokers.insert(acc.id, acc.clone());
        acc
    }
}

impl AccountManager for MemoryAccountManager {
    fn get_user(&self, name: &str) -> Option<Arc<User>> {
        self.users.get(name).map(|u| u.clone())
    }

    fn get_sub_account(&self, id: AccountId) -> Option<Arc<SubAccount>> {
        self.subs_by_id.get(&id).map(|a| a.clone())
    }

    fn find_sub_account(&self, name: &str) -> Option<Arc<SubAccount>> {
        self.subs_by_name.get(name).map(|a| a.clone())
    }

    fn users(&self) -> Vec<Arc<User>> {
        let mut all: Vec<_> = self.users.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|u| u.id);
        all
    }

    fn broker_accounts(&self) -> Vec<Arc<BrokerAccount>> {
        let mut all: Vec<_> = self.brokers.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| b.id);
        all
    }
}

#[derive(Default)]
pub struct MemoryMarketData {
    snaps: DashMap<SecurityId, MarketData>,
    adapters: DashMap<String, Arc<dyn Adapter>>,
}

impl MemoryMarketData {
    pub fn set_snapshot(&self, id: SecurityId, md: MarketData) {
        self.snaps.insert(id, md);
    }

    pub fn add_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }
}

impl MarketDataManager for MemoryMarketData {
    fn snapshot(&self, id: SecurityId) -> MarketData {
        self.snaps.get(&id).map(|m| *m).unwrap_or_default()
    }

    fn adapters(&self) -> Vec<Arc<dyn Adapter>> {
        let mut all: Vec<_> = self.adapters.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|a| a.name().to_string());
        all
    }

    fn get_adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).map(|a| a.clone())
    }
}

pub struct MemoryPositionManager {
    positions: DashMap<(AccountId, SecurityId), Position>,
    broker_positions: DashMap<(AccountId, SecurityId), Position>,
    pnls: DashMap<AccountId, Pnl>,
    bods: DashMap<(AccountId, SecurityId), BodPosition>,
    session: String,
}

impl MemoryPositionManager {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            positions: DashMap::new(),
            broker_positions: DashMap::new(),
            pnls: DashMap::new(),
            bods: DashMap::new(),
            session: session.into(),
        }
    }

    pub fn set_position(&self, acc: AccountId, sec: SecurityId, pos: Position) {
        self.positions.insert((acc, sec), pos);
    }

    pub fn set_broker_position(&self, broker: AccountId, sec: SecurityId, pos: Position) {
        self.broker_positions.insert((broker, sec), pos);
    }

    pub fn set_pnl(&self, acc: AccountId, pnl: Pnl) {
        self.pnls.insert(acc, pnl);
    }

    pub fn set_bod(&self, acc: AccountId, sec: SecurityId, bod: BodPosition) {
        self.bods.insert((acc, sec), bod);
    }
}

impl PositionManager for MemoryPositionManager {
    fn position(&self, acc: AccountId, sec: SecurityId) -> Position {
        self.positions.get(&(acc, sec)).map(|p| *p).unwrap_or_default()
    }

    fn broker_position(&self, broker: AccountId, sec: SecurityId) -> Position {
        self.broker_positions
            .get(&(broker, sec))
            .map(|p| *p)
            .unwrap_or_default()
    }

    fn sub_positions(&self) -> Vec<((AccountId, SecurityId), Position)> {
        let mut all: Vec<_> = self.positions.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by_key(|(k, _)| *k);
        all
    }

    fn pnls(&self) -> Vec<(AccountId, Pnl)> {
        let mut all: Vec<_> = self.pnls.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by_key(|(k, _)| *k);
        all
    }

    fn bods(&self) -> Vec<((AccountId, SecurityId), BodPosition)> {
        let mut all: Vec<_> = self.bods.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by_key(|(k, _)| *k);
        all
    }

    fn session(&self) -> String {
        self.session.clone()
    }
}

/// Records order flow instead of talking to an exchange.
#[derive(Default)]
pub struct MemoryExchange {
    placed: Mutex<Vec<Order>>,
    cancelled: Mutex<Vec<OrderId>>,
    adapters: DashMap<String, Arc<dyn Adapter>>,
}

impl MemoryExchange {
    pub fn add_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn placed(&self) -> Vec<Order> {
        self.placed.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn cancelled(&self) -> Vec<OrderId> {
        self.cancelled.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ExchangeConnectivity for MemoryExchange {
    fn place(&self, order: Order) {
        if let Ok(mut placed) = self.placed.lock() {
            placed.push(order);
        }
    }

    fn cancel(&self, order: &Order) {
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.push(order.id);
        }
    }

    fn adapters(&self) -> Vec<Arc<dyn Adapter>> {
        let mut all: Vec<_> = self.adapters.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|a| a.name().to_string());
        all
    }

    fn get_adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).map(|a| a.clone())
    }
}

/// One recorded spawn request.
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub name: String,
    pub token: String,
    pub raw_params: String,
    pub with_params: bool,
    pub user_id: UserId,
}

#[derive(Default)]
pub struct MemoryAlgoManager {
    defs: DashMap<String, AlgoDefinition>,
    running: DashMap<String, ()>,
    spawned: Mutex<Vec<SpawnRecord>>,
    records: Mutex<Vec<AlgoStatus>>,
    stops: Mutex<Vec<AlgoSelector>>,
    modifies: Mutex<Vec<AlgoSelector>>,
    halted: AtomicBool,
}

impl MemoryAlgoManager {
    pub fn add_definition(&self, def: AlgoDefinition) {
        self.defs.insert(def.name.clone(), def);
    }

    /// Pre-register a token as a live instance.
    pub fn mark_running(&self, token: impl Into<String>) {
        self.running.insert(token.into(), ());
    }

    pub fn push_record(&self, st: AlgoStatus) {
        if let Ok(mut records) = self.records.lock() {
            records.push(st);
        }
    }

    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.spawned.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn stops(&self) -> Vec<AlgoSelector> {
        self.stops.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn modifies(&self) -> Vec<AlgoSelector> {
        self.modifies.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }
}

impl AlgoManager for MemoryAlgoManager {
    fn spawn(
        &self,
        params: Option<ParamMap>,
        name: &str,
        user: Arc<User>,
        raw_params: &str,
        token: &str,
    ) -> bool {
        if !self.defs.contains_key(name) {
            return false;
        }
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(SpawnRecord {
                name: name.to_string(),
                token: token.to_string(),
                raw_params: raw_params.to_string(),
                with_params: params.is_some(),
                user_id: user.id,
            });
        }
        if !token.is_empty() {
            self.running.insert(token.to_string(), ());
        }
        true
    }

    fn is_running(&self, token: &str) -> bool {
        self.running.contains_key(token)
    }

    fn stop(&self, sel: AlgoSelector) {
        if let AlgoSelector::Token(token) = &sel {
            self.running.remove(token);
        }
        if let Ok(mut stops) = self.stops.lock() {
            stops.push(sel);
        }
    }

    fn modify(&self, sel: AlgoSelector, _params: ParamMap) {
        if let Ok(mut modifies) = self.modifies.lock() {
            modifies.push(sel);
        }
    }

    fn definitions(&self) -> Vec<AlgoDefinition> {
        let mut all: Vec<_> = self.defs.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|d| d.name.clone());
        all
    }

    fn replay(&self, seq: i64) -> Vec<AlgoStatus> {
        let mut all: Vec<_> = self
            .records
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|st| i64::from(st.seq) > seq)
            .collect();
        all.sort_by_key(|st| st.seq);
        all
    }

    fn stop_all(&self) {
        self.halted.store(true, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: DashMap<OrderId, Arc<Order>>,
    confirmations: Mutex<Vec<Arc<Confirmation>>>,
    cancel_all_calls: AtomicUsize,
}

impl MemoryOrderStore {
    pub fn insert_order(&self, order: Order) -> Arc<Order> {
        let order = Arc::new(order);
        self.orders.insert(order.id, order.clone());
        order
    }

    pub fn push_confirmation(&self, cm: Arc<Confirmation>) {
        if let Ok(mut confirmations) = self.confirmations.lock() {
            confirmations.push(cm);
        }
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.cancel_all_calls.load(Ordering::Relaxed)
    }
}

impl OrderStore for MemoryOrderStore {
    fn get(&self, id: OrderId) -> Option<Arc<Order>> {
        self.orders.get(&id).map(|o| o.clone())
    }

    fn replay(&self, seq: i64) -> Vec<Arc<Confirmation>> {
        let mut all: Vec<_> = self
            .confirmations
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|cm| i64::from(cm.seq) > seq)
            .collect();
        all.sort_by_key(|cm| cm.seq);
        all
    }

    fn cancel_all(&self) {
        self.cancel_all_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// A full set of in-memory managers plus the glue to bundle them into
/// [`Services`].
pub struct MemoryStack {
    pub securities: Arc<MemorySecurityMaster>,
    pub accounts: Arc<MemoryAccountManager>,
    pub market_data: Arc<MemoryMarketData>,
    pub positions: Arc<MemoryPositionManager>,
    pub exchange: Arc<MemoryExchange>,
    pub algos: Arc<MemoryAlgoManager>,
    pub orders: Arc<MemoryOrderStore>,
}

impl MemoryStack {
    pub fn new() -> Self {
        Self {
            securities: Arc::new(MemorySecurityMaster::default()),
            accounts: Arc::new(MemoryAccountManager::default()),
            market_data: Arc::new(MemoryMarketData::default()),
            positions: Arc::new(MemoryPositionManager::new("sim")),
            exchange: Arc::new(MemoryExchange::default()),
            algos: Arc::new(MemoryAlgoManager::default()),
            orders: Arc::new(MemoryOrderStore::default()),
        }
    }

    pub fn services(&self, algo_root: PathBuf, pnl_root: PathBuf) -> Arc<Services> {
        Arc::new(Services {
            securities: self.securities.clone(),
            accounts: self.accounts.clone(),
            market_data: self.market_data.clone(),
            positions: self.positions.clone(),
            exchange: self.exchange.clone(),
            algos: self.algos.clone(),
            orders: self.orders.clone(),
            tokens: TokenRegistry::new(),
            shutdown: ShutdownSignal::new(),
            algo_root,
            pnl_root,
            start_time: unix_now(),
        })
    }
}

impl Default for MemoryStack {
    fn default() -> Self {
        Self::new()
    }
}
