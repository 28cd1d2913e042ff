//! Collaborator contracts consumed by the session engine.
//!
//! The server hosts one instance of each manager per process. The gateway
//! treats them as injected capability objects behind these traits rather
//! than ambient globals, which keeps the session engine testable against
//! in-memory implementations (see [`crate::memory`]).

use std::path::PathBuf;
use std::sync::Arc;

use common::{
    AccountId, AlgoDefinition, AlgoId, AlgoStatus, BodPosition, BrokerAccount, Confirmation,
    MarketData, Order, OrderId, ParamMap, Pnl, Position, Security, SecurityId, SubAccount, User,
};
use tokio::sync::watch;

use crate::tokens::TokenRegistry;

/// Connectivity adapter, either an exchange session or a market-data feed.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    fn connected(&self) -> bool;
    fn reconnect(&self);
}

/// Reference data for every tradable security.
pub trait SecurityMaster: Send + Sync {
    fn get(&self, id: SecurityId) -> Option<Arc<Security>>;
    /// Every security, ascending by id.
    fn securities(&self) -> Vec<Arc<Security>>;
    /// Checksum advertised at login so clients can cache the full dump.
    fn check_sum(&self) -> String;
}

/// Users, sub-accounts and broker accounts.
pub trait AccountManager: Send + Sync {
    fn get_user(&self, name: &str) -> Option<Arc<User>>;
    fn get_sub_account(&self, id: AccountId) -> Option<Arc<SubAccount>>;
    fn find_sub_account(&self, name: &str) -> Option<Arc<SubAccount>>;
    fn users(&self) -> Vec<Arc<User>>;
    fn broker_accounts(&self) -> Vec<Arc<BrokerAccount>>;
}

/// Live market-data snapshots and the feed adapters behind them.
pub trait MarketDataManager: Send + Sync {
    /// Current snapshot; zeroed when the security has never ticked.
    fn snapshot(&self, id: SecurityId) -> MarketData;
    fn adapters(&self) -> Vec<Arc<dyn Adapter>>;
    fn get_adapter(&self, name: &str) -> Option<Arc<dyn Adapter>>;
}

/// Positions, PnL aggregates and beginning-of-day snapshots.
pub trait PositionManager: Send + Sync {
    fn position(&self, acc: AccountId, sec: SecurityId) -> Position;
    fn broker_position(&self, broker: AccountId, sec: SecurityId) -> Position;
    fn sub_positions(&self) -> Vec<((AccountId, SecurityId), Position)>;
    fn pnls(&self) -> Vec<(AccountId, Pnl)>;
    fn bods(&self) -> Vec<((AccountId, SecurityId), BodPosition)>;
    /// Identifier of the current trading session.
    fn session(&self) -> String;
}

/// Order routing to the exchanges.
pub trait ExchangeConnectivity: Send + Sync {
    fn place(&self, order: Order);
    fn cancel(&self, order: &Order);
    fn adapters(&self) -> Vec<Arc<dyn Adapter>>;
    fn get_adapter(&self, name: &str) -> Option<Arc<dyn Adapter>>;
}

/// Selects a running algo by client token or server-assigned id.
#[derive(Debug, Clone)]
pub enum AlgoSelector {
    Token(String),
    Id(AlgoId),
}

/// Algorithmic-strategy control.
pub trait AlgoManager: Send + Sync {
    /// Spawn an instance. Returns false when no adapter matches `name`.
    fn spawn(
        &self,
        params: Option<ParamMap>,
        name: &str,
        user: Arc<User>,
        raw_params: &str,
        token: &str,
    ) -> bool;
    /// Whether a live instance already owns `token`.
    fn is_running(&self, token: &str) -> bool;
    fn stop(&self, sel: AlgoSelector);
    fn modify(&self, sel: AlgoSelector, params: ParamMap);
    /// Adapters advertised to clients at login.
    fn definitions(&self) -> Vec<AlgoDefinition>;
    /// Persisted status records with sequence greater than `seq`.
    fn replay(&self, seq: i64) -> Vec<AlgoStatus>;
    /// Halt every running instance (controlled shutdown).
    fn stop_all(&self);
}

/// The global order book: every order the server has seen this session.
pub trait OrderStore: Send + Sync {
    fn get(&self, id: OrderId) -> Option<Arc<Order>>;
    /// Persisted confirmations with sequence greater than `seq`.
    fn replay(&self, seq: i64) -> Vec<Arc<Confirmation>>;
    /// Force-cancel every live order (controlled shutdown).
    fn cancel_all(&self);
}

/// Lifecycle of the hosting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    /// No longer accepting connections; live orders being cancelled.
    Draining,
    Stopped,
}

/// Watch-channel shutdown signal shared between the accept loop and the
/// admin `shutdown` handler. Replaces hard process termination: observers
/// drain when the state changes.
pub struct ShutdownSignal {
    tx: watch::Sender<ServerState>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ServerState::Running);
        Self { tx }
    }

    pub fn drain(&self) {
        self.tx.send_replace(ServerState::Draining);
    }

    pub fn stop(&self) {
        self.tx.send_replace(ServerState::Stopped);
    }

    pub fn state(&self) -> ServerState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a session needs from the hosting process: the manager
/// singletons, the token registry, the filesystem roots, and the shutdown
/// signal.
pub struct Services {
    pub securities: Arc<dyn SecurityMaster>,
    pub accounts: Arc<dyn AccountManager>,
    pub market_data: Arc<dyn MarketDataManager>,
    pub positions: Arc<dyn PositionManager>,
    pub exchange: Arc<dyn ExchangeConnectivity>,
    pub algos: Arc<dyn AlgoManager>,
    pub orders: Arc<dyn OrderStore>,
    pub tokens: TokenRegistry,
    pub shutdown: ShutdownSignal,
    /// Directory holding strategy source files.
    pub algo_root: PathBuf,
    /// Directory holding `pnl-<account>` history logs.
    pub pnl_root: PathBuf,
    /// Process start, epoch seconds; echoed in login replies.
    pub start_time: i64,
}
