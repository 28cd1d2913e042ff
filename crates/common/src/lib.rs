//! Domain model shared across the trading gateway workspace.
//!
//! These are the types the session engine exchanges with the server's
//! singleton managers: securities and accounts, orders and execution
//! reports, market-data snapshots, positions, and the polymorphic
//! parameter values carried by algo control messages.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Numeric identifier assigned to a security by the security master.
pub type SecurityId = i64;
/// Identifier of a sub-account or broker account.
pub type AccountId = i64;
/// Identifier of a user record.
pub type UserId = i64;
/// Server-assigned order identifier.
pub type OrderId = i64;
/// Identifier of a running algo instance.
pub type AlgoId = i64;

// ============================================================================
// Order enumerations
// ============================================================================

/// The side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
    Short,
}

impl Side {
    /// Parse the canonical wire spelling, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            "short" => Some(Self::Short),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order execution style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrdType {
    #[default]
    Limit,
    Market,
    Stop,
    StopLimit,
    Otc,
}

impl OrdType {
    /// Match case-insensitively against the non-limit spellings; anything
    /// unrecognized is a limit order.
    pub fn parse_or_limit(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "market" => Self::Market,
            "stop" => Self::Stop,
            "stop limit" => Self::StopLimit,
            "otc" => Self::Otc,
            _ => Self::Limit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Market => "market",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::Otc => "otc",
        }
    }

    /// True for the order styles that require a trigger price.
    pub fn needs_stop_price(self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit)
    }
}

impl fmt::Display for OrdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-in-force qualifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[default]
    Day,
    ImmediateOrCancel,
    GoodTillCancel,
    AtTheOpening,
    FillOrKill,
    GoodTillCrossing,
}

impl TimeInForce {
    /// Match case-insensitively against the FIX-style spellings; anything
    /// unrecognized is a Day order.
    pub fn parse_or_day(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GTC" => Self::GoodTillCancel,
            "OPG" => Self::AtTheOpening,
            "IOC" => Self::ImmediateOrCancel,
            "FOK" => Self::FillOrKill,
            "GTX" => Self::GoodTillCrossing,
            _ => Self::Day,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "Day",
            Self::ImmediateOrCancel => "IOC",
            Self::GoodTillCancel => "GTC",
            Self::AtTheOpening => "OPG",
            Self::FillOrKill => "FOK",
            Self::GoodTillCrossing => "GTX",
        }
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution-report type carried by a [`Confirmation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecType {
    UnconfirmedNew,
    PendingNew,
    New,
    PendingCancel,
    Canceled,
    Filled,
    PartiallyFilled,
    Rejected,
    CancelRejected,
    RiskRejected,
}

/// Transaction subtype of a fill report. Subtypes other than `New` and
/// `Cancel` are not forwarded to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransType {
    New,
    Cancel,
    Correct,
}

// ============================================================================
// Reference data
// ============================================================================

/// Immutable security-master record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Security {
    pub id: SecurityId,
    pub symbol: String,
    pub exchange_id: i64,
    pub exchange_name: String,
    pub sec_type: String,
    pub lot_size: f64,
    pub multiplier: f64,
    pub close_price: f64,
    pub rate: f64,
    pub currency: String,
    pub adv20: f64,
    pub market_cap: f64,
    pub sector: i64,
    pub industry_group: i64,
    pub industry: i64,
    pub sub_industry: i64,
    pub local_symbol: String,
    pub bbgid: String,
    pub cusip: String,
    pub sedol: String,
    pub isin: String,
}

/// External-counterparty account through which orders are routed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub id: AccountId,
    pub name: String,
}

/// Logical partition of a user's trading permissions; the unit at which
/// risk and PnL are tracked.
#[derive(Debug, Clone, Default)]
pub struct SubAccount {
    pub id: AccountId,
    pub name: String,
    /// Broker route per exchange id.
    pub broker_accounts: HashMap<i64, Arc<BrokerAccount>>,
}

impl SubAccount {
    /// Resolve the broker account used for a security's exchange.
    pub fn broker(&self, sec: &Security) -> Option<&Arc<BrokerAccount>> {
        self.broker_accounts.get(&sec.exchange_id)
    }
}

/// Authenticated user record. The gateway never mutates users; the
/// sub-account map is shared copy-on-write with the account manager.
#[derive(Debug, Clone, Default)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// SHA-1 digest of the password, 40 lowercase hex chars.
    pub password: String,
    pub is_disabled: bool,
    pub is_admin: bool,
    pub sub_accounts: Arc<HashMap<AccountId, Arc<SubAccount>>>,
}

impl User {
    pub fn has_sub_account(&self, id: AccountId) -> bool {
        self.sub_accounts.contains_key(&id)
    }
}

// ============================================================================
// Orders and execution reports
// ============================================================================

/// The economic terms of an order before it is accepted by the server.
#[derive(Debug, Clone)]
pub struct Contract {
    pub sec: Arc<Security>,
    pub sub_account: Arc<SubAccount>,
    pub side: Side,
    pub typ: OrdType,
    pub tif: TimeInForce,
    pub qty: f64,
    pub price: f64,
    pub stop_price: f64,
}

/// A contract accepted by the server, with routing identity attached.
#[derive(Debug, Clone)]
pub struct Order {
    pub contract: Contract,
    pub id: OrderId,
    pub user: Arc<User>,
    pub algo_id: AlgoId,
    pub broker_account_id: AccountId,
    /// For cancel/replace, the id of the order being replaced.
    pub orig_id: OrderId,
    pub tm: i64,
    pub seq: u32,
}

/// Execution report for one order transition.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub order: Arc<Order>,
    pub exec_type: ExecType,
    /// Transaction time in microseconds since the epoch.
    pub transaction_time: i64,
    /// Monotonic sequence over the confirmation store.
    pub seq: u32,
    pub exec_id: String,
    pub text: String,
    pub last_shares: f64,
    pub last_px: f64,
    pub trans_type: TransType,
    /// Exchange-assigned order id, reported on acknowledgement.
    pub exchange_order_id: String,
}

// ============================================================================
// Market data
// ============================================================================

/// Last-trade aggregates of a market-data snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub qty: f64,
    pub volume: f64,
    pub vwap: f64,
}

/// One level of book depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub ask_price: f64,
    pub ask_size: f64,
    pub bid_price: f64,
    pub bid_size: f64,
}

/// Full snapshot for one security: trade aggregates plus five levels of
/// depth. Differential publishing compares snapshots field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Snapshot timestamp, epoch seconds. Equal timestamps mean the
    /// snapshot has not ticked.
    pub tm: i64,
    pub trade: TradeTick,
    pub depth: [DepthLevel; 5],
}

// ============================================================================
// Positions and PnL
// ============================================================================

/// Position of one (account, security) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty: f64,
    pub avg_px: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_bought_qty: f64,
    pub total_sold_qty: f64,
    pub total_outstanding_buy_qty: f64,
    pub total_outstanding_sell_qty: f64,
    pub broker_account_id: AccountId,
    pub tm: i64,
}

/// Aggregate account-level PnL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pnl {
    pub realized: f64,
    pub unrealized: f64,
}

/// Beginning-of-day position snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BodPosition {
    pub qty: f64,
    pub avg_px: f64,
    pub realized_pnl: f64,
    pub broker_account_id: AccountId,
    pub tm: i64,
}

// ============================================================================
// Algo parameters
// ============================================================================

/// The `{src, sec, acc, side, qty}` object form of an algo parameter.
///
/// Parsed tuples are fully resolved; definitions advertise an unset tuple
/// whose members are all absent.
#[derive(Debug, Clone, Default)]
pub struct SecurityTuple {
    pub src: String,
    pub sec: Option<Arc<Security>>,
    pub acc: Option<Arc<SubAccount>>,
    pub side: Option<Side>,
    pub qty: f64,
}

/// Scalar algo-parameter value.
#[derive(Debug, Clone)]
pub enum ParamScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Security(SecurityTuple),
}

/// Algo-parameter value: a scalar or a vector of scalars.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Scalar(ParamScalar),
    Vector(Vec<ParamScalar>),
}

/// Named parameter map passed to algo spawn/modify.
pub type ParamMap = HashMap<String, ParamValue>;

/// One parameter declared by an algo adapter.
#[derive(Debug, Clone)]
pub struct AlgoParamDef {
    pub name: String,
    pub default_value: Option<ParamValue>,
    pub required: bool,
    pub min_value: f64,
    pub max_value: f64,
    pub precision: i32,
}

/// An algo adapter advertised to clients at login.
#[derive(Debug, Clone)]
pub struct AlgoDefinition {
    pub name: String,
    pub params: Vec<AlgoParamDef>,
}

/// Status record of an algo instance, pushed live and replayed offline.
#[derive(Debug, Clone)]
pub struct AlgoStatus {
    pub seq: u32,
    pub id: AlgoId,
    pub tm: i64,
    pub token: String,
    pub name: String,
    pub status: String,
    pub body: String,
    pub user_id: UserId,
}
