//! Per-connection session: state, mailbox strand, lifecycle and registry.
//!
//! Every connection owns one `Session`. All of its state is mutated from a
//! single task draining the session's mailbox, so handlers never contend;
//! the only field readable off that task is the closed flag. External
//! events (inbound frames, execution reports, algo status, test output)
//! enter through a cloneable [`SessionHandle`] that enqueues commands.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    AccountId, AlgoStatus, Confirmation, MarketData, SecurityId, User,
};
use dashmap::DashMap;
use metrics::counter;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::encoder;
use crate::error::GatewayError;
use crate::services::Services;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Current epoch time in seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// One market-data subscription: the last snapshot published to this
/// session and how many subscribes are holding it open.
#[derive(Default)]
pub(crate) struct Sub {
    pub last: MarketData,
    pub refs: i32,
}

/// Commands serialized onto a session's strand.
pub enum SessionCommand {
    /// An inbound text frame, with the transport-supplied token when the
    /// transport is stateless.
    Frame { text: String, token: Option<String> },
    /// Execution report pushed by exchange connectivity.
    Confirmation(Arc<Confirmation>),
    /// Status pushed by the algo manager.
    AlgoStatus(AlgoStatus),
    /// Output of a test-mode algo run.
    TestOutput {
        token: String,
        msg: String,
        stopped: bool,
    },
}

/// State of one client connection.
pub struct Session {
    id: SessionId,
    out: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    pub(crate) stateless: bool,
    pub(crate) services: Arc<Services>,
    pub(crate) user: Option<Arc<User>>,
    pub(crate) subs: HashMap<SecurityId, Sub>,
    pub(crate) single_pnls: HashMap<(AccountId, SecurityId), (f64, f64)>,
    pub(crate) account_pnls: HashMap<AccountId, (f64, f64)>,
    pub(crate) exchange_status: HashMap<String, bool>,
    pub(crate) feed_status: HashMap<String, bool>,
    pub(crate) test_algo_tokens: HashSet<String>,
    pub(crate) sub_pnl: bool,
    pub(crate) publishing: bool,
}

impl Session {
    /// Bind a session to its outbound text sink. `stateless` transports
    /// carry a token with every frame and never receive streamed data.
    pub fn new(
        out: mpsc::UnboundedSender<String>,
        stateless: bool,
        services: Arc<Services>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            out,
            closed: Arc::new(AtomicBool::new(false)),
            stateless,
            services,
            user: None,
            subs: HashMap::new(),
            single_pnls: HashMap::new(),
            account_pnls: HashMap::new(),
            exchange_status: HashMap::new(),
            feed_status: HashMap::new(),
            test_algo_tokens: HashSet::new(),
            sub_pnl: false,
            publishing: false,
        }
    }

    /// Spawn the strand task and return the handle used by the transport
    /// and the manager singletons.
    pub fn spawn(
        out: mpsc::UnboundedSender<String>,
        stateless: bool,
        services: Arc<Services>,
    ) -> SessionHandle {
        let mut session = Session::new(out, stateless, services);
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            id: session.id,
            cmd: cmd_tx,
            closed: session.closed.clone(),
        };
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                if session.is_closed() {
                    break;
                }
                tokio::select! {
                    biased;

                    cmd = cmd_rx.recv() => match cmd {
                        Some(cmd) => session.apply(cmd),
                        None => break,
                    },

                    _ = tick.tick() => session.publish(),
                }
            }
            debug!(session = %session.id, "session task finished");
        });
        handle
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Mark the session closed. Pending callbacks become no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Security ids with a live subscription.
    pub fn subscriptions(&self) -> Vec<SecurityId> {
        self.subs.keys().copied().collect()
    }

    /// Run one command on the strand.
    pub fn apply(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Frame { text, token } => {
                self.handle_frame(&text, token.as_deref())
            }
            SessionCommand::Confirmation(cm) => self.deliver_confirmation(&cm),
            SessionCommand::AlgoStatus(st) => self.deliver_algo_status(&st),
            SessionCommand::TestOutput { token, msg, stopped } => {
                self.deliver_test_output(&token, &msg, stopped)
            }
        }
    }

    /// Dispatch one inbound text frame. Failures become `["error", …]`
    /// frames; the session stays open.
    pub fn handle_frame(&mut self, text: &str, token: Option<&str>) {
        if text == "h" {
            self.send_text("h");
            return;
        }
        counter!("gateway_frames_total").increment(1);
        if let Err(err) = self.dispatch(text, token) {
            counter!("gateway_frame_errors_total").increment(1);
            debug!(session = %self.id, %err, frame = text, "frame failed");
            let frame = match &err {
                GatewayError::Parse(_) => {
                    json!(["error", "json", text, "invalid json string"])
                }
                _ => json!(["error", "dispatch", text, err.to_string()]),
            };
            self.send_json(&frame);
        }
    }

    fn dispatch(&mut self, text: &str, token: Option<&str>) -> crate::error::Result<()> {
        let j: Value = serde_json::from_str(text)?;
        let action = crate::codec::get_str(&j[0])?.to_string();
        if action.is_empty() {
            let frame = json!(["error", "msg", "action", "empty action"]);
            debug!(session = %self.id, frame = text, "empty action");
            self.send_json(&frame);
            return Ok(());
        }
        if action != "login" && action != "validate_user" && self.user.is_none() {
            self.user = token.and_then(|t| self.services.tokens.get(t));
            if self.user.is_none() {
                self.send_json(&json!(["error", "msg", "action", "you must login first"]));
                return Ok(());
            }
        }
        match action.as_str() {
            "login" | "validate_user" => self.on_login(&action, &j),
            "bod" => self.on_bod(),
            "reconnect" => self.on_reconnect(&j),
            "securities" => self.on_securities(),
            "position" => self.on_position(&j, text),
            "offline" => self.on_offline(&j),
            "shutdown" => self.on_shutdown(&j),
            "cancel" => self.on_cancel(&j, text),
            "order" => self.on_order(&j, text),
            "algo" => self.on_algo(&j, text),
            "pnl" => self.on_pnl(&j),
            "sub" => self.on_sub(&j),
            "unsub" => self.on_unsub(&j),
            "algoFile" => self.on_algo_file(&j),
            "deleteAlgoFile" => self.on_delete_algo_file(&j),
            "saveAlgoFile" => self.on_save_algo_file(&j),
            // Unrecognized actions are dropped without a reply.
            _ => Ok(()),
        }
    }

    /// Forward an execution report to the client when the session may see
    /// it: the order's sub-account must be within the user's set.
    pub fn deliver_confirmation(&self, cm: &Confirmation) {
        let Some(user) = &self.user else { return };
        if !user.has_sub_account(cm.order.contract.sub_account.id) {
            return;
        }
        if let Some(frame) = encoder::confirmation_frame(cm, false) {
            self.send_json(&frame);
        }
    }

    /// Forward an algo status push to the owning user's session.
    pub fn deliver_algo_status(&self, st: &AlgoStatus) {
        let Some(user) = &self.user else { return };
        if user.id != st.user_id {
            return;
        }
        self.send_json(&encoder::algo_status_frame(st, false));
    }

    /// Forward test-mode algo output to the session that spawned the run.
    pub fn deliver_test_output(&self, token: &str, msg: &str, stopped: bool) {
        if !self.test_algo_tokens.contains(token) {
            return;
        }
        self.send_json(&json!(["test_msg", msg]));
        if stopped {
            self.send_json(&json!(["test_done", token]));
        }
    }

    pub(crate) fn send_json(&self, v: &Value) {
        self.send_text(v.to_string());
    }

    pub(crate) fn send_text(&self, text: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        if self.out.send(text.into()).is_err() {
            // The transport hung up; nothing further can be emitted.
            self.closed.store(true, Ordering::Relaxed);
        }
    }
}

/// Cloneable handle onto a session's strand. Transports feed frames
/// through it; the manager singletons push server-initiated events.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    cmd: mpsc::UnboundedSender<SessionCommand>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn on_message(&self, text: impl Into<String>, token: Option<String>) {
        self.enqueue(SessionCommand::Frame {
            text: text.into(),
            token,
        });
    }

    pub fn push_confirmation(&self, cm: Arc<Confirmation>) {
        self.enqueue(SessionCommand::Confirmation(cm));
    }

    pub fn push_algo_status(&self, st: AlgoStatus) {
        self.enqueue(SessionCommand::AlgoStatus(st));
    }

    pub fn push_test_output(&self, token: impl Into<String>, msg: impl Into<String>, stopped: bool) {
        self.enqueue(SessionCommand::TestOutput {
            token: token.into(),
            msg: msg.into(),
            stopped,
        });
    }

    /// Flip the closed flag. No new work is scheduled once set; in-flight
    /// commands run to completion as no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn enqueue(&self, cmd: SessionCommand) {
        if self.is_closed() {
            return;
        }
        let _ = self.cmd.send(cmd);
    }
}

/// Registry of live sessions: the fan-out entry point handed to the
/// manager singletons for server-initiated traffic.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn unregister(&self, id: &SessionId) {
        self.sessions.remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Offer an execution report to every session; each filters by its
    /// own user's sub-account set.
    pub fn broadcast_confirmation(&self, cm: &Arc<Confirmation>) {
        for entry in self.sessions.iter() {
            entry.value().push_confirmation(cm.clone());
        }
    }

    pub fn broadcast_algo_status(&self, st: &AlgoStatus) {
        for entry in self.sessions.iter() {
            entry.value().push_algo_status(st.clone());
        }
    }

    pub fn broadcast_test_output(&self, token: &str, msg: &str, stopped: bool) {
        for entry in self.sessions.iter() {
            entry.value().push_test_output(token, msg, stopped);
        }
    }
}
