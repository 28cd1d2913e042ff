//! Outbound encoding of execution reports and algo status frames.
//!
//! The command word is lowercase for live pushes and capitalized for
//! offline replay, so clients can tell the streams apart.

use common::{AlgoStatus, Confirmation, ExecType, TransType};
use serde_json::{json, Value};

/// Encode one execution report, or None when the report is not
/// client-visible (fill subtypes other than new/cancel).
pub fn confirmation_frame(cm: &Confirmation, offline: bool) -> Option<Value> {
    let order = &cm.order;
    let c = &order.contract;
    let cmd = if offline { "Order" } else { "order" };
    let mut j = vec![
        json!(cmd),
        json!(order.id),
        json!(cm.transaction_time / 1_000_000),
        json!(cm.seq),
    ];
    match cm.exec_type {
        ExecType::UnconfirmedNew => {
            j.push(json!("unconfirmed"));
            j.push(json!(c.sec.id));
            j.push(json!(order.algo_id));
            j.push(json!(order.user.id));
            j.push(json!(c.sub_account.id));
            j.push(json!(order.broker_account_id));
            j.push(json!(c.qty));
            j.push(json!(c.price));
            j.push(json!(c.side.as_str()));
            j.push(json!(c.typ.as_str()));
            j.push(json!(c.tif.as_str()));
        }
        ExecType::PendingNew | ExecType::PendingCancel | ExecType::New | ExecType::Canceled => {
            let status = match cm.exec_type {
                ExecType::PendingNew => "pending",
                ExecType::PendingCancel => "pending_cancel",
                ExecType::New => "new",
                _ => "cancelled",
            };
            j.push(json!(status));
            if cm.exec_type == ExecType::New {
                j.push(json!(cm.exchange_order_id));
            }
            if !cm.text.is_empty() {
                j.push(json!(cm.text));
            }
        }
        ExecType::Filled | ExecType::PartiallyFilled => {
            let status = if cm.exec_type == ExecType::Filled {
                "filled"
            } else {
                "partial"
            };
            j.push(json!(status));
            j.push(json!(cm.last_shares));
            j.push(json!(cm.last_px));
            j.push(json!(cm.exec_id));
            match cm.trans_type {
                TransType::New => j.push(json!("new")),
                TransType::Cancel => j.push(json!("cancel")),
                _ => return None,
            }
        }
        ExecType::Rejected | ExecType::CancelRejected | ExecType::RiskRejected => {
            let status = match cm.exec_type {
                ExecType::Rejected => "new_rejected",
                ExecType::CancelRejected => "cancel_rejected",
                _ => "risk_rejected",
            };
            j.push(json!(status));
            j.push(json!(cm.text));
            if cm.exec_type == ExecType::RiskRejected {
                j.push(json!(c.sec.id));
                j.push(json!(order.algo_id));
                j.push(json!(order.user.id));
                j.push(json!(c.sub_account.id));
                j.push(json!(c.qty));
                j.push(json!(c.price));
                j.push(json!(c.side.as_str()));
                j.push(json!(c.typ.as_str()));
                j.push(json!(c.tif.as_str()));
                if order.orig_id != 0 {
                    j.push(json!(order.orig_id));
                }
            }
        }
    }
    Some(Value::Array(j))
}

/// Encode an algo status record.
pub fn algo_status_frame(st: &AlgoStatus, offline: bool) -> Value {
    json!([
        if offline { "Algo" } else { "algo" },
        st.seq,
        st.id,
        st.tm,
        st.token,
        st.name,
        st.status,
        st.body,
    ])
}
