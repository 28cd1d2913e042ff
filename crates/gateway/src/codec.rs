//! Tagged value codec for the wire's parameter forms.
//!
//! Inbound: type-checked scalar extraction and parsing of the polymorphic
//! algo-parameter values, including the `{src, sec, acc, side, qty}`
//! security-tuple object form. Outbound: `[tag, value]` pair encoding used
//! when algo definitions are advertised at login.

use common::{ParamMap, ParamScalar, ParamValue, SecurityTuple, Side};
use serde_json::{json, Value};

use crate::error::{GatewayError, Result};
use crate::services::Services;

fn shape(v: &Value, expect: &str) -> GatewayError {
    GatewayError::Shape(format!("wrong json value: {v}, expect {expect}"))
}

/// Extract a string node.
pub fn get_str(v: &Value) -> Result<&str> {
    v.as_str().ok_or_else(|| shape(v, "string"))
}

/// Extract an integer node. Floats are rejected.
pub fn get_i64(v: &Value) -> Result<i64> {
    v.as_i64().ok_or_else(|| shape(v, "integer"))
}

/// Extract a float node. Integers are rejected.
pub fn get_f64(v: &Value) -> Result<f64> {
    if v.is_f64() {
        Ok(v.as_f64().unwrap_or_default())
    } else {
        Err(shape(v, "float"))
    }
}

/// Extract a bool node.
pub fn get_bool(v: &Value) -> Result<bool> {
    v.as_bool().ok_or_else(|| shape(v, "bool"))
}

/// Extract any numeric node, integer or float.
pub fn get_num(v: &Value) -> Result<f64> {
    if let Some(n) = v.as_i64() {
        return Ok(n as f64);
    }
    v.as_f64().ok_or_else(|| shape(v, "number"))
}

/// Parse one scalar parameter value.
///
/// Object nodes are security tuples: `sec` must resolve through the
/// security master, `acc` through the account manager (by integer id or by
/// name), the side must be a canonical spelling, and the quantity must be
/// positive.
pub fn parse_param_scalar(v: &Value, services: &Services) -> Result<ParamScalar> {
    if v.is_f64() {
        return Ok(ParamScalar::Float(v.as_f64().unwrap_or_default()));
    }
    if let Some(n) = v.as_i64() {
        return Ok(ParamScalar::Int(n));
    }
    if let Some(b) = v.as_bool() {
        return Ok(ParamScalar::Bool(b));
    }
    if let Some(s) = v.as_str() {
        return Ok(ParamScalar::Str(s.to_string()));
    }
    if let Some(obj) = v.as_object() {
        let mut tuple = SecurityTuple::default();
        for (key, val) in obj {
            match key.as_str() {
                "qty" => tuple.qty = get_num(val)?,
                "side" => {
                    let s = get_str(val)?;
                    tuple.side = Some(Side::parse(s).ok_or_else(|| {
                        GatewayError::Domain(format!("Unknown order side: {s}"))
                    })?);
                }
                "src" => tuple.src = get_str(val)?.to_string(),
                "sec" => {
                    let id = get_i64(val)?;
                    tuple.sec = Some(services.securities.get(id).ok_or_else(|| {
                        GatewayError::Domain(format!("Unknown security id: {id}"))
                    })?);
                }
                "acc" => {
                    if let Some(id) = val.as_i64() {
                        tuple.acc =
                            Some(services.accounts.get_sub_account(id).ok_or_else(|| {
                                GatewayError::Domain(format!("Unknown account id: {id}"))
                            })?);
                    } else if let Some(name) = val.as_str() {
                        tuple.acc =
                            Some(services.accounts.find_sub_account(name).ok_or_else(|| {
                                GatewayError::Domain(format!("Unknown account: {name}"))
                            })?);
                    }
                }
                _ => {}
            }
        }
        if tuple.qty <= 0.0 {
            return Err(GatewayError::Domain("Empty quantity".into()));
        }
        if tuple.side.is_none() {
            return Err(GatewayError::Domain("Empty side".into()));
        }
        if tuple.sec.is_none() {
            return Err(GatewayError::Domain("Empty security".into()));
        }
        if tuple.acc.is_none() {
            return Err(GatewayError::Domain("Empty account".into()));
        }
        return Ok(ParamScalar::Security(tuple));
    }
    Err(shape(v, "parameter value"))
}

/// Parse a parameter value: a scalar or an array of scalars.
pub fn parse_param_value(v: &Value, services: &Services) -> Result<ParamValue> {
    if let Some(items) = v.as_array() {
        let mut vec = Vec::with_capacity(items.len());
        for item in items {
            vec.push(parse_param_scalar(item, services)?);
        }
        return Ok(ParamValue::Vector(vec));
    }
    Ok(ParamValue::Scalar(parse_param_scalar(v, services)?))
}

/// Parse a named parameter map.
pub fn parse_params(v: &Value, services: &Services) -> Result<ParamMap> {
    let obj = v.as_object().ok_or_else(|| shape(v, "object"))?;
    let mut map = ParamMap::with_capacity(obj.len());
    for (key, val) in obj {
        map.insert(key.clone(), parse_param_value(val, services)?);
    }
    Ok(map)
}

fn jsonify_scalar(v: &ParamScalar, out: &mut Vec<Value>) {
    match v {
        ParamScalar::Bool(b) => {
            out.push(json!("bool"));
            out.push(json!(b));
        }
        ParamScalar::Int(n) => {
            out.push(json!("int"));
            out.push(json!(n));
        }
        ParamScalar::Float(f) => {
            out.push(json!("float"));
            out.push(json!(f));
        }
        ParamScalar::Str(s) => {
            out.push(json!("string"));
            out.push(json!(s));
        }
        // Clients render their own widget for security tuples; only the
        // tag travels.
        ParamScalar::Security(_) => out.push(json!("security")),
    }
}

/// Append the tagged encoding of a parameter value to `out`.
pub fn jsonify(v: &ParamValue, out: &mut Vec<Value>) {
    match v {
        ParamValue::Scalar(s) => jsonify_scalar(s, out),
        ParamValue::Vector(items) => {
            out.push(json!("vector"));
            let mut pairs = Vec::with_capacity(items.len());
            for item in items {
                let mut pair = Vec::new();
                jsonify_scalar(item, &mut pair);
                pairs.push(Value::Array(pair));
            }
            out.push(Value::Array(pairs));
        }
    }
}
