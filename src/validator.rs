//! Normalizes weakly-typed inbound payloads into a [`Reading`].
//!
//! The push source is an external json feed, so nothing about the payload
//! shape is trusted. Each field is looked up by its canonical key and, for the
//! raw-socket bridge, a lower-case alias. Anything that is not a finite,
//! non-negative number becomes 0. Never fails.

use serde_json::Value;

use crate::domain::Reading;

/// canonical key followed by accepted aliases
const CPS_KEYS: &[&str] = &["CPS", "cps"];
const CPM_KEYS: &[&str] = &["CPM", "cpm"];
const DOSE_KEYS: &[&str] = &["Dose_uSv", "uSvph"];
const ACTIVITY_CI_KEYS: &[&str] = &["Activity_Ci"];
const ACTIVITY_BQ_KEYS: &[&str] = &["Activity_Bq"];

pub fn validate(payload: &Value) -> Reading {
    Reading {
        cps: field(payload, CPS_KEYS),
        cpm: field(payload, CPM_KEYS),
        dose_usv_h: field(payload, DOSE_KEYS),
        activity_ci: field(payload, ACTIVITY_CI_KEYS),
        activity_bq: field(payload, ACTIVITY_BQ_KEYS),
    }
}

/// first present key wins, even if its value is garbage
fn field(payload: &Value, keys: &[&str]) -> f64 {
    let Some(obj) = payload.as_object() else {
        return 0.0;
    };
    keys.iter()
        .find_map(|k| obj.get(*k))
        .map(coerce)
        .unwrap_or(0.0)
}

fn coerce(value: &Value) -> f64 {
    match value.as_f64() {
        Some(n) if n.is_finite() && n >= 0.0 => n,
        _ => 0.0,
    }
}
