//! Custom claim rules, evaluated after the signature is trusted.

use serde_json::{Map, Value};
use stsgate_core::{ClaimRule, Error, Result};

/// Check every rule against the payload. All rules must hold; the first
/// failing rule is reported by its position.
///
/// Strings are matched as-is. Numbers and booleans are matched in their
/// JSON text form, so `run_id` works whether the issuer sends it quoted or
/// not. Any other value, and a missing claim, fails the rule.
pub fn check(payload: &Map<String, Value>, rules: &[ClaimRule]) -> Result<()> {
    for (rule_index, rule) in rules.iter().enumerate() {
        let satisfied = match payload.get(rule.claim()) {
            Some(Value::String(value)) => rule.matches(value),
            Some(value @ (Value::Number(_) | Value::Bool(_))) => rule.matches(&value.to_string()),
            _ => false,
        };
        if !satisfied {
            return Err(Error::ClaimMismatch {
                rule_index,
                claim: rule.claim().to_string(),
            });
        }
    }
    Ok(())
}
