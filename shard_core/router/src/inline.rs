use crate::RouteError;
use common::Value;
use once_cell::sync::Lazy;
use regex::Regex;

static MODULO_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>.*)\$\{\s*(?P<col>\w+)\s*%\s*(?P<modulus>\d+)\s*\}(?P<suffix>.*)$").unwrap());
static IDENTITY_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>.*)\$\{\s*(?P<col>\w+)\s*\}(?P<suffix>.*)$").unwrap());

/// Evaluate an inline sharding expression against one concrete value.
///
/// Recognized forms, tried in order: `pfx${col % n}sfx` (modulo),
/// `pfx${col}sfx` (identity). Anything else is returned literally.
pub fn evaluate_inline(expression: &str, column: &str, value: &Value) -> Result<String, RouteError> {
    let shard_key = || {
        value
            .as_shard_key()
            .ok_or_else(|| RouteError::UnsupportedShardingValue {
                column: column.to_string(),
                value: value.to_string(),
            })
    };

    if let Some(caps) = MODULO_FORM.captures(expression) {
        let modulus: i64 = caps["modulus"]
            .parse()
            .map_err(|_| RouteError::InvalidRange(expression.to_string()))?;
        if modulus == 0 {
            return Err(RouteError::InvalidRange(expression.to_string()));
        }
        let v = shard_key()?;
        return Ok(format!(
            "{}{}{}",
            &caps["prefix"],
            v.rem_euclid(modulus),
            &caps["suffix"]
        ));
    }

    if let Some(caps) = IDENTITY_FORM.captures(expression) {
        let v = shard_key()?;
        return Ok(format!("{}{}{}", &caps["prefix"], v, &caps["suffix"]));
    }

    Ok(expression.to_string())
}
