use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DataSourceError;
use crate::models::{Pool, deserialize_flexible_count};

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GetPoolsInput {
    #[serde(default, deserialize_with = "deserialize_flexible_count")]
    #[schemars(
        with = "Option<u32>",
        description = "Number of top liquidity pools by TVL to retrieve (default 5)"
    )]
    pub top_n: Option<usize>,
}

/// Normalise the pools payload into the `limit` pools with the highest TVL.
///
/// The whole `data` list is sorted before truncation; the registry's own
/// ordering is not by TVL.
pub fn parse_pools(payload: &Value, limit: usize) -> Result<Vec<Pool>, DataSourceError> {
    let object = payload.as_object().ok_or_else(|| {
        DataSourceError::Format("Unexpected format: expected a JSON object.".to_string())
    })?;

    let pools = match object.get("data") {
        None => return Ok(Vec::new()),
        Some(Value::Array(pools)) => pools,
        Some(_) => {
            return Err(DataSourceError::Format(
                "Data format error: 'data' is not a list.".to_string(),
            ));
        }
    };

    let mut ranked: Vec<&Value> = pools.iter().collect();
    // stable: equal TVL keeps registry order
    ranked.sort_by(|a, b| tvl_of(b).total_cmp(&tvl_of(a)));

    Ok(ranked.into_iter().take(limit).map(pool_from_entry).collect())
}

fn tvl_of(entry: &Value) -> f64 {
    entry.get("tvlUsd").and_then(Value::as_f64).unwrap_or(0.0)
}

fn pool_from_entry(entry: &Value) -> Pool {
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string()
    };

    let apy = match entry.get("apy") {
        Some(rate @ Value::Number(_)) => rate.clone(),
        _ => Value::String("N/A".to_string()),
    };

    Pool {
        project: text("project"),
        symbol: text("symbol"),
        tvl_usd: tvl_of(entry),
        apy,
        chain: text("chain"),
    }
}
