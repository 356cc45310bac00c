use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DataSourceError;
use crate::models::{StableCoin, deserialize_flexible_count};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GetStableCoinsInput {
    #[serde(default, deserialize_with = "deserialize_flexible_count")]
    #[schemars(
        with = "Option<u32>",
        description = "Number of top stablecoins by market cap to retrieve (default 5)"
    )]
    pub top_m: Option<usize>,
}

/// Normalise a stablecoin registry payload into at most `limit` records.
///
/// The registry already orders `peggedAssets` by market cap, so the first
/// `limit` entries are the top ones. Missing fields fall back to defaults.
pub fn parse_stablecoins(
    payload: &Value,
    limit: usize,
) -> Result<Vec<StableCoin>, DataSourceError> {
    let object = payload.as_object().ok_or_else(|| {
        DataSourceError::Format("Unexpected format: expected a JSON object.".to_string())
    })?;

    let assets = match object.get("peggedAssets") {
        None => return Ok(Vec::new()),
        Some(Value::Array(assets)) => assets,
        Some(_) => {
            return Err(DataSourceError::Format(
                "Unexpected format: 'peggedAssets' should be a list.".to_string(),
            ));
        }
    };

    Ok(assets.iter().take(limit).map(stablecoin_from_entry).collect())
}

fn stablecoin_from_entry(entry: &Value) -> StableCoin {
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN)
            .to_string()
    };

    StableCoin {
        name: text("name"),
        symbol: text("symbol"),
        price: entry.get("price").and_then(Value::as_f64).unwrap_or(0.0),
        gecko_id: text("gecko_id"),
    }
}
