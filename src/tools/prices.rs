use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DataSourceError;

/// The prices tool takes no real input; the flag keeps the schema non-empty.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GetStableCoinPricesInput {
    #[serde(default)]
    pub dummy: Option<bool>,
}

pub fn parse_prices(payload: Value) -> Result<Value, DataSourceError> {
    match payload {
        Value::Array(mut items) if !items.is_empty() => Ok(items.swap_remove(0)),
        _ => Err(DataSourceError::Format(
            "Unexpected JSON format: Expected a non-empty list.".to_string(),
        )),
    }
}
