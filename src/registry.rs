use async_openai::types::FunctionObject;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ToolError;
use crate::tools::search::DEFAULT_REGION;
use crate::tools::{
    DEFAULT_TOP, DataSource, GetPoolsInput, GetStableCoinPricesInput, GetStableCoinsInput,
    InternetSearchInput,
};

type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// Common contract every tool implementation satisfies.
type ToolHandler = for<'a> fn(&'a dyn DataSource, Value) -> ToolFuture<'a>;

/// The tools exposed to the assistant. `FetchStableCoins` and `StableCoins`
/// are two published names for the same fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    FetchStableCoins,
    InternetSearch,
    TopPoolsByTvl,
    StableCoins,
    StableCoinPrices,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::FetchStableCoins,
        ToolKind::InternetSearch,
        ToolKind::TopPoolsByTvl,
        ToolKind::StableCoins,
        ToolKind::StableCoinPrices,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::FetchStableCoins => "fetch_stable_coins_tool",
            ToolKind::InternetSearch => "internet_search_tool",
            ToolKind::TopPoolsByTvl => "Get_Top_Pools_by_TVL",
            ToolKind::StableCoins => "Get_Stable_Coins",
            ToolKind::StableCoinPrices => "Get_Stable_Coin_Prices",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::FetchStableCoins | ToolKind::StableCoins => {
                "Retrieve the top stablecoins by market cap."
            }
            ToolKind::InternetSearch => {
                "Perform an internet search for any news or information using DuckDuckGo. \
                 Use this tool to search for information on the web from reliable and good \
                 sources. \
                 Only use proper and good sources related to crypto to get the information. \
                 Also use this to fetch the price of any crypto coins"
            }
            ToolKind::TopPoolsByTvl => {
                "Retrieve the top liquidity pools by Total Value Locked (TVL)."
            }
            ToolKind::StableCoinPrices => {
                "Retrieve the prices of stablecoins such as bitcoin, doge coin etc."
            }
        }
    }

    fn parameters(self) -> Value {
        match self {
            ToolKind::FetchStableCoins | ToolKind::StableCoins => {
                parameters_schema::<GetStableCoinsInput>()
            }
            ToolKind::InternetSearch => parameters_schema::<InternetSearchInput>(),
            ToolKind::TopPoolsByTvl => parameters_schema::<GetPoolsInput>(),
            ToolKind::StableCoinPrices => parameters_schema::<GetStableCoinPricesInput>(),
        }
    }

    fn handler(self) -> ToolHandler {
        match self {
            ToolKind::FetchStableCoins | ToolKind::StableCoins => run_stablecoins,
            ToolKind::InternetSearch => run_search,
            ToolKind::TopPoolsByTvl => run_pools,
            ToolKind::StableCoinPrices => run_prices,
        }
    }
}

fn parameters_schema<T: JsonSchema>() -> Value {
    let mut schema = schemars::schema_for!(T).to_value();
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
    }
    schema
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    // `{}` and `null` both mean "all defaults"
    let args = if args.is_null() { json!({}) } else { args };
    Ok(serde_json::from_value(args)?)
}

fn run_stablecoins(source: &dyn DataSource, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let input: GetStableCoinsInput = decode(args)?;
        let coins = source
            .top_stablecoins(input.top_m.unwrap_or(DEFAULT_TOP))
            .await?;
        Ok(json!(coins))
    })
}

fn run_pools(source: &dyn DataSource, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let input: GetPoolsInput = decode(args)?;
        let pools = source.top_pools(input.top_n.unwrap_or(DEFAULT_TOP)).await?;
        Ok(json!({ "pools": pools }))
    })
}

fn run_prices(source: &dyn DataSource, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let _: GetStableCoinPricesInput = decode(args)?;
        Ok(source.stablecoin_prices().await?)
    })
}

fn run_search(source: &dyn DataSource, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let input: InternetSearchInput = decode(args)?;
        let region = input.region.as_deref().unwrap_or(DEFAULT_REGION);
        let results = source
            .web_search(&input.query, region, input.max_results.unwrap_or(DEFAULT_TOP))
            .await?;
        Ok(json!({ "results": results }))
    })
}

/// Static registry entry
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub parameters: Value,
}

impl ToolSpec {
    /// Function tool definition as registered with the assistant.
    pub fn definition(&self) -> FunctionObject {
        FunctionObject {
            name: self.kind.name().to_string(),
            description: Some(self.kind.description().to_string()),
            parameters: Some(self.parameters.clone()),
            strict: None,
        }
    }
}

/// Maps tool names onto data-source calls. Built once at startup and shared
/// read-only between requests.
pub struct ToolRegistry {
    source: Arc<dyn DataSource>,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        let specs = ToolKind::ALL
            .into_iter()
            .map(|kind| ToolSpec {
                kind,
                parameters: kind.parameters(),
            })
            .collect();
        Self { source, specs }
    }

    /// Tool definitions in the order they are published to the assistant.
    pub fn definitions(&self) -> Vec<FunctionObject> {
        self.specs.iter().map(ToolSpec::definition).collect()
    }

    /// Run one tool call. Never fails: problems come back as
    /// `{"Error": "..."}` so the assistant can still answer.
    pub async fn dispatch(&self, name: &str, args: Value) -> Value {
        let Some(kind) = ToolKind::from_name(name) else {
            tracing::warn!(tool = %name, "Assistant requested an unknown tool");
            return error_record(ToolError::Unknown(name.to_string()).to_string());
        };

        tracing::info!(tool = %name, "Executing tool");
        match (kind.handler())(self.source.as_ref(), args).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool execution failed");
                error_record(format!("Error executing {name}: {e}"))
            }
        }
    }
}

fn error_record(message: String) -> Value {
    json!({ "Error": message })
}
