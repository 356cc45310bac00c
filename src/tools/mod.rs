/// Data-source adapters behind the assistant's function tools
pub mod pools;
pub mod prices;
pub mod search;
pub mod source;
pub mod stablecoins;

pub use pools::GetPoolsInput;
pub use prices::GetStableCoinPricesInput;
pub use search::InternetSearchInput;
pub use source::{DataSource, HttpDataSources};
pub use stablecoins::GetStableCoinsInput;

/// Default number of records returned when the assistant leaves a count out.
pub const DEFAULT_TOP: usize = 5;
