use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDescriptor {
    pub symbol: String,
    pub name: String,
    /// Market benchmarks are part of the universe but never bucketed by industry.
    #[serde(default)]
    pub is_index: bool,
}

impl SymbolDescriptor {
    pub fn stock(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            is_index: false,
        }
    }

    pub fn index(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            is_index: true,
        }
    }
}

/// Benchmarks appended to every universe.
pub fn benchmark_indexes() -> Vec<SymbolDescriptor> {
    [
        ("^GSPC", "S&P 500"),
        ("^NDX", "NASDAQ"),
        ("^GDAXI", "DAX"),
        ("^STOXX50E", "EURO STOXX 50"),
        ("^HSI", "Hang Seng Index"),
        ("^N225", "Nikkei 225"),
        ("^NSEI", "NIFTY 50"),
    ]
    .into_iter()
    .map(|(symbol, name)| SymbolDescriptor::index(symbol, name))
    .collect()
}
