use crate::domain::snapshot::round2;
use crate::market::cache::SnapshotCache;
use crate::market::index::{Grouping, IndustryIndex};

/// Cross-sectional averages over a symbol's industry or sector.
///
/// The subject symbol is one of its own peers.
pub struct PeerAggregator<'a> {
    cache: &'a SnapshotCache,
    index: &'a IndustryIndex,
}

impl<'a> PeerAggregator<'a> {
    pub fn new(cache: &'a SnapshotCache, index: &'a IndustryIndex) -> Self {
        Self { cache, index }
    }

    /// Mean of `parameter` over the group, rounded to 2 decimals.
    ///
    /// `None` means "unavailable": the symbol has no group key, the group is not
    /// indexed, no peer carries the parameter, or any peer carries it with a value
    /// that is not a finite number (text, null, NaN). Peers without the parameter
    /// at all are left out of the mean.
    pub async fn peer_average(
        &self,
        symbol: &str,
        grouping: Grouping,
        parameter: &str,
    ) -> Option<f64> {
        let snapshot = match self.cache.snapshot(symbol).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::debug!(%symbol, error = %err, "no snapshot for peer average");
                return None;
            }
        };
        let key = snapshot.text(grouping.field())?;
        let members = self.index.members(grouping, key)?;

        let mut values = Vec::with_capacity(members.len());
        for peer in members {
            let peer_snapshot = match self.cache.snapshot(&peer.symbol).await {
                Ok(peer_snapshot) => peer_snapshot,
                Err(err) => {
                    tracing::debug!(peer = %peer.symbol, error = %err, "peer skipped");
                    continue;
                }
            };
            let Some(value) = peer_snapshot.field(parameter) else {
                continue;
            };
            match value.as_f64().filter(|v| v.is_finite()) {
                Some(v) => values.push(v),
                None => {
                    tracing::debug!(
                        peer = %peer.symbol,
                        %parameter,
                        %value,
                        "non-numeric peer value; average unavailable"
                    );
                    return None;
                }
            }
        }

        mean_rounded(&values)
    }
}

pub fn mean_rounded(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(round2(mean)).filter(|v| v.is_finite())
}

/// Enrichment field name for a peer average, e.g. `industryAverageTrailingPE`.
pub fn average_field_name(grouping: Grouping, parameter: &str) -> String {
    let mut chars = parameter.chars();
    match chars.next() {
        Some(first) => format!(
            "{}{}{}",
            grouping.average_prefix(),
            first.to_uppercase(),
            chars.as_str()
        ),
        None => grouping.average_prefix().to_string(),
    }
}
