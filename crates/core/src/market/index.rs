use crate::domain::symbol::SymbolDescriptor;
use crate::market::cache::SnapshotCache;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Industry,
    Sector,
}

impl Grouping {
    /// Descriptor field holding the group key.
    pub fn field(self) -> &'static str {
        match self {
            Grouping::Industry => "industry",
            Grouping::Sector => "sector",
        }
    }

    /// Prefix of the enrichment field carrying a peer average.
    pub fn average_prefix(self) -> &'static str {
        match self {
            Grouping::Industry => "industryAverage",
            Grouping::Sector => "sectorAverage",
        }
    }
}

/// Industry and sector membership of the universe. Built once per run.
#[derive(Debug, Clone, Default)]
pub struct IndustryIndex {
    industries: BTreeMap<String, Vec<SymbolDescriptor>>,
    sectors: BTreeMap<String, Vec<SymbolDescriptor>>,
}

impl IndustryIndex {
    /// Buckets every non-index symbol by the `industry` and `sector` of its snapshot.
    ///
    /// Symbols whose snapshot cannot be fetched, or lacks either key, are left out.
    /// Member lists keep universe order.
    pub async fn build(cache: &SnapshotCache, universe: &[SymbolDescriptor]) -> Self {
        let mut out = Self::default();
        let mut skipped: usize = 0;

        for descriptor in universe.iter().filter(|d| !d.is_index) {
            let snapshot = match cache.snapshot(&descriptor.symbol).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        symbol = %descriptor.symbol,
                        error = %err,
                        "snapshot unavailable; not indexed"
                    );
                    continue;
                }
            };

            let (Some(industry), Some(sector)) = (snapshot.industry(), snapshot.sector()) else {
                skipped += 1;
                tracing::debug!(symbol = %descriptor.symbol, "no industry/sector; not indexed");
                continue;
            };

            out.insert(Grouping::Industry, industry, descriptor.clone());
            out.insert(Grouping::Sector, sector, descriptor.clone());
        }

        tracing::info!(
            industries = out.industries.len(),
            sectors = out.sectors.len(),
            skipped,
            "industry/sector index built"
        );
        out
    }

    fn insert(&mut self, grouping: Grouping, key: &str, descriptor: SymbolDescriptor) {
        let map = match grouping {
            Grouping::Industry => &mut self.industries,
            Grouping::Sector => &mut self.sectors,
        };
        map.entry(key.to_string()).or_default().push(descriptor);
    }

    pub fn members(&self, grouping: Grouping, key: &str) -> Option<&[SymbolDescriptor]> {
        let map = match grouping {
            Grouping::Industry => &self.industries,
            Grouping::Sector => &self.sectors,
        };
        map.get(key).map(Vec::as_slice)
    }

    pub fn industries(&self) -> impl Iterator<Item = (&str, &[SymbolDescriptor])> {
        self.industries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Industries with at least `min_members` members.
    pub fn rankable_industries(
        &self,
        min_members: usize,
    ) -> impl Iterator<Item = (&str, &[SymbolDescriptor])> {
        self.industries()
            .filter(move |(_, members)| members.len() >= min_members)
    }
}
