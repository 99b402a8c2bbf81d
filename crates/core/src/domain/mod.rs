pub mod analysis;
pub mod contract;
pub mod snapshot;
pub mod symbol;
