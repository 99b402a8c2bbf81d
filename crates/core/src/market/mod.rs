pub mod cache;
pub mod index;
pub mod peer;
pub mod provider;
