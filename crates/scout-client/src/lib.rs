pub mod config;
pub mod enrichment;
pub mod factory;
pub mod http;
pub mod instagram;
pub mod tiktok;
pub mod youtube;

pub use config::ProviderConfig;
pub use enrichment::HttpEnrichmentFetcher;
pub use factory::{HttpAdapterFactory, ProviderAdapter};
pub use http::ProviderClient;
