pub mod config;
pub mod fetcher;
pub mod http_loader;
pub mod resource_loader;
pub mod upload;

pub use config::LoaderConfig;
pub use fetcher::{RequestHandle, ResourceFetcher};
pub use http_loader::HttpLoader;
pub use resource_loader::{MetadataSource, ResourceLoader};
