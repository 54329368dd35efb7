mod loader;
mod root;
mod runtime;
mod telemetry;
mod transport;

pub use loader::load_from_path;
pub use root::Config;
pub use runtime::RuntimeConfig;
pub use telemetry::LoggingConfig;
pub use transport::{FecConfig, HeaderVariant, TransportConfig};
