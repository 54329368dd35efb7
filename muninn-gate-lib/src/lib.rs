#![forbid(unsafe_code)]

pub mod config;
pub mod conv;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod handshake;
pub mod proxy_protocol;
pub mod session;
pub mod telemetry;
pub mod timer;

pub use config::{load_from_path, Config, HeaderVariant, RuntimeConfig, TransportConfig};
pub use conv::{ConvRegistry, User};
pub use engine::plain::PlainFactory;
pub use engine::{DatagramSink, EngineFactory, Listener, SessionEngine};
pub use error::{GateError, Result};
pub use executor::{Executor, ExecutorPool};
pub use gateway::{run, Gateway};
pub use handshake::WaiterTable;
pub use proxy_protocol::{strip, Stripped};
pub use session::Session;
