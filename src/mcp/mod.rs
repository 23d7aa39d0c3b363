//! MCP provider layer: transports, connections and the provider pool.

mod connection;
mod http;
mod pool;
mod shared;
mod spawn;
mod types;

pub use connection::{ConnectionState, ProviderConnection, ProviderTransport};
pub use http::HttpJsonRpcTransport;
pub use pool::{PoolLimits, ProviderPool, QuotaRotationState};
pub use shared::SharedPool;
pub use spawn::ChildProcessTransport;
pub use types::ToolDescriptor;
