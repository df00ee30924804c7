//! Home-automation hub JSON-RPC client

pub mod session;
pub mod transport;
pub mod types;

pub use session::{HubClient, Session, endpoint_url};
pub use transport::{HttpTransport, RpcTransport};
pub use types::{DeviceDetails, RoomDetails, RpcError, RpcRequest, RpcResponse};
