//! tether-services — chunked calls, method hosting, and the HTTP tunnel.
//! Transport agnostic: anything implementing [`MethodClient`] can carry
//! a chunked call.

pub mod chunk_client;
pub mod chunk_server;
pub mod host;
pub mod http_transport;
pub mod http_tunnel;
pub mod local;
pub mod router;
pub mod transport;

pub use chunk_client::{ChunkCallResult, ChunkClient};
pub use chunk_server::{ChunkServer, ChunkServerSettings, MethodInvoker};
pub use host::{dispatcher, DispatchHandle, DispatchWorker, MethodCall, MethodHost};
pub use http_transport::HttpMethodClient;
pub use http_tunnel::{
    HttpReply, HttpSendError, HttpSender, HttpTunnelClient, HttpTunnelServer, ReqwestSender,
};
pub use local::LoopbackClient;
pub use router::{MethodDiagnostic, MethodError, MethodOutput, MethodRouter, Registration};
pub use transport::{MethodClient, MethodResponse};
