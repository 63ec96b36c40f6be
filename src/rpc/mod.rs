//! Request/response channel to the analysis server
//!
//! [`RequestCorrelator`] matches replies to calls; [`RpcCore`] adds push
//! routing and connection state; [`WebSocketTransport`] and
//! [`HttpTransport`] are the two interchangeable [`RpcTransport`]
//! strategies, picked by [`discovery`].

pub mod correlator;
pub mod discovery;
pub mod http;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use correlator::{EnvelopeSink, PendingCall, RequestCorrelator, DEFAULT_TIMEOUT};
pub use discovery::{TransportChoice, WsPortAnswer};
pub use http::{HttpOptions, HttpTransport};
pub use protocol::{
    AsyncRpcUpdate, AsyncRpcUpdateValue, EvaluatePropertyReq, EvaluatePropertyRes, InitInfo,
    OutboundMessage, ParsingRequestData, PropertyEvaluation, Request, RpcReply, TaskDone,
};
pub use transport::{request, ConnectionState, PushHandler, RpcCore, RpcTransport, TransportKind};
pub use websocket::WebSocketTransport;
