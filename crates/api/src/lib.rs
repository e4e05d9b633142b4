//! HTTP API: the authorization interceptor, RPC handlers, and the unary JSON
//! binding that serves them.

pub mod app;
pub mod audit;
pub mod call;
pub mod handlers;
pub mod interceptor;
pub mod status;

pub use call::{CallContext, CallResult, Handler};
pub use interceptor::AuthInterceptor;
pub use status::{Code, Status};
