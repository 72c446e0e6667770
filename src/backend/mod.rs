pub mod builder;
pub mod invoker;

pub use builder::build_backend_request;
pub use invoker::{invoke_backend, BackendSource, InvokeResult};
