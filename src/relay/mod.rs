pub mod poller;
pub mod poster;
pub mod protocol;
pub mod upstream_stream;

pub use poller::get_request;
pub use poster::{post_response, PostError};
pub use protocol::{HeaderPair, RelayedRequest, ResponseChunk};
pub use upstream_stream::stream_to_backend;
