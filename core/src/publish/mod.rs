pub mod registry;
pub mod sink;

pub use registry::{Registration, SinkHandle, SinkId, SinkKind, SinkRegistry};
pub use sink::{ChannelObserver, PublishSink, PublishedResult, ResultObserver, SinkDescriptor};
