pub mod logfilter;
pub mod protocol;
pub mod security;

pub use logfilter::{ChunkPlan, LogMode};
pub use protocol::{
    CommandComplete, CommandKind, CommandOutput, ExecuteCommandRequest, InboundCommand, LogChunk,
    LogComplete, MessageKind, MessageSink, OutboundMessage, ReadLogRequest, RegisterInfo,
    SinkError,
};
pub use security::CommandPolicy;
