//! Backend wire adapter: the three trading-engine channels (command
//! request/reply, market-data pub/sub, heartbeat) plus the framing,
//! reconnect, and health machinery that keeps them alive.

pub mod adapter;
pub mod channel;
pub mod codec;
pub mod commands;
pub mod frames;
pub mod health;
pub mod heartbeat;
pub mod reconnect;

pub use adapter::{BackendSignal, WireAdapter, WireAdapterHandles};
pub use channel::{ChannelClient, ChannelConfig, ChannelError, ChannelEvent};
pub use codec::{CodecError, JsonCodec};
pub use commands::{BackendCommandService, CommandTransport};
pub use frames::{
    CommandPayload, CommandReplyFrame, CommandRequest, HeartbeatFrame, InterestFrame, PushFrame,
    ReplyPayload,
};
pub use health::{Channel, ConnectionHealth, HealthSnapshot, HealthState};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
