//! Application services: the workers and coordinators that connect the
//! domain model to the backend wire and to client sessions.

pub mod correlator;
pub mod orders;
pub mod pipeline;
pub mod router;

pub use correlator::{CommandCorrelator, CommandHandle, CommandReply};
pub use orders::OrderEngine;
pub use pipeline::{MarketDataPipeline, PipelineSignal};
pub use router::{TopicRouter, UpstreamChange};
