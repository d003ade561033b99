//! Backend Command Service
//!
//! Implements the [`BackendCommands`] port: each call registers a pending
//! entry with the correlator, puts a frame on the command channel, and
//! awaits the matched reply under the configured deadline. The call never
//! blocks anything but its own caller; the wire itself is serviced by the
//! channel tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::adapter::WireAdapter;
use super::frames::CommandRequest;
use crate::application::ports::{BackendCommands, CommandError, CommandResult};
use crate::application::services::correlator::{CommandCorrelator, CommandReply};
use crate::domain::market_data::{Topic, TopicSnapshot};
use crate::domain::order::{OrderCommand, OrderId, OrderStatusReport};
use crate::domain::subscription::SessionId;

/// Hand-off of one encoded command frame to the wire.
///
/// Split out so the service can be exercised without a live socket.
pub trait CommandTransport: Send + Sync {
    /// Put a command frame on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::BackendUnavailable`] or
    /// [`CommandError::SendFailure`]; the command is then not pending.
    fn send(&self, request: &CommandRequest) -> Result<(), CommandError>;
}

impl CommandTransport for WireAdapter {
    fn send(&self, request: &CommandRequest) -> Result<(), CommandError> {
        self.send_command(request)
    }
}

/// Correlated command execution over the command channel.
pub struct BackendCommandService {
    correlator: Arc<CommandCorrelator>,
    transport: Arc<dyn CommandTransport>,
    timeout: Duration,
}

impl BackendCommandService {
    /// Create a service with the given per-command deadline.
    #[must_use]
    pub fn new(
        correlator: Arc<CommandCorrelator>,
        transport: Arc<dyn CommandTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            correlator,
            transport,
            timeout,
        }
    }

    /// Register, send, and await one command.
    async fn execute(&self, request: CommandRequest) -> Result<CommandReply, CommandError> {
        let handle = self.correlator.register(request.correlation_id)?;

        if let Err(error) = self.transport.send(&request) {
            // Nothing went out; retire the pending entry quietly.
            self.correlator.cancel(request.correlation_id);
            drop(handle);
            return Err(error);
        }

        handle.await_reply(self.timeout).await
    }
}

#[async_trait]
impl BackendCommands for BackendCommandService {
    async fn submit_order(&self, command: OrderCommand) -> Result<CommandResult, CommandError> {
        match self.execute(CommandRequest::submit(&command)).await? {
            CommandReply::Result(result) => Ok(result),
            other => Err(unexpected_reply(command.correlation_id, &other)),
        }
    }

    async fn cancel_order(
        &self,
        _session: SessionId,
        order_id: OrderId,
    ) -> Result<CommandResult, CommandError> {
        let correlation_id = Uuid::new_v4();
        match self
            .execute(CommandRequest::cancel(correlation_id, order_id))
            .await?
        {
            CommandReply::Result(result) => Ok(result),
            other => Err(unexpected_reply(correlation_id, &other)),
        }
    }

    async fn request_snapshot(&self, topic: Topic) -> Result<TopicSnapshot, CommandError> {
        let correlation_id = Uuid::new_v4();
        match self
            .execute(CommandRequest::request_snapshot(correlation_id, topic))
            .await?
        {
            CommandReply::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected_reply(correlation_id, &other)),
        }
    }

    async fn query_orders(
        &self,
        order_ids: Vec<OrderId>,
    ) -> Result<Vec<OrderStatusReport>, CommandError> {
        let correlation_id = Uuid::new_v4();
        match self
            .execute(CommandRequest::query_orders(correlation_id, order_ids))
            .await?
        {
            CommandReply::StatusReports(reports) => Ok(reports),
            other => Err(unexpected_reply(correlation_id, &other)),
        }
    }
}

fn unexpected_reply(correlation_id: Uuid, reply: &CommandReply) -> CommandError {
    tracing::warn!(%correlation_id, ?reply, "Reply kind does not match the request");
    CommandError::Backend("reply kind does not match the request".to_string())
}
