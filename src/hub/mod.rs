//! Connection hub: the single owner of session and group state.
//!
//! [`Hub`] is a cheap, cloneable handle. Every operation is a
//! [`HubCommand`] sent over one bounded `mpsc` channel into [`HubLoop`],
//! which owns the [`registry::Registry`] and processes commands strictly in
//! arrival order. No other task ever touches the maps, so no locks are
//! needed, and per-session delivery order equals hub processing order.
//!
//! The loop never waits on a recipient: delivery is a non-blocking enqueue
//! and a session whose queue is full is shed (unregistered, queue closed).

pub mod registry;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use crate::domain::{GroupId, SessionId};
use crate::error::HubError;
use registry::{Delivery, Registry};

pub use registry::HubStats;

/// A request processed by the hub event loop.
#[derive(Debug)]
pub enum HubCommand {
    /// Add a session and its outbound queue.
    Register {
        /// Session identity.
        id: SessionId,
        /// Sending half of the session's outbound queue.
        queue: mpsc::Sender<Bytes>,
    },
    /// Remove a session, its memberships and close its queue.
    Unregister(SessionId),
    /// Deliver to every registered session.
    Broadcast(Bytes),
    /// Deliver to one session.
    Direct {
        /// Recipient.
        to: SessionId,
        /// Frame to deliver.
        payload: Bytes,
    },
    /// Deliver to every member of a group.
    Group {
        /// Target group.
        group: GroupId,
        /// Frame to deliver.
        payload: Bytes,
    },
    /// Add a session to a group.
    Join {
        /// Joining session.
        id: SessionId,
        /// Group to join.
        group: GroupId,
    },
    /// Remove a session from a group.
    Leave {
        /// Leaving session.
        id: SessionId,
        /// Group to leave.
        group: GroupId,
    },
    /// Report registry counts.
    Stats(oneshot::Sender<HubStats>),
    /// Report the groups a session belongs to.
    SessionGroups {
        /// Session to inspect.
        id: SessionId,
        /// Reply channel; `None` for unknown sessions.
        reply: oneshot::Sender<Option<Vec<GroupId>>>,
    },
    /// Report the members of a group.
    GroupMembers {
        /// Group to inspect.
        group: GroupId,
        /// Reply channel.
        reply: oneshot::Sender<Vec<SessionId>>,
    },
}

/// Cloneable handle for submitting work to the hub.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Creates a hub handle and the loop that serves it.
    ///
    /// `capacity` bounds the command channel. `span` is the logging
    /// context the loop runs in.
    #[must_use]
    pub fn new(capacity: usize, span: Span) -> (Self, HubLoop) {
        let (commands, receiver) = mpsc::channel(capacity.max(1));
        let hub_loop = HubLoop {
            commands: receiver,
            registry: Registry::default(),
            span,
        };
        (Self { commands }, hub_loop)
    }

    /// Registers a session with its outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn register(&self, id: SessionId, queue: mpsc::Sender<Bytes>) -> Result<(), HubError> {
        self.send(HubCommand::Register { id, queue }).await
    }

    /// Unregisters a session. Unknown ids are ignored by the loop.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(id)).await
    }

    /// Broadcasts a payload to every registered session, waiting for room
    /// in the command channel.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn broadcast(&self, payload: Bytes) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast(payload)).await
    }

    /// Broadcasts without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Saturated`] if the command channel is full and
    /// [`HubError::Closed`] if the hub loop has stopped.
    pub fn try_broadcast(&self, payload: Bytes) -> Result<(), HubError> {
        self.commands
            .try_send(HubCommand::Broadcast(payload))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => HubError::Saturated,
                mpsc::error::TrySendError::Closed(_) => HubError::Closed,
            })
    }

    /// Sends a payload to one session; silently discarded if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn direct(&self, to: SessionId, payload: Bytes) -> Result<(), HubError> {
        self.send(HubCommand::Direct { to, payload }).await
    }

    /// Sends a payload to every member of a group.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn send_to_group(&self, group: GroupId, payload: Bytes) -> Result<(), HubError> {
        self.send(HubCommand::Group { group, payload }).await
    }

    /// Adds a session to a group, creating the group on first join.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn join_group(&self, id: SessionId, group: GroupId) -> Result<(), HubError> {
        self.send(HubCommand::Join { id, group }).await
    }

    /// Removes a session from a group.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn leave_group(&self, id: SessionId, group: GroupId) -> Result<(), HubError> {
        self.send(HubCommand::Leave { id, group }).await
    }

    /// Returns registry counts as seen by the loop after all previously
    /// submitted commands.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Returns the groups a session belongs to, or `None` if it is not
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn session_groups(&self, id: SessionId) -> Result<Option<Vec<GroupId>>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::SessionGroups { id, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Returns the current members of a group.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn group_members(&self, group: GroupId) -> Result<Vec<SessionId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::GroupMembers { group, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}

/// The hub's serialized control loop.
#[derive(Debug)]
pub struct HubLoop {
    commands: mpsc::Receiver<HubCommand>,
    registry: Registry,
    span: Span,
}

impl HubLoop {
    /// Processes commands until `shutdown` fires or every [`Hub`] handle
    /// is dropped. All remaining session queues are closed on exit.
    pub async fn run(self, shutdown: CancellationToken) {
        let span = self.span.clone();
        self.serve(shutdown).instrument(span).await;
    }

    async fn serve(mut self, shutdown: CancellationToken) {
        info!("hub started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        let closed = self.registry.clear();
        info!(closed, "hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { id, queue } => {
                if self.registry.contains(id) {
                    warn!(session = %id, "duplicate session id, replacing previous session");
                }
                self.registry.register(id, queue);
                debug!(session = %id, sessions = self.registry.stats().sessions, "session registered");
            }
            HubCommand::Unregister(id) => {
                if self.registry.unregister(id) {
                    debug!(session = %id, "session unregistered");
                }
            }
            HubCommand::Broadcast(payload) => {
                let delivery = self.registry.broadcast(&payload);
                log_delivery("broadcast", &delivery);
            }
            HubCommand::Direct { to, payload } => match self.registry.direct(to, &payload) {
                Some(delivery) => log_delivery("direct", &delivery),
                None => debug!(to = %to, "direct message to unknown session discarded"),
            },
            HubCommand::Group { group, payload } => {
                match self.registry.send_to_group(&group, &payload) {
                    Some(delivery) => log_delivery("group", &delivery),
                    None => debug!(%group, "group message to empty group discarded"),
                }
            }
            HubCommand::Join { id, group } => {
                if self.registry.join(id, group.clone()) {
                    info!(session = %id, %group, "session joined group");
                } else {
                    debug!(session = %id, %group, "join from unregistered session ignored");
                }
            }
            HubCommand::Leave { id, group } => {
                if self.registry.leave(id, &group) {
                    info!(session = %id, %group, "session left group");
                }
            }
            HubCommand::Stats(reply) => {
                let _ = reply.send(self.registry.stats());
            }
            HubCommand::SessionGroups { id, reply } => {
                let _ = reply.send(self.registry.groups_of(id));
            }
            HubCommand::GroupMembers { group, reply } => {
                let _ = reply.send(self.registry.members_of(&group));
            }
        }
    }
}

fn log_delivery(route: &'static str, delivery: &Delivery) {
    for id in &delivery.shed {
        warn!(session = %id, route, "outbound queue full or closed, shedding session");
    }
    debug!(route, delivered = delivery.delivered, shed = delivery.shed.len(), "message routed");
}
