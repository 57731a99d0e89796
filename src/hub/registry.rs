//! Session and group bookkeeping owned by the hub event loop.
//!
//! [`Registry`] is plain data: it is only ever touched from the hub task,
//! so it needs no locks. Every routing method uses a non-blocking
//! `try_send` per recipient and sheds recipients whose queue is full or
//! already closed.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use utoipa::ToSchema;

use crate::domain::{GroupId, SessionId};

/// Point-in-time counts of the hub's registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct HubStats {
    /// Registered sessions.
    pub sessions: usize,
    /// Groups with at least one member.
    pub groups: usize,
    /// Total (session, group) memberships.
    pub memberships: usize,
}

/// Outcome of routing one payload.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Delivery {
    /// Recipients whose queue accepted the payload.
    pub delivered: usize,
    /// Recipients removed because their queue was full or closed.
    pub shed: Vec<SessionId>,
}

#[derive(Debug)]
struct SessionEntry {
    queue: mpsc::Sender<Bytes>,
    groups: HashSet<GroupId>,
}

/// Live sessions keyed by id, plus group membership in both directions.
///
/// Empty groups are removed as soon as their last member leaves.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    groups: HashMap<GroupId, HashSet<SessionId>>,
}

impl Registry {
    /// Adds a session. A stale entry under the same id is torn down first.
    pub fn register(&mut self, id: SessionId, queue: mpsc::Sender<Bytes>) {
        self.unregister(id);
        self.sessions.insert(
            id,
            SessionEntry {
                queue,
                groups: HashSet::new(),
            },
        );
    }

    /// Removes a session from the registry and from all of its groups.
    ///
    /// Dropping the entry drops the hub's only sender, which closes the
    /// session's outbound queue. Returns `false` for unknown ids.
    pub fn unregister(&mut self, id: SessionId) -> bool {
        let Some(entry) = self.sessions.remove(&id) else {
            return false;
        };
        for group in &entry.groups {
            self.drop_member(group, id);
        }
        true
    }

    /// Returns `true` if the session is registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Delivers `payload` to every registered session.
    pub fn broadcast(&mut self, payload: &Bytes) -> Delivery {
        let mut delivery = Delivery::default();
        for (id, entry) in &self.sessions {
            offer(&mut delivery, *id, &entry.queue, payload);
        }
        self.shed(&delivery.shed);
        delivery
    }

    /// Delivers `payload` to one session. Returns `None` if it is unknown.
    pub fn direct(&mut self, to: SessionId, payload: &Bytes) -> Option<Delivery> {
        let entry = self.sessions.get(&to)?;
        let mut delivery = Delivery::default();
        offer(&mut delivery, to, &entry.queue, payload);
        self.shed(&delivery.shed);
        Some(delivery)
    }

    /// Delivers `payload` to every member of `group`. Returns `None` if the
    /// group has no members.
    pub fn send_to_group(&mut self, group: &GroupId, payload: &Bytes) -> Option<Delivery> {
        let members = self.groups.get(group)?;
        let mut delivery = Delivery::default();
        for id in members {
            if let Some(entry) = self.sessions.get(id) {
                offer(&mut delivery, *id, &entry.queue, payload);
            }
        }
        self.shed(&delivery.shed);
        Some(delivery)
    }

    /// Adds `id` to `group`, creating the group if needed.
    ///
    /// Returns `false` (and changes nothing) if the session is not
    /// registered, so a late join can never resurrect a removed session.
    pub fn join(&mut self, id: SessionId, group: GroupId) -> bool {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return false;
        };
        entry.groups.insert(group.clone());
        self.groups.entry(group).or_default().insert(id);
        true
    }

    /// Removes `id` from `group` on both sides. Returns `true` if the
    /// session was a member.
    pub fn leave(&mut self, id: SessionId, group: &GroupId) -> bool {
        let was_member = self
            .sessions
            .get_mut(&id)
            .is_some_and(|entry| entry.groups.remove(group));
        self.drop_member(group, id);
        was_member
    }

    /// Returns the groups `id` belongs to, or `None` if it is unknown.
    pub fn groups_of(&self, id: SessionId) -> Option<Vec<GroupId>> {
        let entry = self.sessions.get(&id)?;
        let mut groups: Vec<GroupId> = entry.groups.iter().cloned().collect();
        groups.sort();
        Some(groups)
    }

    /// Returns the members of `group`.
    pub fn members_of(&self, group: &GroupId) -> Vec<SessionId> {
        self.groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current counts.
    pub fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.sessions.len(),
            groups: self.groups.len(),
            memberships: self.groups.values().map(HashSet::len).sum(),
        }
    }

    /// Drops every session, closing all outbound queues. Returns how many
    /// sessions were closed.
    pub fn clear(&mut self) -> usize {
        let closed = self.sessions.len();
        self.sessions.clear();
        self.groups.clear();
        closed
    }

    fn shed(&mut self, ids: &[SessionId]) {
        for id in ids {
            self.unregister(*id);
        }
    }

    fn drop_member(&mut self, group: &GroupId, id: SessionId) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

fn offer(delivery: &mut Delivery, id: SessionId, queue: &mpsc::Sender<Bytes>, payload: &Bytes) {
    match queue.try_send(payload.clone()) {
        Ok(()) => delivery.delivered += 1,
        Err(TrySendError::Full(_) | TrySendError::Closed(_)) => delivery.shed.push(id),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn group(name: &str) -> GroupId {
        let Some(group) = GroupId::new(name) else {
            panic!("valid group name");
        };
        group
    }

    fn session(registry: &mut Registry, capacity: usize) -> (SessionId, mpsc::Receiver<Bytes>) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(capacity);
        registry.register(id, tx);
        (id, rx)
    }

    #[test]
    fn register_and_unregister_keep_counts_consistent() {
        let mut registry = Registry::default();
        let (a, _rx_a) = session(&mut registry, 4);
        let (b, _rx_b) = session(&mut registry, 4);
        assert_eq!(registry.stats().sessions, 2);

        assert!(registry.unregister(a));
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
        assert_eq!(registry.stats().sessions, 1);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let mut registry = Registry::default();
        assert!(!registry.unregister(SessionId::new()));
        assert_eq!(registry.stats(), HubStats::default());
    }

    #[test]
    fn unregister_closes_queue_once() {
        let mut registry = Registry::default();
        let (id, mut rx) = session(&mut registry, 4);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(rx.is_closed());
        assert_eq!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected));
    }

    #[test]
    fn unregister_removes_all_memberships() {
        let mut registry = Registry::default();
        let (id, _rx) = session(&mut registry, 4);
        let (other, _rx_other) = session(&mut registry, 4);
        assert!(registry.join(id, group("a")));
        assert!(registry.join(id, group("b")));
        assert!(registry.join(other, group("b")));

        registry.unregister(id);

        assert_eq!(registry.groups_of(id), None);
        assert!(registry.members_of(&group("a")).is_empty());
        assert_eq!(registry.members_of(&group("b")), vec![other]);
        assert_eq!(registry.stats().groups, 1);
    }

    #[test]
    fn join_then_leave_restores_empty_membership() {
        let mut registry = Registry::default();
        let (id, _rx) = session(&mut registry, 4);
        assert!(registry.join(id, group("kitchen")));
        assert_eq!(registry.members_of(&group("kitchen")), vec![id]);

        assert!(registry.leave(id, &group("kitchen")));
        assert!(registry.members_of(&group("kitchen")).is_empty());
        assert_eq!(registry.groups_of(id), Some(Vec::new()));
        assert_eq!(registry.stats().groups, 0);
    }

    #[test]
    fn leave_without_membership_is_harmless() {
        let mut registry = Registry::default();
        let (id, _rx) = session(&mut registry, 4);
        assert!(!registry.leave(id, &group("nowhere")));
        assert!(!registry.leave(SessionId::new(), &group("nowhere")));
    }

    #[test]
    fn join_for_unknown_session_is_ignored() {
        let mut registry = Registry::default();
        assert!(!registry.join(SessionId::new(), group("ghosts")));
        assert_eq!(registry.stats().groups, 0);
    }

    #[test]
    fn broadcast_reaches_everyone_in_order() {
        let mut registry = Registry::default();
        let mut receivers: Vec<_> = (0..3).map(|_| session(&mut registry, 8).1).collect();

        for text in ["one", "two", "three"] {
            let delivery = registry.broadcast(&Bytes::from_static(text.as_bytes()));
            assert_eq!(delivery.delivered, 3);
            assert!(delivery.shed.is_empty());
        }

        for rx in &mut receivers {
            for text in ["one", "two", "three"] {
                assert_eq!(rx.try_recv().ok(), Some(Bytes::from_static(text.as_bytes())));
            }
        }
    }

    #[test]
    fn full_queue_sheds_only_the_slow_session() {
        let mut registry = Registry::default();
        let (slow, mut slow_rx) = session(&mut registry, 1);
        let (fast, mut fast_rx) = session(&mut registry, 8);
        registry.join(slow, group("g"));

        let first = registry.broadcast(&Bytes::from_static(b"first"));
        assert_eq!(first.delivered, 2);

        let second = registry.broadcast(&Bytes::from_static(b"second"));
        assert_eq!(second.delivered, 1);
        assert_eq!(second.shed, vec![slow]);

        assert!(!registry.contains(slow));
        assert!(registry.contains(fast));
        assert!(registry.members_of(&group("g")).is_empty());

        assert_eq!(slow_rx.try_recv().ok(), Some(Bytes::from_static(b"first")));
        assert_eq!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
        assert_eq!(fast_rx.try_recv().ok(), Some(Bytes::from_static(b"first")));
        assert_eq!(fast_rx.try_recv().ok(), Some(Bytes::from_static(b"second")));
    }

    #[test]
    fn closed_receiver_is_shed() {
        let mut registry = Registry::default();
        let (gone, rx) = session(&mut registry, 4);
        drop(rx);
        let delivery = registry.broadcast(&Bytes::from_static(b"hello"));
        assert_eq!(delivery.shed, vec![gone]);
        assert_eq!(registry.stats().sessions, 0);
    }

    #[test]
    fn direct_to_unknown_changes_nothing() {
        let mut registry = Registry::default();
        let (_id, mut rx) = session(&mut registry, 4);
        let before = registry.stats();
        assert!(
            registry
                .direct(SessionId::new(), &Bytes::from_static(b"x"))
                .is_none()
        );
        assert_eq!(registry.stats(), before);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn direct_reaches_only_target() {
        let mut registry = Registry::default();
        let (target, mut target_rx) = session(&mut registry, 4);
        let (_other, mut other_rx) = session(&mut registry, 4);
        let delivery = registry.direct(target, &Bytes::from_static(b"psst"));
        assert_eq!(delivery.map(|d| d.delivered), Some(1));
        assert_eq!(target_rx.try_recv().ok(), Some(Bytes::from_static(b"psst")));
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn group_send_reaches_members_only() {
        let mut registry = Registry::default();
        let (a, mut rx_a) = session(&mut registry, 4);
        let (b, mut rx_b) = session(&mut registry, 4);
        let (_c, mut rx_c) = session(&mut registry, 4);
        registry.join(a, group("lab"));
        registry.join(b, group("lab"));

        let delivery = registry.send_to_group(&group("lab"), &Bytes::from_static(b"hi lab"));
        assert_eq!(delivery.map(|d| d.delivered), Some(2));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());

        assert!(
            registry
                .send_to_group(&group("empty"), &Bytes::from_static(b"x"))
                .is_none()
        );
    }

    #[test]
    fn clear_closes_everything() {
        let mut registry = Registry::default();
        let (id, rx) = session(&mut registry, 4);
        registry.join(id, group("g"));
        assert_eq!(registry.clear(), 1);
        assert!(rx.is_closed());
        assert_eq!(registry.stats(), HubStats::default());
    }
}
