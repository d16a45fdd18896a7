//! Best-effort fan-out of auction room events.
//!
//! Every auction gets its own broadcast channel, created lazily on the
//! first subscription. Publishing never blocks and never fails the calling
//! operation: without subscribers the event is simply dropped, and a
//! receiver that falls behind the channel capacity loses the oldest events
//! instead of stalling the sender. There is no replay; late joiners fetch a
//! snapshot through the regular API.

use {
    dashmap::DashMap,
    model::{
        auction::{AuctionId, UserId},
        event::{PresenceEvent, RoomEvent},
    },
    tokio::sync::broadcast,
};

pub struct Broadcaster {
    channels: DashMap<AuctionId, broadcast::Sender<RoomEvent>>,
    rosters: DashMap<AuctionId, Vec<UserId>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Default::default(),
            rosters: Default::default(),
            capacity,
        }
    }

    /// Subscribes to an auction's room. Events published after this call
    /// are delivered in publish order.
    pub fn subscribe(&self, id: AuctionId) -> broadcast::Receiver<RoomEvent> {
        self.channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Fans an event out to all current subscribers of the auction's room.
    pub fn publish(&self, id: &AuctionId, event: impl Into<RoomEvent>) {
        let Some(sender) = self.channels.get(id) else {
            return;
        };
        if sender.send(event.into()).is_err() {
            tracing::trace!(auction = %id, "event dropped, no subscribers");
        }
    }

    /// Records a viewer in the room and announces them, followed by a
    /// roster snapshot.
    pub fn join_room(&self, id: AuctionId, user: UserId) {
        let users = {
            let mut roster = self.rosters.entry(id).or_default();
            if !roster.contains(&user) {
                roster.push(user);
            }
            roster.clone()
        };
        self.publish(&id, PresenceEvent::user_joined(user));
        self.publish(&id, PresenceEvent::RoomUsers { users });
    }

    pub fn leave_room(&self, id: &AuctionId, user: &UserId) {
        if let Some(mut roster) = self.rosters.get_mut(id) {
            roster.retain(|present| present != user);
        }
        self.publish(id, PresenceEvent::user_left(*user));
    }

    /// Tears down the room state of a finalized auction. Existing receivers
    /// drain whatever was already published and then observe channel close.
    pub fn drop_room(&self, id: &AuctionId) {
        self.channels.remove(id);
        self.rosters.remove(id);
    }
}
