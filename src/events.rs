//! Publish/subscribe channel between the detection core and its consumers.
//!
//! Game logic subscribes for blow events, level meters for the continuous
//! level. Publishing never blocks; subscribers whose receiver was dropped
//! are pruned on the next publish.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::classifier::BlowEvent;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorEvent {
    /// Normalized level in [0, 1], once per frame while listening and 0.0 on stop
    Level(f32),

    Blow(BlowEvent),
}

/// Subscription handle for one consumer.
#[derive(Debug)]
pub struct Subscription {
    id: usize,
    receiver: Receiver<DetectorEvent>,
}

impl Subscription {
    pub fn try_recv(&self) -> Result<DetectorEvent, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv(&self) -> Result<DetectorEvent, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Drain everything published so far
    pub fn drain(&self) -> Vec<DetectorEvent> {
        self.receiver.try_iter().collect()
    }

    /// Drain and keep only blow events
    pub fn drain_blows(&self) -> Vec<BlowEvent> {
        self.receiver
            .try_iter()
            .filter_map(|event| match event {
                DetectorEvent::Blow(blow) => Some(blow),
                DetectorEvent::Level(_) => None,
            })
            .collect()
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

#[derive(Default)]
struct Subscribers {
    senders: HashMap<usize, Sender<DetectorEvent>>,
    next_id: usize,
}

/// Cloneable handle; every clone publishes to the same subscriber set.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, event: DetectorEvent) {
        let mut subscribers = self.subscribers();
        subscribers
            .senders
            .retain(|_, sender| sender.send(event).is_ok());
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let mut subscribers = self.subscribers();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.senders.insert(id, sender);

        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, subscription_id: usize) {
        self.subscribers().senders.remove(&subscription_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().senders.len()
    }
}
