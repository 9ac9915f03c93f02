//! Process-local bus backed by one `mpsc` channel per subscription.

use std::sync::{Mutex, MutexGuard, mpsc::{self, Sender}};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    /// A publisher panicked while fanning out; the subscriber list is gone.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// Fan-out bus for a single process.
///
/// `publish` clones the message into every live channel while holding the
/// subscriber list, so concurrent publishers never interleave within one
/// subscription. Channels whose receiver was dropped are forgotten on the
/// next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Live subscriptions as of the last publish; 0 once poisoned.
    pub fn subscriber_count(&self) -> usize {
        self.senders().map_or(0, |senders| senders.len())
    }

    fn senders(&self) -> Result<MutexGuard<'_, Vec<Sender<M>>>, InMemoryBusError> {
        self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders()?;
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        match self.senders() {
            Ok(mut senders) => senders.push(tx),
            // The receiver sees a closed channel instead of waiting forever.
            Err(_) => drop(tx),
        }
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc::TryRecvError;

    use super::*;

    #[test]
    fn every_subscriber_receives_each_message_in_order() {
        let bus = InMemoryEventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(1u32).unwrap();
        bus.publish(2u32).unwrap();

        assert_eq!(first.drain(), vec![1, 2]);
        assert_eq!(second.drain(), vec![1, 2]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned_on_publish() {
        let bus = InMemoryEventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish("paid").unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), "paid");
    }

    #[test]
    fn messages_published_before_subscribing_are_not_replayed() {
        let bus = InMemoryEventBus::new();
        bus.publish(7u8).unwrap();

        let late = bus.subscribe();
        assert!(late.drain().is_empty());
    }

    #[test]
    fn poisoned_bus_rejects_publish_and_hands_out_closed_subscriptions() {
        let bus = Arc::new(InMemoryEventBus::<u8>::new());
        let poisoner = Arc::clone(&bus);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.senders.lock().unwrap();
            panic!("poison the subscriber list");
        })
        .join();

        assert_eq!(bus.publish(1), Err(InMemoryBusError::Poisoned));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(
            bus.subscribe().try_recv(),
            Err(TryRecvError::Disconnected)
        );
    }
}
