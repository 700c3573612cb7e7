/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Fan-out of stream events to subscribers.
//!
//! Each subscriber owns a bounded queue.  Dispatching never blocks: when a
//! queue is full its oldest event is discarded, counted, and logged.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use tracing::{debug, warn};

use crate::message::StreamEvent;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Packet,
    Digest,
    IdleTimeout,
    StreamError,
    Unknown,
}

impl StreamEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            StreamEvent::Packet(_) => EventCategory::Packet,
            StreamEvent::Digest(_) => EventCategory::Digest,
            StreamEvent::IdleTimeout(_) => EventCategory::IdleTimeout,
            StreamEvent::Error(_) => EventCategory::StreamError,
            StreamEvent::Unknown { .. } => EventCategory::Unknown,
        }
    }
}

#[derive(Default)]
struct Queue {
    events: VecDeque<StreamEvent>,
    closed: bool,
}

struct EventQueue {
    name: String,
    capacity: usize,
    queue: Mutex<Queue>,
    notify: Notify,
    dropped: AtomicU64,
    receiver_alive: AtomicBool,
}

impl EventQueue {
    fn new(name: String, capacity: usize) -> Arc<Self> {
        Arc::new(EventQueue {
            name,
            capacity: capacity.max(1),
            queue: Mutex::new(Queue::default()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            receiver_alive: AtomicBool::new(true),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_alive(&self) -> bool {
        self.receiver_alive.load(Ordering::Acquire)
    }

    fn push(&self, event: StreamEvent) {
        let mut queue = self.lock();
        if queue.closed {
            return;
        }
        if queue.events.len() >= self.capacity {
            queue.events.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                subscriber = %self.name,
                capacity = self.capacity,
                dropped,
                "event queue full, dropped oldest event"
            );
        }
        queue.events.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

/// The receiving end of a subscription.
///
/// Once the subscription ends (the session closed or the category was
/// subscribed again) `recv` returns the events still buffered and then
/// `None`.
pub struct EventReceiver {
    queue: Arc<EventQueue>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(event) = queue.events.pop_front() {
                    return Some(event);
                }
                if queue.closed {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.queue.lock().events.pop_front()
    }

    /// Number of events discarded because this queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.queue.receiver_alive.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Sinks {
    by_category: HashMap<EventCategory, Arc<EventQueue>>,
    combined: Option<Arc<EventQueue>>,
    closed: bool,
}

/// Routes each event to the subscriber for its category, or failing that
/// to the subscriber for all events, or failing that logs and drops it.
pub struct Dispatcher {
    capacity: usize,
    sinks: Mutex<Sinks>,
    unrouted: AtomicU64,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Dispatcher {
            capacity,
            sinks: Mutex::new(Sinks::default()),
            unrouted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sinks> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn install(
        &self,
        name: String,
        attach: impl FnOnce(&mut Sinks, Arc<EventQueue>) -> Option<Arc<EventQueue>>,
    ) -> EventReceiver {
        let queue = EventQueue::new(name, self.capacity);
        let mut sinks = self.lock();
        if sinks.closed {
            queue.close();
        } else if let Some(old) = attach(&mut sinks, queue.clone()) {
            old.close();
        }
        EventReceiver { queue }
    }

    /// Subscribes to one category of events, ending any earlier
    /// subscription to it.
    pub fn subscribe(&self, category: EventCategory) -> EventReceiver {
        self.install(format!("{:?}", category), |sinks, queue| {
            sinks.by_category.insert(category, queue)
        })
    }

    /// Subscribes to every event that has no subscriber for its category,
    /// ending any earlier such subscription.
    pub fn subscribe_all(&self) -> EventReceiver {
        self.install("all".into(), |sinks, queue| sinks.combined.replace(queue))
    }

    pub fn dispatch(&self, event: StreamEvent) {
        let category = event.category();
        let sinks = self.lock();
        if sinks.closed {
            return;
        }
        let sink = sinks
            .by_category
            .get(&category)
            .filter(|q| q.is_alive())
            .or_else(|| sinks.combined.as_ref().filter(|q| q.is_alive()));
        let queue = match sink {
            Some(queue) => queue,
            None => {
                let unrouted = self.unrouted.fetch_add(1, Ordering::Relaxed) + 1;
                match event {
                    StreamEvent::Unknown { type_url, .. } => warn!(
                        %type_url,
                        unrouted,
                        "no subscriber for unrecognized stream message, dropping it"
                    ),
                    _ => debug!(?category, unrouted, "no subscriber for stream event, dropping it"),
                }
                return;
            }
        };
        queue.push(event);
    }

    /// Events dropped because nothing was subscribed to them.
    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    /// Ends every subscription.  Later subscriptions start out closed.
    pub fn close(&self) {
        let mut sinks = self.lock();
        sinks.closed = true;
        for queue in sinks.by_category.values().chain(sinks.combined.iter()) {
            queue.close();
        }
    }
}
