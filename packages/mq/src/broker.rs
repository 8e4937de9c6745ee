//! In-process message broker with at-least-once delivery.
//!
//! Consumption is a pull loop with explicit acknowledgement: a consumer
//! holds at most `prefetch` unacknowledged deliveries, so back-pressure
//! falls out of the semaphore rather than any scheduling logic. A delivery
//! dropped without being settled is requeued, which is what makes delivery
//! at-least-once; rejecting without requeue routes the message to the
//! queue's dead-letter queue.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use common::mq::{Message, MessageEnvelope};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::MqError;

/// Declaration of a single queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub name: String,
    /// Queue that receives messages rejected without requeue.
    pub dead_letter: Option<String>,
}

#[derive(Debug)]
struct Stored {
    envelope: MessageEnvelope,
    delivery_count: u32,
}

struct QueueInner {
    name: String,
    dead_letter: Option<String>,
    messages: Mutex<VecDeque<Stored>>,
    notify: Notify,
}

impl QueueInner {
    fn push_back(&self, stored: Stored) {
        self.messages
            .lock()
            .expect("queue mutex poisoned")
            .push_back(stored);
        self.notify.notify_one();
    }

    fn push_front(&self, stored: Stored) {
        self.messages
            .lock()
            .expect("queue mutex poisoned")
            .push_front(stored);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Stored> {
        let mut messages = self.messages.lock().expect("queue mutex poisoned");
        let stored = messages.pop_front();
        // Notify stores at most one permit, so back-to-back publishes can
        // collapse into a single wakeup when several receivers race between
        // an empty pop and registering as waiters. Re-notify while messages
        // remain so the next receiver is woken too.
        if stored.is_some() && !messages.is_empty() {
            self.notify.notify_one();
        }
        stored
    }

    fn len(&self) -> usize {
        self.messages.lock().expect("queue mutex poisoned").len()
    }
}

/// Handle to the broker; cheap to clone.
#[derive(Clone)]
pub struct Broker {
    queues: Arc<Mutex<HashMap<String, Arc<QueueInner>>>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Declare a queue. Redeclaring an existing queue is a no-op.
    pub fn declare_queue(&self, options: QueueOptions) {
        let mut queues = self.queues.lock().expect("broker mutex poisoned");
        queues.entry(options.name.clone()).or_insert_with(|| {
            Arc::new(QueueInner {
                name: options.name,
                dead_letter: options.dead_letter,
                messages: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            })
        });
    }

    fn queue(&self, name: &str) -> Result<Arc<QueueInner>, MqError> {
        self.queues
            .lock()
            .expect("broker mutex poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| MqError::QueueNotFound(name.to_string()))
    }

    /// Publish a typed message to a queue.
    pub fn publish<M: Message>(&self, queue: &str, message: &M) -> Result<(), MqError> {
        let envelope = MessageEnvelope::from_message(message)?;
        debug!(queue, message_id = %envelope.message_id, "Publishing message");
        self.queue(queue)?.push_back(Stored {
            envelope,
            delivery_count: 0,
        });
        Ok(())
    }

    /// Create a pull consumer holding at most `prefetch` unacknowledged
    /// deliveries at a time.
    pub fn consumer<M: Message>(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<Consumer<M>, MqError> {
        Ok(Consumer {
            broker: self.clone(),
            queue: self.queue(queue)?,
            prefetch: Arc::new(Semaphore::new(prefetch)),
            _marker: PhantomData,
        })
    }

    /// Number of messages currently waiting in a queue (excludes
    /// unacknowledged deliveries).
    pub fn queue_depth(&self, queue: &str) -> Result<usize, MqError> {
        Ok(self.queue(queue)?.len())
    }

    fn dead_letter(&self, from: &Arc<QueueInner>, stored: Stored) {
        match &from.dead_letter {
            Some(dlq_name) => match self.queue(dlq_name) {
                Ok(dlq) => {
                    warn!(
                        queue = %from.name,
                        dead_letter = %dlq_name,
                        message_id = %stored.envelope.message_id,
                        "Dead-lettering message"
                    );
                    dlq.push_back(Stored {
                        envelope: stored.envelope,
                        delivery_count: 0,
                    });
                }
                Err(_) => warn!(
                    queue = %from.name,
                    dead_letter = %dlq_name,
                    message_id = %stored.envelope.message_id,
                    "Dead-letter queue missing, dropping message"
                ),
            },
            None => warn!(
                queue = %from.name,
                message_id = %stored.envelope.message_id,
                "No dead-letter queue configured, dropping rejected message"
            ),
        }
    }
}

/// Pull consumer for one queue.
pub struct Consumer<M: Message> {
    broker: Broker,
    queue: Arc<QueueInner>,
    prefetch: Arc<Semaphore>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message> Consumer<M> {
    /// Await the next delivery. Blocks while the prefetch window is full of
    /// unacknowledged deliveries, and while the queue is empty.
    ///
    /// A message whose payload fails to decode as `M` is dead-lettered and
    /// skipped.
    pub async fn recv(&self) -> Delivery<M> {
        let permit = Arc::clone(&self.prefetch)
            .acquire_owned()
            .await
            .expect("prefetch semaphore closed");
        let mut permit = Some(permit);

        loop {
            match self.queue.pop() {
                Some(stored) => {
                    let delivery_count = stored.delivery_count + 1;
                    match stored.envelope.clone().into_message::<M>() {
                        Ok(payload) => {
                            return Delivery {
                                payload,
                                envelope: stored.envelope,
                                delivery_count,
                                broker: self.broker.clone(),
                                queue: Arc::clone(&self.queue),
                                permit: permit.take(),
                                settled: false,
                            };
                        }
                        Err(e) => {
                            warn!(
                                queue = %self.queue.name,
                                message_id = %stored.envelope.message_id,
                                error = %e,
                                "Undecodable message, dead-lettering"
                            );
                            self.broker.dead_letter(&self.queue, stored);
                        }
                    }
                }
                None => self.queue.notify.notified().await,
            }
        }
    }
}

/// One in-flight message. Must be settled with [`Delivery::ack`] or
/// [`Delivery::reject`]; dropping an unsettled delivery requeues the
/// message for redelivery.
pub struct Delivery<M: Message> {
    pub payload: M,
    envelope: MessageEnvelope,
    delivery_count: u32,
    broker: Broker,
    queue: Arc<QueueInner>,
    permit: Option<OwnedSemaphorePermit>,
    settled: bool,
}

impl<M: Message> Delivery<M> {
    pub fn message_id(&self) -> &str {
        &self.envelope.message_id
    }

    /// True when this message has been delivered before.
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    /// Acknowledge successful processing; the message is gone for good.
    pub fn ack(mut self) {
        self.settled = true;
        self.permit.take();
    }

    /// Reject the message. With `requeue` it goes back to the front of its
    /// queue for redelivery; without, it is routed to the dead-letter queue.
    pub fn reject(mut self, requeue: bool) {
        self.settled = true;
        let stored = Stored {
            envelope: std::mem::replace(
                &mut self.envelope,
                MessageEnvelope {
                    message_type: String::new(),
                    message_id: String::new(),
                    payload: serde_json::Value::Null,
                },
            ),
            delivery_count: self.delivery_count,
        };
        if requeue {
            self.queue.push_front(stored);
        } else {
            self.broker.dead_letter(&self.queue, stored);
        }
        self.permit.take();
    }
}

impl<M: Message> Drop for Delivery<M> {
    fn drop(&mut self) {
        if !self.settled {
            // Consumer crashed between recv and settle: redeliver.
            warn!(
                queue = %self.queue.name,
                message_id = %self.envelope.message_id,
                "Unsettled delivery dropped, requeueing"
            );
            self.queue.push_front(Stored {
                envelope: std::mem::replace(
                    &mut self.envelope,
                    MessageEnvelope {
                        message_type: String::new(),
                        message_id: String::new(),
                        payload: serde_json::Value::Null,
                    },
                ),
                delivery_count: self.delivery_count,
            });
        }
    }
}
