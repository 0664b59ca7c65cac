//! Bounded pool of execution units.
//!
//! A pool owns up to `slot_limit` units ("poolers"), each processing one
//! element at a time. Units are spawned lazily and reused once idle.
//! Completion and failure are reported to a listener channel, after which the
//! pool immediately dispatches queued work.
//!
//! The pool knows nothing about tasks: the element type and the unit type
//! are generic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// An execution unit of a [`Pool`].
#[async_trait]
pub trait Pooler<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Process one element. Returns `true` on success.
    async fn process(&self, element: T) -> bool;

    /// Cancel `element` if it is the one being processed. Returns once the
    /// element no longer holds any resource.
    async fn cancel(&self, element: &T) -> bool;

    /// Cancel whatever is being processed and refuse further work.
    async fn stop(&self);
}

/// Lifecycle events of pooled elements.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent<T> {
    Started(T),
    Completed(T),
    Failed(T),
}

/// Pool sizing and queueing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of units
    pub slot_limit: usize,
    /// Accept elements even when no unit is free
    pub can_queue: bool,
}

impl PoolConfig {
    pub fn new(slot_limit: usize, can_queue: bool) -> Self {
        Self {
            slot_limit: slot_limit.max(1),
            can_queue,
        }
    }

    /// A single slot that never queues.
    pub fn exclusive() -> Self {
        Self::new(1, false)
    }
}

type Factory<P> = Arc<dyn Fn() -> Arc<P> + Send + Sync>;

struct Unit<T, P> {
    id: usize,
    pooler: Arc<P>,
    current: Option<T>,
}

struct PoolState<T, P> {
    units: Vec<Unit<T, P>>,
    todo: VecDeque<T>,
    next_unit_id: usize,
    stopped: bool,
}

impl<T, P> PoolState<T, P> {
    fn idle_unit(&self) -> Option<usize> {
        self.units.iter().position(|u| u.current.is_none())
    }

    fn has_free(&self, slot_limit: usize) -> bool {
        self.idle_unit().is_some() || self.units.len() < slot_limit
    }
}

struct Dispatch<T, P> {
    unit_id: usize,
    pooler: Arc<P>,
    element: T,
}

struct PoolInner<T, P, E> {
    config: PoolConfig,
    factory: Factory<P>,
    listener: mpsc::UnboundedSender<E>,
    state: Mutex<PoolState<T, P>>,
}

/// Bounded pool of units of type `P` processing elements of type `T`.
///
/// Events are delivered to the listener as `E`.
pub struct Pool<T, P, E> {
    inner: Arc<PoolInner<T, P, E>>,
}

impl<T, P, E> Clone for Pool<T, P, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, P, E> Pool<T, P, E>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    P: Pooler<T>,
    E: From<PoolEvent<T>> + Send + 'static,
{
    pub fn new<F>(config: PoolConfig, factory: F, listener: mpsc::UnboundedSender<E>) -> Self
    where
        F: Fn() -> Arc<P> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory: Arc::new(factory),
                listener,
                state: Mutex::new(PoolState {
                    units: Vec::new(),
                    todo: VecDeque::new(),
                    next_unit_id: 0,
                    stopped: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }

    /// Offer an element to the pool.
    ///
    /// Accepted if the pool queues, or if nothing is waiting and a unit is
    /// free. Accepted elements are dispatched right away when possible.
    pub fn handle(&self, element: T) -> bool {
        let dispatches = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return false;
            }
            let accept = self.inner.config.can_queue
                || (state.todo.is_empty() && state.has_free(self.inner.config.slot_limit));
            if !accept {
                return false;
            }
            state.todo.push_back(element);
            self.dispatch(&mut state)
        };
        self.launch(dispatches);
        true
    }

    /// Run a dispatch pass.
    pub fn refresh(&self) {
        let dispatches = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            self.dispatch(&mut state)
        };
        self.launch(dispatches);
    }

    /// Cancel an element.
    ///
    /// A queued element is dropped and reported as failed. An element in
    /// flight is cancelled through its unit, which reports it as failed when
    /// it returns. Returns `false` if the pool does not know the element.
    pub async fn cancel(&self, element: &T) -> bool {
        let pooler = {
            let mut state = self.inner.state.lock();
            if let Some(pos) = state.todo.iter().position(|e| e == element) {
                if let Some(dropped) = state.todo.remove(pos) {
                    let _ = self.inner.listener.send(E::from(PoolEvent::Failed(dropped)));
                }
                return true;
            }
            state
                .units
                .iter()
                .find(|u| u.current.as_ref() == Some(element))
                .map(|u| Arc::clone(&u.pooler))
        };

        match pooler {
            Some(pooler) => {
                pooler.cancel(element).await;
                true
            }
            None => false,
        }
    }

    /// Stop every unit and discard queued work without starting it.
    pub async fn stop(&self) {
        let poolers: Vec<Arc<P>> = {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            let discarded = state.todo.len();
            state.todo.clear();
            if discarded > 0 {
                debug!(discarded, "Discarded queued pool work");
            }
            state.units.iter().map(|u| Arc::clone(&u.pooler)).collect()
        };
        for pooler in poolers {
            pooler.stop().await;
        }
    }

    /// Units currently processing an element.
    pub fn active_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.units.iter().filter(|u| u.current.is_some()).count()
    }

    /// Units spawned so far.
    pub fn unit_count(&self) -> usize {
        self.inner.state.lock().units.len()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().todo.len()
    }

    /// Whether an element offered now would start immediately.
    pub fn has_free(&self) -> bool {
        let state = self.inner.state.lock();
        !state.stopped && state.has_free(self.inner.config.slot_limit)
    }

    /// Elements currently being processed.
    pub fn in_flight(&self) -> Vec<T> {
        let state = self.inner.state.lock();
        state.units.iter().filter_map(|u| u.current.clone()).collect()
    }

    /// Bind queued elements to units. Caller holds the state lock.
    fn dispatch(&self, state: &mut PoolState<T, P>) -> Vec<Dispatch<T, P>> {
        let mut dispatches = Vec::new();
        while !state.todo.is_empty() {
            let index = match state.idle_unit() {
                Some(index) => index,
                None if state.units.len() < self.inner.config.slot_limit => {
                    let id = state.next_unit_id;
                    state.next_unit_id += 1;
                    state.units.push(Unit {
                        id,
                        pooler: (self.inner.factory)(),
                        current: None,
                    });
                    debug!(unit = id, "Spawned pool unit");
                    state.units.len() - 1
                }
                None => break,
            };
            let Some(element) = state.todo.pop_front() else {
                break;
            };
            let unit = &mut state.units[index];
            unit.current = Some(element.clone());
            dispatches.push(Dispatch {
                unit_id: unit.id,
                pooler: Arc::clone(&unit.pooler),
                element,
            });
        }
        dispatches
    }

    fn launch(&self, dispatches: Vec<Dispatch<T, P>>) {
        for dispatch in dispatches {
            let pool = self.clone();
            tokio::spawn(async move {
                let Dispatch {
                    unit_id,
                    pooler,
                    element,
                } = dispatch;
                let _ = pool
                    .inner
                    .listener
                    .send(E::from(PoolEvent::Started(element.clone())));
                let success = pooler.process(element.clone()).await;
                pool.finish(unit_id, element, success);
            });
        }
    }

    fn finish(&self, unit_id: usize, element: T, success: bool) {
        let dispatches = {
            let mut state = self.inner.state.lock();
            if let Some(unit) = state.units.iter_mut().find(|u| u.id == unit_id) {
                unit.current = None;
            }
            let event = if success {
                PoolEvent::Completed(element)
            } else {
                PoolEvent::Failed(element)
            };
            let _ = self.inner.listener.send(E::from(event));
            if state.stopped {
                Vec::new()
            } else {
                self.dispatch(&mut state)
            }
        };
        self.launch(dispatches);
    }
}
