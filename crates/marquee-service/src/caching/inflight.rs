use std::collections::HashMap;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, TryFutureExt};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};

use super::{CacheKey, FetchError};

type Channel<T, E> = Shared<oneshot::Receiver<Result<T, E>>>;
type ChannelMap<T, E> = Arc<Mutex<HashMap<CacheKey, Channel<T, E>>>>;

/// Removes a computation from the map of running computations when dropped.
struct RunningComputation<T, E> {
    current: ChannelMap<T, E>,
    key: CacheKey,
}

impl<T, E> Drop for RunningComputation<T, E> {
    fn drop(&mut self) {
        self.current.lock().remove(&self.key);
    }
}

/// Deduplicates concurrent computations for the same [`CacheKey`].
///
/// At most one computation per key is running at any time. Every caller asking for a key while
/// its computation is running joins it and receives a clone of its result, errors included.
///
/// Entries only live while their computation is running. A completed computation is removed from
/// the map *before* its result is handed out, so callers either join a computation that will still
/// deliver, or start a fresh one. Nothing is remembered once a computation completes.
pub struct InFlightTracker<T, E> {
    /// Used to tag metrics.
    name: &'static str,

    /// Computations that are currently running.
    current: ChannelMap<T, E>,

    /// The runtime that computations are spawned on.
    runtime: tokio::runtime::Handle,
}

impl<T, E> Clone for InFlightTracker<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            current: Arc::clone(&self.current),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for InFlightTracker<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightTracker")
            .field("name", &self.name)
            .field("running", &self.current.lock().len())
            .finish()
    }
}

impl<T, E> InFlightTracker<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<FetchError> + 'static,
{
    pub fn new(name: &'static str, runtime: tokio::runtime::Handle) -> Self {
        Self {
            name,
            current: Default::default(),
            runtime,
        }
    }

    /// The number of computations currently running.
    pub fn in_flight_count(&self) -> usize {
        self.current.lock().len()
    }

    /// Joins the running computation for `key`, or starts the one created by `compute`.
    ///
    /// `compute` is only invoked if nothing is running for `key` yet. It is invoked while the map
    /// of running computations is locked, and should do nothing but create the future.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly spawn the
    /// computation, even if you don’t explicitly `await` its results. Dropping the returned future
    /// only abandons this caller's wait, the computation keeps running for everybody else.
    pub fn acquire_or_join<F>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> BoxFuture<'static, Result<T, E>>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, E>>,
    {
        let name = self.name;
        let (channel, computation) = {
            let mut current = self.current.lock();
            if let Some(channel) = current.get(key) {
                // A concurrent computation was deduplicated.
                metric!(counter("images.inflight.hit") += 1, "kind" => name);
                tracing::trace!("Joining in-flight {name} of `{key}`");
                (channel.clone(), None)
            } else {
                metric!(counter("images.inflight.miss") += 1, "kind" => name);
                let (channel, computation) = self.create_computation(key.clone(), compute());
                let evicted = current.insert(key.clone(), channel.clone());
                debug_assert!(evicted.is_none());
                (channel, Some(computation))
            }
        };

        // Spawning happens outside of the lock, as a runtime that is shutting down drops the
        // computation right away, which in turn removes it from `current`.
        if let Some(computation) = computation {
            self.runtime.spawn(computation);
        }

        let key = key.clone();
        let future = channel.unwrap_or_else(move |_cancelled| {
            tracing::error!("Channel of {name} for `{key}` dropped without a result");
            Err(FetchError::InternalError.into())
        });

        Box::pin(future)
    }

    /// Wraps `computation` so that it delivers its result over a channel.
    ///
    /// The channel has to be registered in `current` before the computation is spawned.
    fn create_computation(
        &self,
        key: CacheKey,
        computation: BoxFuture<'static, Result<T, E>>,
    ) -> (Channel<T, E>, BoxFuture<'static, ()>) {
        let (sender, receiver) = oneshot::channel();

        // Dropped when the computation completes, and also when its task is torn down early.
        let remove_token = RunningComputation {
            current: Arc::clone(&self.current),
            key,
        };

        let computation = async move {
            let result = computation.await;

            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new channel.
            drop(remove_token);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        (receiver.shared(), Box::pin(computation))
    }
}
