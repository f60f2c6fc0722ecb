//! In-process wakeups and per-build serialization

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::request::BuildId;
use crate::status::{DeploymentStatus, Phase};

type Key = (BuildId, Phase);

/// Wakes workflows waiting on a `(build, phase)` stream when an event lands.
///
/// Subscribe before reading the log, then wait: a notification sent between
/// the read and the wait is kept by the channel. A stream's channel lives
/// as long as some [`Subscription`] to it does.
#[derive(Default)]
pub struct Waiters {
    channels: Mutex<HashMap<Key, watch::Sender<Option<DeploymentStatus>>>>,
}

impl Waiters {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Key, watch::Sender<Option<DeploymentStatus>>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, build_id: &BuildId, phase: Phase) -> Subscription<'_> {
        let key = (build_id.clone(), phase);
        let receiver = self
            .channels()
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        Subscription {
            waiters: self,
            key,
            receiver,
        }
    }

    pub fn notify(&self, build_id: &BuildId, phase: Phase, status: DeploymentStatus) {
        if let Some(sender) = self.channels().get(&(build_id.clone(), phase)) {
            sender.send_replace(Some(status));
        }
    }

    /// Number of streams with a live channel
    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A waiter's handle on one stream; the last one dropped frees the channel
pub struct Subscription<'a> {
    waiters: &'a Waiters,
    key: Key,
    receiver: watch::Receiver<Option<DeploymentStatus>>,
}

impl Subscription<'_> {
    /// Wait for the next status notified on this stream
    pub async fn changed(&mut self) -> Option<DeploymentStatus> {
        self.receiver.changed().await.ok()?;
        *self.receiver.borrow_and_update()
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        let mut channels = self.waiters.channels();
        // our own receiver is still counted here
        if channels
            .get(&self.key)
            .is_some_and(|sender| sender.receiver_count() <= 1)
        {
            channels.remove(&self.key);
        }
    }
}

/// One async lock per build id so a build's workflow runs once at a time
#[derive(Default)]
pub struct BuildLocks {
    locks: Mutex<HashMap<BuildId, Arc<AsyncMutex<()>>>>,
}

impl BuildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, build_id: &BuildId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // drop locks nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(build_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn lock(&self, build_id: &BuildId) -> OwnedMutexGuard<()> {
        self.handle(build_id).lock_owned().await
    }

    /// Take the lock only if no one else holds it
    pub fn try_lock(&self, build_id: &BuildId) -> Option<OwnedMutexGuard<()>> {
        self.handle(build_id).try_lock_owned().ok()
    }
}
