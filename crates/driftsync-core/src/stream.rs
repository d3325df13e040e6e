// ── Resource change streams ──
//
// Subscription types for consuming per-type resource snapshots from the
// ResourceStore.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Resource;

/// Full set of resources of one type, ordered by id.
pub type ResourceSnapshot = Arc<Vec<Resource>>;

/// A subscription to every resource of one type.
///
/// Snapshots are published whenever the store notifies listeners for the
/// type, so silent saves (bootstrap) show up at the next notification.
pub struct ResourceStream {
    current: ResourceSnapshot,
    receiver: watch::Receiver<ResourceSnapshot>,
}

impl ResourceStream {
    pub(crate) fn new(receiver: watch::Receiver<ResourceSnapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation time or at the last `changed()`.
    pub fn current(&self) -> &ResourceSnapshot {
        &self.current
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> ResourceSnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published snapshot.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<ResourceSnapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    pub fn into_stream(self) -> ResourceWatchStream {
        ResourceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding each published snapshot.
pub struct ResourceWatchStream {
    inner: WatchStream<ResourceSnapshot>,
}

impl Stream for ResourceWatchStream {
    type Item = ResourceSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
