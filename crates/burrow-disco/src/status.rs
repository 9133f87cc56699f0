//! Observable status snapshots.
//!
//! [`StatusCell`] holds the latest snapshot of a path, peer or engine status.
//! Readers either poll it with [`StatusCell::get`] or register a callback with
//! [`StatusCell::notify`], which sees the current value at once and then every
//! structural change until the owner closes the cell.

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Broadcast cell for status snapshots.
pub struct StatusCell<T> {
    tx: Mutex<Option<watch::Sender<T>>>,
    rx: watch::Receiver<T>,
}

impl<T> StatusCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cell holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (tx, rx) = watch::channel(initial);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Replace the snapshot. Subscribers are woken only if it changed.
    ///
    /// Returns whether the value changed. A closed cell ignores writes.
    pub fn set(&self, value: T) -> bool {
        self.update(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }

    /// Mutate the snapshot in place. `f` returns whether it changed anything.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send_if_modified(f),
            None => false,
        }
    }

    /// Stop publishing. Running subscriptions end. Idempotent.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Whether [`StatusCell::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Raw receiver for callers that want to drive their own loop.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.rx.clone()
    }

    /// Call `f` with the current snapshot, then again after every change,
    /// until the cell closes.
    ///
    /// Rapid updates may coalesce, but `f` never sees the same value twice in
    /// a row. Must be called inside a tokio runtime.
    pub fn notify<F>(&self, mut f: F) -> JoinHandle<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut rx = self.rx.clone();
        let closed = self.is_closed();

        tokio::spawn(async move {
            let mut last = rx.borrow_and_update().clone();
            f(last.clone());
            if closed {
                return;
            }

            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().clone();
                if current != last {
                    last = current.clone();
                    f(current);
                }
            }
        })
    }
}

impl<T> std::fmt::Debug for StatusCell<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCell")
            .field("value", &*self.rx.borrow())
            .field("closed", &self.tx.lock().is_none())
            .finish()
    }
}
