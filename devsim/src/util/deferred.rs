//! One-shot value fulfilled by a single producer.

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

enum State<T> {
    Pending,
    Fulfilled(T),
    Abandoned,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Creates a linked promise and deferred value.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use devsim::util::deferred;
///
/// let (promise, value) = deferred::<u32>();
/// let reader = value.clone();
///
/// let th = thread::spawn(move || reader.wait());
/// promise.fulfil(42);
///
/// assert_eq!(th.join().unwrap(), Ok(42));
/// assert_eq!(value.try_get(), Some(42));
/// ```
pub fn deferred<T: Clone>() -> (Promise<T>, Deferred<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State::Pending),
        ready: Condvar::new(),
    });

    (
        Promise {
            inner: Some(inner.clone()),
        },
        Deferred { inner },
    )
}

/// The producing side of a [`Deferred`] value.
///
/// Dropping a promise without fulfilling it wakes up the readers with an
/// [`Abandoned`] error.
pub struct Promise<T> {
    inner: Option<Arc<Inner<T>>>,
}

impl<T> Promise<T> {
    /// Fulfils the deferred value and wakes up all readers.
    pub fn fulfil(mut self, value: T) {
        if let Some(inner) = self.inner.take() {
            *inner.state.lock().unwrap() = State::Fulfilled(value);
            inner.ready.notify_all();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.state.lock().unwrap();
            if let State::Pending = *state {
                *state = State::Abandoned;
                inner.ready.notify_all();
            }
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// A value which becomes available once, at some point in the future.
///
/// Readers calling [`wait()`](Deferred::wait) are blocked until the
/// [`Promise`] is fulfilled. A `Deferred` is a handle and can be cloned.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone> Deferred<T> {
    /// Blocks until the value is available and returns a copy of it.
    pub fn wait(&self) -> Result<T, Abandoned> {
        let state = self.inner.state.lock().unwrap();
        let state = self
            .inner
            .ready
            .wait_while(state, |s| matches!(s, State::Pending))
            .unwrap();

        match &*state {
            State::Fulfilled(value) => Ok(value.clone()),
            _ => Err(Abandoned),
        }
    }

    /// Blocks until the value is available or the timeout has elapsed.
    ///
    /// `Ok(None)` is returned on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>, Abandoned> {
        let state = self.inner.state.lock().unwrap();
        let (state, _) = self
            .inner
            .ready
            .wait_timeout_while(state, timeout, |s| matches!(s, State::Pending))
            .unwrap();

        match &*state {
            State::Pending => Ok(None),
            State::Fulfilled(value) => Ok(Some(value.clone())),
            State::Abandoned => Err(Abandoned),
        }
    }

    /// Returns the value if it is available, without blocking.
    pub fn try_get(&self) -> Option<T> {
        match &*self.inner.state.lock().unwrap() {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns `true` once the value is available.
    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.state.lock().unwrap(), State::Fulfilled(_))
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.inner.state.lock().unwrap() {
            State::Pending => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Abandoned => "abandoned",
        };

        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

/// Error returned when the promise of a deferred value was dropped without
/// being fulfilled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Abandoned;

impl fmt::Display for Abandoned {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("the deferred value was abandoned before being fulfilled")
    }
}

impl Error for Abandoned {}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn readers_block_until_fulfilled() {
        let (promise, value) = deferred::<&'static str>();
        assert_eq!(value.try_get(), None);
        assert_eq!(value.wait_timeout(Duration::from_millis(10)), Ok(None));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let value = value.clone();
                thread::spawn(move || value.wait())
            })
            .collect();
        promise.fulfil("clock");

        for reader in readers {
            assert_eq!(reader.join().unwrap(), Ok("clock"));
        }
        assert!(value.is_ready());
    }

    #[test]
    fn dropped_promise_releases_readers() {
        let (promise, value) = deferred::<u8>();
        let reader = {
            let value = value.clone();
            thread::spawn(move || value.wait())
        };
        drop(promise);

        assert_eq!(reader.join().unwrap(), Err(Abandoned));
        assert_eq!(value.wait_timeout(Duration::ZERO), Err(Abandoned));
        assert!(!value.is_ready());
    }
}
