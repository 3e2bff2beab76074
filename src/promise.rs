//! The settle/observe protocol for a single deferred value.
//!
//! A [`Promise`] starts out pending and settles exactly once, either
//! fulfilled with a value or rejected with a reason. Settlement comes in
//! through a [`Producer`] handle, observers come in through
//! [`Promise::then`] and friends, and async code can wait on a
//! [`Waiter`].

use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::SettleError;

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }
}

/// One registration made while the promise was still pending. Fulfillment
/// runs `on_fulfilled`, rejection runs `on_rejected`; exactly one of the
/// two ever runs.
struct Reaction<T, E> {
    on_fulfilled: Box<dyn FnOnce(T) + Send>,
    on_rejected: Box<dyn FnOnce(E) + Send>,
}

struct Inner<T, E> {
    state: State<T, E>,
    reactions: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
    /// Set when the promise is rejected with no observer attached, cleared
    /// as soon as one shows up. Holds the reason preformatted so the drop
    /// report needs no bounds on `E`.
    unhandled: Option<String>,
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        if let Some(reason) = self.unhandled.take() {
            tracing::warn!(reason = %reason, "promise rejected with no observer attached");
        }
    }
}

/// A single-shot deferred value.
///
/// Clones share the same underlying state. Settled payloads are handed to
/// observers by cloning and must be treated as immutable.
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

/// The settle half of a promise. Cloneable; `resolve` and `reject` consume
/// the handle, and whichever settlement lands first stands.
pub struct Producer<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

/// A cloneable `Future` view of a promise, ready once it settles.
pub struct Waiter<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Clone for Producer<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Clone for Waiter<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Debug, E: Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.lock().unwrap().state {
            State::Pending => f.write_str("Promise(Pending)"),
            State::Fulfilled(value) => write!(f, "Promise(Fulfilled({value:?}))"),
            State::Rejected(reason) => write!(f, "Promise(Rejected({reason:?}))"),
        }
    }
}

fn settle_fulfilled<T, E>(inner: &Mutex<Inner<T, E>>, value: T) -> Result<(), SettleError>
where
    T: Clone,
{
    let reactions = {
        let mut guard = inner.lock().unwrap();
        if !guard.state.is_pending() {
            return Err(SettleError::AlreadySettled);
        }
        guard.state = State::Fulfilled(value.clone());
        for waker in guard.wakers.drain(..) {
            waker.wake();
        }
        std::mem::take(&mut guard.reactions)
    };
    // The queue was taken under the lock; the saved continuations run
    // outside it, in registration order, so they may probe or chain on
    // this promise. A nested settle attempt hits the guard above.
    for reaction in reactions {
        (reaction.on_fulfilled)(value.clone());
    }
    Ok(())
}

fn settle_rejected<T, E>(inner: &Mutex<Inner<T, E>>, reason: E) -> Result<(), SettleError>
where
    E: Clone + Debug,
{
    let reactions = {
        let mut guard = inner.lock().unwrap();
        if !guard.state.is_pending() {
            return Err(SettleError::AlreadySettled);
        }
        guard.state = State::Rejected(reason.clone());
        if guard.reactions.is_empty() && guard.wakers.is_empty() {
            // Nobody is watching yet. The notification is deferred to the
            // drop of the shared state, so a handler attached to the
            // already-rejected promise still suppresses it and recovers.
            guard.unhandled = Some(format!("{reason:?}"));
        }
        for waker in guard.wakers.drain(..) {
            waker.wake();
        }
        std::mem::take(&mut guard.reactions)
    };
    for reaction in reactions {
        (reaction.on_rejected)(reason.clone());
    }
    Ok(())
}

impl<T, E> Producer<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    /// Fulfills the promise, waking waiters and running queued
    /// continuations in registration order.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_source::Promise;
    ///
    /// let (promise, producer) = Promise::<String, String>::pending();
    /// assert!(producer.resolve("done".into()).is_ok());
    /// assert_eq!(promise.value(), Some("done".to_string()));
    /// ```
    pub fn resolve(self, value: T) -> Result<(), SettleError> {
        settle_fulfilled(&self.inner, value)
    }

    /// Rejects the promise. Reports `AlreadySettled` if another handle got
    /// there first; the existing settlement is never regressed.
    pub fn reject(self, reason: E) -> Result<(), SettleError> {
        settle_rejected(&self.inner, reason)
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    /// Creates a pending promise together with its settle handle.
    pub fn pending() -> (Self, Producer<T, E>) {
        let inner = Arc::new(Mutex::new(Inner {
            state: State::Pending,
            reactions: Vec::new(),
            wakers: Vec::new(),
            unhandled: None,
        }));
        (
            Self {
                inner: inner.clone(),
            },
            Producer { inner },
        )
    }

    /// Creates a promise and runs `producer` synchronously with its settle
    /// handle, before returning. A `producer` that returns `Err` without
    /// having settled rejects the promise with that reason.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_source::Promise;
    ///
    /// let promise = Promise::<i32, String>::new(|producer| {
    ///     let _ = producer.resolve(5);
    ///     Ok(())
    /// });
    /// assert_eq!(promise.value(), Some(5));
    /// ```
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Producer<T, E>) -> Result<(), E>,
    {
        let (promise, handle) = Self::pending();
        let fallback = handle.clone();
        if let Err(reason) = producer(handle) {
            // No-op when the producer settled before failing.
            let _ = fallback.reject(reason);
        }
        promise
    }

    /// An already-fulfilled promise.
    pub fn resolved(value: T) -> Self {
        let (promise, producer) = Self::pending();
        let _ = producer.resolve(value);
        promise
    }

    /// An already-rejected promise. The rejection is reported as unhandled
    /// if the promise is dropped before an observer attaches.
    pub fn rejected(reason: E) -> Self {
        let (promise, producer) = Self::pending();
        let _ = producer.reject(reason);
        promise
    }

    fn register(&self, reaction: Reaction<T, E>) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let settled = match &inner.state {
            State::Pending => {
                inner.reactions.push(reaction);
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(reason) => Err(reason.clone()),
        };
        if settled.is_err() {
            // The rejection now has an observer.
            inner.unhandled = None;
        }
        drop(guard);
        // Already settled: the matching half runs immediately, outside the
        // lock.
        match settled {
            Ok(value) => (reaction.on_fulfilled)(value),
            Err(reason) => (reaction.on_rejected)(reason),
        }
    }

    /// Derives a new promise from this one. `on_fulfilled` maps the value
    /// through; its `Err` rejects the derived promise. A rejection of this
    /// promise propagates to the derived one untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_source::Promise;
    ///
    /// let six = Promise::<i32, String>::resolved(5).then(|n| Ok(n + 1));
    /// assert_eq!(six.value(), Some(6));
    /// ```
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let (child, fulfill) = Promise::<U, E>::pending();
        let propagate = fulfill.clone();
        self.register(Reaction {
            on_fulfilled: Box::new(move |value| {
                let _ = match on_fulfilled(value) {
                    Ok(out) => fulfill.resolve(out),
                    Err(reason) => fulfill.reject(reason),
                };
            }),
            on_rejected: Box::new(move |reason| {
                let _ = propagate.reject(reason);
            }),
        });
        child
    }

    /// [`then`](Promise::then) with a rejection handler: a rejection of
    /// this promise runs `on_rejected`, and its `Ok` value fulfills the
    /// derived promise (recovery), while its `Err` rejects it.
    pub fn then_or_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
        R: FnOnce(E) -> Result<U, E> + Send + 'static,
    {
        let (child, fulfill) = Promise::<U, E>::pending();
        let recover = fulfill.clone();
        self.register(Reaction {
            on_fulfilled: Box::new(move |value| {
                let _ = match on_fulfilled(value) {
                    Ok(out) => fulfill.resolve(out),
                    Err(reason) => fulfill.reject(reason),
                };
            }),
            on_rejected: Box::new(move |reason| {
                let _ = match on_rejected(reason) {
                    Ok(out) => recover.resolve(out),
                    Err(reason) => recover.reject(reason),
                };
            }),
        });
        child
    }

    /// Handles only the rejection path; fulfillment passes through
    /// untouched. Returns a new derived promise.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_source::Promise;
    ///
    /// let recovered = Promise::<&str, &str>::rejected("boom").catch(|_| Ok("recovered"));
    /// assert_eq!(recovered.value(), Some("recovered"));
    /// ```
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<T, E> + Send + 'static,
    {
        self.then_or_else(Ok, on_rejected)
    }

    /// True while the promise has not settled.
    pub fn is_pending(&self) -> bool {
        self.inner.lock().unwrap().state.is_pending()
    }

    /// The fulfillment value, if fulfilled.
    pub fn value(&self) -> Option<T> {
        match &self.inner.lock().unwrap().state {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if rejected.
    pub fn reason(&self) -> Option<E> {
        match &self.inner.lock().unwrap().state {
            State::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// A `Future` view of this promise, ready once it settles.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::executor::block_on;
    /// use promise_source::Promise;
    /// use std::thread;
    ///
    /// let (promise, producer) = Promise::<String, String>::pending();
    /// let waiter = promise.waiter();
    /// let task = thread::spawn(move || block_on(async {
    ///     assert_eq!(waiter.await, Ok("hi".to_string()));
    /// }));
    /// let _ = producer.resolve("hi".into());
    /// task.join().expect("the waiter thread has panicked");
    /// ```
    pub fn waiter(&self) -> Waiter<T, E> {
        Waiter {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Future for Waiter<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        match &inner.state {
            State::Pending => {
                inner.wakers.push(cx.waker().clone());
                Poll::Pending
            }
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(reason) => {
                let reason = reason.clone();
                inner.unhandled = None;
                Poll::Ready(Err(reason))
            }
        }
    }
}
