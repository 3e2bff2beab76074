//! Aggregate combinator over a fixed collection of promises and ready
//! values.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use crate::promise::{Producer, Promise};

/// One element of [`Promise::all`]: either a value that is already
/// available or a promise that will produce one.
pub enum Entry<T, E> {
    Value(T),
    Promise(Promise<T, E>),
}

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    /// Builds a promise that fulfills with every entry's value, in input
    /// order, once all of them have settled successfully. If any entry
    /// fails, the combined promise rejects with the first failure and
    /// ignores everything that settles afterwards.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_source::{Entry, Promise};
    ///
    /// let combined = Promise::all(vec![
    ///     Entry::Promise(Promise::<i32, String>::resolved(1)),
    ///     Entry::Value(2),
    ///     Entry::Value(3),
    /// ]);
    /// assert_eq!(combined.value(), Some(vec![1, 2, 3]));
    /// ```
    pub fn all(entries: Vec<Entry<T, E>>) -> Promise<Vec<T>, E> {
        let (combined, producer) = Promise::<Vec<T>, E>::pending();
        let total = entries.len();
        if total == 0 {
            let _ = producer.resolve(Vec::new());
            return combined;
        }
        let gather = Arc::new(Mutex::new(Gather {
            values: vec![None; total],
            remaining: total,
        }));
        for (index, entry) in entries.into_iter().enumerate() {
            match entry {
                Entry::Value(value) => record(&gather, &producer, index, value),
                Entry::Promise(promise) => {
                    let slots = gather.clone();
                    let fulfill = producer.clone();
                    let fail = producer.clone();
                    promise.then_or_else(
                        move |value| {
                            record(&slots, &fulfill, index, value);
                            Ok(())
                        },
                        move |reason| {
                            // First failure wins; the settle guard turns
                            // every later attempt into a no-op.
                            let _ = fail.reject(reason);
                            Ok(())
                        },
                    );
                }
            }
        }
        combined
    }
}

/// Fills slot `index` and fulfills the combined promise once every slot
/// has been filled.
fn record<T, E>(gather: &Mutex<Gather<T>>, producer: &Producer<Vec<T>, E>, index: usize, value: T)
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    let finished = {
        let mut gather = gather.lock().unwrap();
        if gather.values[index].is_none() {
            gather.values[index] = Some(value);
            gather.remaining -= 1;
        }
        if gather.remaining == 0 {
            Some(gather.values.iter_mut().filter_map(Option::take).collect::<Vec<_>>())
        } else {
            None
        }
    };
    if let Some(values) = finished {
        let _ = producer.clone().resolve(values);
    }
}

#[cfg(test)]
mod tests {
    use super::Entry;
    use crate::Promise;

    #[test]
    fn empty_input_fulfills_immediately() {
        let combined = Promise::<i32, &str>::all(Vec::new());
        assert_eq!(combined.value(), Some(Vec::new()));
    }

    #[test]
    fn results_keep_input_order_not_completion_order() {
        let (slow, slow_producer) = Promise::<&str, &str>::pending();
        let (fast, fast_producer) = Promise::<&str, &str>::pending();
        let combined = Promise::all(vec![Entry::Promise(slow), Entry::Promise(fast)]);
        fast_producer.resolve("a").unwrap();
        assert!(combined.is_pending());
        slow_producer.resolve("b").unwrap();
        assert_eq!(combined.value(), Some(vec!["b", "a"]));
    }

    #[test]
    fn first_failure_rejects_the_combined_promise() {
        let (ok, ok_producer) = Promise::<i32, &str>::pending();
        let (bad, bad_producer) = Promise::<i32, &str>::pending();
        let combined = Promise::all(vec![Entry::Promise(ok), Entry::Promise(bad)]);
        bad_producer.reject("boom").unwrap();
        assert_eq!(combined.reason(), Some("boom"));
        // A success arriving after the failure changes nothing.
        ok_producer.resolve(1).unwrap();
        assert_eq!(combined.reason(), Some("boom"));
        assert!(combined.value().is_none());
    }

    #[test]
    fn later_failures_after_the_first_are_ignored() {
        let (first, first_producer) = Promise::<i32, &str>::pending();
        let (second, second_producer) = Promise::<i32, &str>::pending();
        let combined = Promise::all(vec![Entry::Promise(first), Entry::Promise(second)]);
        first_producer.reject("first").unwrap();
        // The second source promise itself still settles normally.
        assert_eq!(second_producer.reject("second"), Ok(()));
        assert_eq!(combined.reason(), Some("first"));
    }

    #[test]
    fn ready_values_mix_with_promises() {
        let combined = Promise::all(vec![
            Entry::Promise(Promise::<i32, &str>::resolved(1)),
            Entry::Value(2),
            Entry::Value(3),
        ]);
        assert_eq!(combined.value(), Some(vec![1, 2, 3]));
    }
}
