//! Bounded fan-out of translation units with ordered, slot-based collection.

use std::future::Future;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cancel::Cancellation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: TokenUsage) {
        *self = *self + other;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> TokenUsage {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Maximum number of units in flight at once.
    pub concurrency: usize,
    /// Inputs with more units than this are rejected before any call is made.
    pub max_units: usize,
}

/// Successful result of one unit.
#[derive(Debug)]
pub struct UnitOutput<T> {
    pub value: T,
    pub usage: TokenUsage,
}

impl<T> UnitOutput<T> {
    pub fn new(value: T, usage: TokenUsage) -> Self {
        Self { value, usage }
    }
}

/// Failed unit. `usage` carries tokens the unit consumed before failing,
/// e.g. a response that parsed but did not validate.
#[derive(Debug)]
pub struct UnitFailure {
    pub error: anyhow::Error,
    pub usage: TokenUsage,
    cancelled: bool,
}

impl UnitFailure {
    pub fn new(error: anyhow::Error, usage: TokenUsage) -> Self {
        Self {
            error,
            usage,
            cancelled: false,
        }
    }

    fn cancelled() -> Self {
        Self {
            error: anyhow!("cancelled"),
            usage: TokenUsage::default(),
            cancelled: true,
        }
    }
}

impl From<anyhow::Error> for UnitFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error, TokenUsage::default())
    }
}

#[derive(Debug)]
pub struct Dispatched<T> {
    /// One result per unit, in unit order.
    pub results: Vec<T>,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{units} units exceed the limit of {limit}")]
    TooManyUnits { units: usize, limit: usize },
    #[error("unit {ordinal} failed: {source:#}")]
    Unit {
        ordinal: usize,
        usage: TokenUsage,
        source: anyhow::Error,
    },
    #[error("cancelled while unit {ordinal} was in flight")]
    Cancelled { ordinal: usize, usage: TokenUsage },
}

impl DispatchError {
    /// Tokens consumed by every unit that ran, including failed ones.
    pub fn usage(&self) -> TokenUsage {
        match self {
            DispatchError::TooManyUnits { .. } => TokenUsage::default(),
            DispatchError::Unit { usage, .. } | DispatchError::Cancelled { usage, .. } => *usage,
        }
    }
}

/// Spawns one task per unit with at most `options.concurrency` calls in
/// flight, then reassembles results in unit order.
///
/// Every unit runs to completion even after another has failed. The error
/// reported is the failure with the lowest ordinal, not the first to finish.
pub async fn dispatch<U, T, F, Fut>(
    units: Vec<U>,
    options: &DispatchOptions,
    cancel: &Cancellation,
    translate_one: F,
) -> Result<Dispatched<T>, DispatchError>
where
    T: Send + 'static,
    F: Fn(usize, U) -> Fut,
    Fut: Future<Output = Result<UnitOutput<T>, UnitFailure>> + Send + 'static,
{
    let total = units.len();
    if total > options.max_units {
        return Err(DispatchError::TooManyUnits {
            units: total,
            limit: options.max_units,
        });
    }
    let concurrency = options.concurrency.max(1);
    debug!(
        "dispatching {} units with concurrency {}",
        total, concurrency
    );

    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();
    for (ordinal, unit) in units.into_iter().enumerate() {
        let work = translate_one(ordinal, unit);
        let permits = permits.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let guarded = async move {
                match permits.acquire_owned().await {
                    Ok(_permit) => work.await,
                    Err(err) => Err(UnitFailure::from(anyhow!(err))),
                }
            };
            let outcome = match cancel.run(guarded).await {
                Ok(outcome) => outcome,
                Err(_) => Err(UnitFailure::cancelled()),
            };
            (ordinal, outcome)
        });
    }

    let mut slots: Vec<Option<Result<UnitOutput<T>, UnitFailure>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((ordinal, outcome)) => slots[ordinal] = Some(outcome),
            Err(err) => warn!("unit task did not finish: {}", err),
        }
    }

    let mut usage = TokenUsage::default();
    let mut results = Vec::with_capacity(total);
    let mut first_failure = None;
    for (ordinal, slot) in slots.into_iter().enumerate() {
        let outcome = slot.unwrap_or_else(|| Err(anyhow!("unit produced no result").into()));
        match outcome {
            Ok(output) => {
                usage += output.usage;
                results.push(output.value);
            }
            Err(failure) => {
                usage += failure.usage;
                if first_failure.is_none() {
                    first_failure = Some((ordinal, failure));
                }
            }
        }
    }

    if let Some((ordinal, failure)) = first_failure {
        if failure.cancelled {
            warn!("dispatch cancelled at unit {} of {}", ordinal, total);
            return Err(DispatchError::Cancelled { ordinal, usage });
        }
        warn!("unit {} of {} failed: {:#}", ordinal, total, failure.error);
        return Err(DispatchError::Unit {
            ordinal,
            usage,
            source: failure.error,
        });
    }

    debug!("dispatched {} units using {} tokens", total, usage.total());
    Ok(Dispatched { results, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tokio::time::sleep;

    fn options(concurrency: usize, max_units: usize) -> DispatchOptions {
        DispatchOptions {
            concurrency,
            max_units,
        }
    }

    #[tokio::test]
    async fn keeps_unit_order_under_jitter() {
        let units = (0..8u64).collect::<Vec<_>>();
        let dispatched = dispatch(
            units,
            &options(8, 100),
            &Cancellation::never(),
            |ordinal, unit| async move {
                sleep(Duration::from_millis((8 - unit) * 5)).await;
                Ok::<_, UnitFailure>(UnitOutput::new(
                    format!("T({})", ordinal),
                    TokenUsage::new(1, 2),
                ))
            },
        )
        .await
        .unwrap();
        assert_eq!(
            dispatched.results,
            (0..8).map(|i| format!("T({})", i)).collect::<Vec<_>>()
        );
        assert_eq!(dispatched.usage, TokenUsage::new(8, 16));
    }

    #[tokio::test]
    async fn failure_waits_for_all_units_and_keeps_usage() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let err = dispatch(
            (0..6u64).collect(),
            &options(6, 100),
            &Cancellation::never(),
            move |ordinal, unit| {
                let counter = counter.clone();
                async move {
                    sleep(Duration::from_millis(unit * 3)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    if ordinal == 2 {
                        return Err(UnitFailure::from(anyhow!("service unavailable")));
                    }
                    Ok(UnitOutput::new(ordinal, TokenUsage::new(3, 7)))
                }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(finished.load(Ordering::SeqCst), 6);
        match err {
            DispatchError::Unit {
                ordinal, usage, ..
            } => {
                assert_eq!(ordinal, 2);
                assert_eq!(usage.total(), 50);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn reports_lowest_failing_ordinal_not_first_to_finish() {
        let err = dispatch(
            (0..5u64).collect(),
            &options(5, 100),
            &Cancellation::never(),
            |ordinal, _unit| async move {
                // unit 1 finishes last, unit 4 first
                let delay = if ordinal == 1 { 40 } else { 1 };
                sleep(Duration::from_millis(delay)).await;
                if ordinal == 1 || ordinal == 4 {
                    return Err(UnitFailure::new(
                        anyhow!("bad response"),
                        TokenUsage::new(5, 0),
                    ));
                }
                Ok(UnitOutput::new((), TokenUsage::default()))
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::Unit { ordinal: 1, .. }));
        assert_eq!(err.usage(), TokenUsage::new(10, 0));
        assert!(err.to_string().starts_with("unit 1 failed: bad response"));
    }

    #[tokio::test]
    async fn rejects_oversized_input_before_calling() {
        let calls = AtomicUsize::new(0);
        let err = dispatch(
            vec!["a", "b", "c"],
            &options(4, 2),
            &Cancellation::never(),
            |_, unit| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, UnitFailure>(UnitOutput::new(unit, TokenUsage::default())) }
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::TooManyUnits { units: 3, limit: 2 }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dispatched = dispatch(
            (0..12).collect::<Vec<u32>>(),
            &options(3, 100),
            &Cancellation::never(),
            |_, unit| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, UnitFailure>(UnitOutput::new(unit, TokenUsage::default()))
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(dispatched.results.len(), 12);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak {}", peak);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn units_run_as_separate_tasks() {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let dispatched = dispatch(
            (0..16u32).collect(),
            &options(16, 100),
            &Cancellation::never(),
            |_, unit| {
                let threads = threads.clone();
                async move {
                    for _ in 0..5 {
                        threads.lock().unwrap().insert(thread::current().id());
                        // blocks the worker so other units must run elsewhere
                        thread::sleep(Duration::from_millis(2));
                        sleep(Duration::from_millis(1)).await;
                    }
                    Ok::<_, UnitFailure>(UnitOutput::new(unit, TokenUsage::default()))
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(dispatched.results, (0..16).collect::<Vec<_>>());
        let distinct = threads.lock().unwrap().len();
        assert!(distinct > 1, "units polled on {} thread", distinct);
    }

    #[tokio::test]
    async fn cancellation_fails_the_dispatch() {
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let err = dispatch(
            vec![1u32, 2],
            &options(2, 10),
            &cancel,
            |_, unit| async move {
                sleep(Duration::from_secs(30)).await;
                Ok::<_, UnitFailure>(UnitOutput::new(unit, TokenUsage::default()))
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled { ordinal: 0, .. }));
    }
}
