//! Cursor-based backward pager over any keyed remote fetch.
//!
//! A [`Paginator`] is built from three functions: `fetch` loads the page
//! older than a cursor, `on_items` merges a page somewhere (usually the
//! store), and `next_key` derives the cursor for the following page. Its
//! state lives in a `watch` channel so UIs can follow the loading and
//! end-of-data flags.
//!
//! Overlapping calls collapse: while a load is running, further calls
//! return [`LoadOutcome::Skipped`] without fetching.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct PaginationState<K, E> {
    /// Oldest key fetched so far; `None` starts from the newest page.
    pub cursor: Option<K>,
    pub loading: bool,
    pub end_reached: bool,
    pub error: Option<Arc<E>>,
    generation: u64,
}

impl<K: Clone, E> Clone for PaginationState<K, E> {
    fn clone(&self) -> Self {
        Self {
            cursor: self.cursor.clone(),
            loading: self.loading,
            end_reached: self.end_reached,
            error: self.error.clone(),
            generation: self.generation,
        }
    }
}

impl<K, E> Default for PaginationState<K, E> {
    fn default() -> Self {
        Self {
            cursor: None,
            loading: false,
            end_reached: false,
            error: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Already loading, already at the end, or reset mid-flight.
    Skipped,
    /// A page with this many items was merged.
    Loaded(usize),
    /// The page was empty; no further loads until reset.
    EndReached,
    /// The fetch or merge failed; the next call retries the same page.
    Failed,
}

type FetchFn<K, T, E> = Box<dyn Fn(Option<K>) -> BoxFuture<'static, Result<Vec<T>, E>> + Send + Sync>;
type MergeFn<T, E> = Box<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<(), E>> + Send + Sync>;
type KeyFn<K, T> = Box<dyn Fn(&[T]) -> Option<K> + Send + Sync>;

pub struct Paginator<K, T, E> {
    state: watch::Sender<PaginationState<K, E>>,
    fetch: FetchFn<K, T, E>,
    on_items: MergeFn<T, E>,
    next_key: KeyFn<K, T>,
}

impl<K, T, E> Paginator<K, T, E>
where
    K: Clone + Send + Sync + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + Sync + 'static,
{
    pub fn new<F, FFut, M, MFut, N>(fetch: F, on_items: M, next_key: N) -> Self
    where
        F: Fn(Option<K>) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = Result<Vec<T>, E>> + Send + 'static,
        M: Fn(Vec<T>) -> MFut + Send + Sync + 'static,
        MFut: Future<Output = Result<(), E>> + Send + 'static,
        N: Fn(&[T]) -> Option<K> + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(PaginationState::default());
        Self {
            state,
            fetch: Box::new(move |cursor| fetch(cursor).boxed()),
            on_items: Box::new(move |items| on_items(items).boxed()),
            next_key: Box::new(next_key),
        }
    }

    pub fn state(&self) -> PaginationState<K, E> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PaginationState<K, E>> {
        self.state.subscribe()
    }

    /// Load the page older than the current cursor.
    pub async fn load_next_items(&self) -> LoadOutcome {
        let mut ticket = None;
        self.state.send_if_modified(|s| {
            if s.loading || s.end_reached {
                return false;
            }
            s.loading = true;
            ticket = Some((s.cursor.clone(), s.generation));
            true
        });
        let Some((cursor, generation)) = ticket else {
            return LoadOutcome::Skipped;
        };

        let result = match (self.fetch)(cursor).await {
            Ok(items) if items.is_empty() => Ok(None),
            Ok(items) => {
                let key = (self.next_key)(&items);
                let count = items.len();
                (self.on_items)(items).await.map(|()| Some((count, key)))
            }
            Err(e) => Err(e),
        };

        let mut outcome = LoadOutcome::Skipped;
        self.state.send_if_modified(|s| {
            if s.generation != generation {
                debug!("Discarding page loaded before reset");
                return false;
            }
            s.loading = false;
            match result {
                Ok(Some((count, Some(key)))) => {
                    s.cursor = Some(key);
                    s.error = None;
                    outcome = LoadOutcome::Loaded(count);
                }
                // A page we cannot advance past is treated as the last one.
                Ok(Some((count, None))) => {
                    s.end_reached = true;
                    s.error = None;
                    outcome = LoadOutcome::Loaded(count);
                }
                Ok(None) => {
                    s.end_reached = true;
                    s.error = None;
                    outcome = LoadOutcome::EndReached;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load page");
                    s.error = Some(Arc::new(e));
                    outcome = LoadOutcome::Failed;
                }
            }
            true
        });
        outcome
    }

    /// Start over from the newest page.  A load still in flight is
    /// discarded when it completes.
    pub fn reset(&self) {
        self.state.send_modify(|s| {
            *s = PaginationState {
                generation: s.generation.wrapping_add(1),
                ..PaginationState::default()
            };
        });
    }
}
