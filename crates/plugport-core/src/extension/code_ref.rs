//! Lazy, memoized code references.
//!
//! A [`LazyCodeRef`] wraps an async factory. The memo slot moves through
//! `Unresolved -> Pending -> Resolved`; a failed attempt moves it back to
//! `Unresolved` so a later call can retry.
//!
//! ```text
//!   Unresolved --get()--> Pending(shared future, attempt n)
//!        ^                      |            |
//!        |   error (attempt n)  |            | ok
//!        +----------------------+            v
//!                                        Resolved(value)
//! ```
//!
//! Concurrent callers share the pending future, so the factory runs once per
//! attempt. The lock around the slot is never held across an `.await`.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::CodeResolutionError;

/// Property key marking a code reference in a JSON manifest.
pub const CODE_REF_KEY: &str = "$codeRef";

/// Export name used when a reference names only a module.
pub const DEFAULT_EXPORT: &str = "default";

/// `module.export` address of a code reference inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeRefSpec {
    pub module: String,
    pub export: String,
}

impl CodeRefSpec {
    pub fn new(module: impl Into<String>, export: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            export: export.into(),
        }
    }

    /// Parse `module.export` or a bare `module`.
    ///
    /// Both parts must be single path segments, so an address can never
    /// name a file outside its bundle's export tree.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (module, export) = raw.split_once('.').unwrap_or((raw, DEFAULT_EXPORT));
        let spec = Self::new(module, export);
        spec.is_contained().then_some(spec)
    }

    /// Whether module and export are both plain, non-empty segments.
    pub fn is_contained(&self) -> bool {
        is_plain_segment(&self.module) && is_plain_segment(&self.export)
    }
}

fn is_plain_segment(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains(['/', '\\', ':', '\0'])
}

impl fmt::Display for CodeRefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.export)
    }
}

/// Type-erased product of a code reference.
#[derive(Clone)]
pub struct CodeValue(Arc<dyn Any + Send + Sync>);

impl CodeValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap exported data.
    pub fn from_json(value: serde_json::Value) -> Self {
        Self::new(value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        self.downcast_ref::<serde_json::Value>()
    }

    /// Whether both handles point at the same materialized value.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for CodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_json() {
            Some(json) => write!(f, "CodeValue({json})"),
            None => f.write_str("CodeValue(<opaque>)"),
        }
    }
}

/// Observable state of a memo slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRefState {
    Unresolved,
    Pending,
    Resolved,
}

type Outcome<T> = Result<T, CodeResolutionError>;
type Factory<T> = Arc<dyn Fn() -> BoxFuture<'static, Outcome<T>> + Send + Sync>;

enum Memo<T> {
    Unresolved,
    Pending {
        attempt: u64,
        future: Shared<BoxFuture<'static, Outcome<T>>>,
    },
    Resolved(T),
}

struct Slot<T> {
    memo: Memo<T>,
    attempts: u64,
}

struct Inner<T> {
    label: String,
    origin: Option<CodeRefSpec>,
    bound: bool,
    factory: Factory<T>,
    slot: Mutex<Slot<T>>,
}

/// Deferred, memoized async value.
pub struct LazyCodeRef<T> {
    inner: Arc<Inner<T>>,
}

/// Code reference as embedded in extension properties.
pub type CodeRef = LazyCodeRef<CodeValue>;

impl<T> Clone for LazyCodeRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LazyCodeRef<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a factory. It is not invoked until the first [`get`](Self::get).
    pub fn new<F, Fut>(label: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        Self::build(label.into(), None, true, factory, Memo::Unresolved)
    }

    /// Bind a manifest address to a factory.
    pub fn from_spec<F, Fut>(spec: CodeRefSpec, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        Self::build(spec.to_string(), Some(spec), true, factory, Memo::Unresolved)
    }

    /// An already materialized value.
    pub fn resolved(label: impl Into<String>, value: T) -> Self {
        let produced = value.clone();
        Self::build(
            label.into(),
            None,
            true,
            move || futures::future::ready(Ok(produced.clone())),
            Memo::Resolved(value),
        )
    }

    /// A manifest address nobody has bound yet. Resolving it fails until a
    /// loader replaces it.
    pub fn unbound(spec: CodeRefSpec) -> Self {
        let label = spec.to_string();
        let reported = label.clone();
        Self::build(
            label,
            Some(spec),
            false,
            move || futures::future::ready(Err(CodeResolutionError::Unbound(reported.clone()))),
            Memo::Unresolved,
        )
    }

    fn build<F, Fut>(
        label: String,
        origin: Option<CodeRefSpec>,
        bound: bool,
        factory: F,
        memo: Memo<T>,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let factory: Factory<T> = Arc::new(move || factory().boxed());
        Self {
            inner: Arc::new(Inner {
                label,
                origin,
                bound,
                factory,
                slot: Mutex::new(Slot { memo, attempts: 0 }),
            }),
        }
    }

    /// Materialize the value, sharing any attempt already in flight.
    ///
    /// Dropping the returned future abandons the wait but not the attempt:
    /// the next caller picks the same pending future up again.
    pub async fn get(&self) -> Outcome<T> {
        let (attempt, future) = {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;
            match &slot.memo {
                Memo::Resolved(value) => return Ok(value.clone()),
                Memo::Pending { attempt, future } => (*attempt, future.clone()),
                Memo::Unresolved => {
                    slot.attempts += 1;
                    let attempt = slot.attempts;
                    let future = (self.inner.factory)().shared();
                    slot.memo = Memo::Pending {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let outcome = future.await;

        let mut slot = self.inner.slot.lock();
        let settles_this_attempt =
            matches!(&slot.memo, Memo::Pending { attempt: current, .. } if *current == attempt);
        if settles_this_attempt {
            slot.memo = match &outcome {
                Ok(value) => Memo::Resolved(value.clone()),
                Err(err) => {
                    tracing::debug!(reference = %self.inner.label, error = %err, "Code reference failed, memo cleared");
                    Memo::Unresolved
                }
            };
        }
        outcome
    }

    pub fn state(&self) -> CodeRefState {
        match self.inner.slot.lock().memo {
            Memo::Unresolved => CodeRefState::Unresolved,
            Memo::Pending { .. } => CodeRefState::Pending,
            Memo::Resolved(_) => CodeRefState::Resolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == CodeRefState::Resolved
    }

    /// Resolved value, if any, without awaiting.
    pub fn peek(&self) -> Option<T> {
        match &self.inner.slot.lock().memo {
            Memo::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T> LazyCodeRef<T> {
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Manifest address this reference was declared with, if any.
    pub fn spec(&self) -> Option<&CodeRefSpec> {
        self.inner.origin.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.bound
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T> fmt::Debug for LazyCodeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.slot.lock().memo {
            Memo::Unresolved => "unresolved",
            Memo::Pending { .. } => "pending",
            Memo::Resolved(_) => "resolved",
        };
        f.debug_struct("LazyCodeRef")
            .field("label", &self.inner.label)
            .field("bound", &self.inner.bound)
            .field("state", &state)
            .finish()
    }
}
