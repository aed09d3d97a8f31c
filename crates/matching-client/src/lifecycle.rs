/// One outstanding request per operation kind.
///
/// Each kind has a slot holding a generation counter and the cancellation token of the request
/// currently in flight. [`RequestLifecycle::begin`] bumps the generation and cancels whatever
/// the slot held before. [`RequestLifecycle::cancel`] bumps it too, so a ticket whose generation
/// no longer matches its slot must not write results or clear the loading indicator.
use std::future::Future;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    RepositoryMatch,
    WebSearch,
}

impl OperationKind {
    pub const ALL: [OperationKind; 2] = [OperationKind::RepositoryMatch, OperationKind::WebSearch];

    fn index(self) -> usize {
        match self {
            OperationKind::RepositoryMatch => 0,
            OperationKind::WebSearch => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::RepositoryMatch => "repository_match",
            OperationKind::WebSearch => "web_search",
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    token: Option<CancellationToken>,
}

#[derive(Debug, Default)]
pub struct RequestLifecycle {
    slots: Mutex<[Slot; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// Handle for one request. Dropping it does not cancel anything.
#[derive(Debug)]
pub struct RequestTicket {
    kind: OperationKind,
    generation: u64,
    token: CancellationToken,
}

impl RequestTicket {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drive `fut` until it finishes or the ticket is cancelled, whichever comes first. A
    /// cancelled ticket drops the future without polling it again.
    pub async fn run<F: Future>(&self, fut: F) -> Outcome<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Outcome::Cancelled,
            output = fut => Outcome::Completed(output),
        }
    }
}

impl RequestLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request of `kind`, cancelling the one it replaces.
    pub fn begin(&self, kind: OperationKind) -> RequestTicket {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.index()];
        slot.generation += 1;
        let token = CancellationToken::new();
        if let Some(previous) = slot.token.replace(token.clone()) {
            previous.cancel();
            debug!(kind = kind.as_str(), generation = slot.generation, "superseded pending request");
        }
        RequestTicket {
            kind,
            generation: slot.generation,
            token,
        }
    }

    pub fn cancel(&self, kind: OperationKind) {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.index()];
        slot.generation += 1;
        if let Some(token) = slot.token.take() {
            token.cancel();
            debug!(kind = kind.as_str(), "cancelled pending request");
        }
    }

    pub fn cancel_all(&self) {
        for kind in OperationKind::ALL {
            self.cancel(kind);
        }
    }

    /// Whether `ticket` is the latest request of its kind.
    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        self.slots.lock()[ticket.kind.index()].generation == ticket.generation
    }

    pub fn is_pending(&self, kind: OperationKind) -> bool {
        self.slots.lock()[kind.index()].token.is_some()
    }

    /// Release the slot if `ticket` still owns it; a no-op for superseded tickets.
    pub fn finish(&self, ticket: &RequestTicket) {
        let mut slots = self.slots.lock();
        let slot = &mut slots[ticket.kind.index()];
        if slot.generation == ticket.generation {
            slot.token = None;
        }
    }
}
