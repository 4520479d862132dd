//! Per-dispatch execution state.

use std::fmt;
use std::sync::Arc;

use courier_core::{
    ClockSource, DispatchError, EventMessage, Incoming, Message, MessageBody, MessageResult,
    Request, ResultParts, SystemClock, TypedBody, ValidationError,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::catalog::EndpointDescriptor;
use crate::gateway::{Dispatch, Dispatcher};

// ---------------------------------------------------------------------------
// ParentLink
// ---------------------------------------------------------------------------

/// What a nested dispatch keeps of the dispatch that issued it.
#[derive(Debug, Clone)]
pub struct ParentLink {
    pub request: Arc<Request>,
    pub cancellation: CancellationToken,
}

impl ParentLink {
    /// Nesting depth of a dispatch issued under this link.
    #[must_use]
    pub fn child_depth(&self) -> usize {
        self.request.depth() + 1
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ContextState {
    completed: Option<u64>,
    response: Option<TypedBody>,
    exception: Option<Arc<DispatchError>>,
    validation_errors: Vec<ValidationError>,
    raised_events: Vec<EventMessage>,
}

/// Mutable state of one in-flight dispatch.
///
/// Handed to handlers and rules. `completed` and `response` are set at
/// most once; validation errors and raised events only grow. Handlers
/// reach the rest of the runtime through [`send`](Self::send) and
/// [`publish`](Self::publish), which dispatch as children of this context.
pub struct ExecutionContext {
    request: Arc<Request>,
    endpoint: Arc<EndpointDescriptor>,
    parent: Option<ParentLink>,
    cancellation: CancellationToken,
    started: u64,
    clock: Arc<dyn ClockSource>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    state: Mutex<ContextState>,
}

impl ExecutionContext {
    /// Creates the context; the cancellation token is a child of the
    /// parent's, so cancelling a dispatch cancels everything it issued.
    pub fn new(
        request: Request,
        endpoint: Arc<EndpointDescriptor>,
        parent: Option<ParentLink>,
        clock: Arc<dyn ClockSource>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Self {
        let cancellation = parent
            .as_ref()
            .map_or_else(CancellationToken::new, |p| p.cancellation.child_token());
        Self {
            request: Arc::new(request),
            endpoint,
            parent,
            cancellation,
            started: clock.now(),
            clock,
            dispatcher,
            state: Mutex::new(ContextState::default()),
        }
    }

    /// A root context with the system clock and no dispatcher, for
    /// exercising handlers and rules in isolation.
    #[must_use]
    pub fn detached(request: Request, endpoint: Arc<EndpointDescriptor>) -> Self {
        Self::new(request, endpoint, None, Arc::new(SystemClock), None)
    }

    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    #[must_use]
    pub fn endpoint(&self) -> &Arc<EndpointDescriptor> {
        &self.endpoint
    }

    #[must_use]
    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn started(&self) -> u64 {
        self.started
    }

    #[must_use]
    pub fn completed(&self) -> Option<u64> {
        self.state.lock().completed
    }

    /// Current time from the runtime clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Stamps the completion time. Returns `false`, leaving the first stamp
    /// in place, when already completed.
    pub fn complete(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.completed.is_some() {
            return false;
        }
        state.completed = Some(now);
        true
    }

    /// Sets the response. Returns `false` when one was already set.
    pub fn set_response(&self, response: TypedBody) -> bool {
        let mut state = self.state.lock();
        if state.response.is_some() {
            return false;
        }
        state.response = Some(response);
        true
    }

    #[must_use]
    pub fn response(&self) -> Option<TypedBody> {
        self.state.lock().response.clone()
    }

    pub fn set_exception(&self, error: DispatchError) {
        self.state.lock().exception = Some(Arc::new(error));
    }

    #[must_use]
    pub fn exception(&self) -> Option<Arc<DispatchError>> {
        self.state.lock().exception.clone()
    }

    pub(crate) fn take_exception(&self) -> Option<Arc<DispatchError>> {
        self.state.lock().exception.take()
    }

    pub(crate) fn restore_exception(&self, error: Arc<DispatchError>) {
        self.state.lock().exception = Some(error);
    }

    pub fn add_validation_errors(&self, errors: impl IntoIterator<Item = ValidationError>) {
        self.state.lock().validation_errors.extend(errors);
    }

    #[must_use]
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        self.state.lock().validation_errors.clone()
    }

    /// Queues an event for publication once the dispatch succeeds.
    pub fn raise<E: Message>(&self, event: E) {
        let event = EventMessage::new(event, self.clock.now());
        self.raise_event(event);
    }

    pub fn raise_event(&self, event: EventMessage) {
        self.state.lock().raised_events.push(event);
    }

    #[must_use]
    pub fn raised_events(&self) -> Vec<EventMessage> {
        self.state.lock().raised_events.clone()
    }

    /// No validation errors and no exception.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        let state = self.state.lock();
        state.validation_errors.is_empty() && state.exception.is_none()
    }

    /// Link for dispatches issued by this one.
    #[must_use]
    pub fn link(&self) -> ParentLink {
        ParentLink {
            request: Arc::clone(&self.request),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Sends `message` to `path` as a child of this dispatch.
    pub async fn send(&self, path: &str, message: impl Into<Incoming>) -> MessageResult {
        self.dispatch(Dispatch::to(path).message(message)).await
    }

    /// Sends a typed message, resolved by its type, as a child of this dispatch.
    pub async fn send_message<T: Message>(&self, message: T) -> MessageResult {
        self.dispatch(Dispatch::message_only(Incoming::typed(message))).await
    }

    /// Issues `dispatch` as a child of this dispatch.
    pub async fn dispatch(&self, dispatch: Dispatch) -> MessageResult {
        let dispatch = dispatch.with_parent(self.link());
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.send(dispatch).await,
            None => MessageResult::failure(
                self.request.correlation_id(),
                self.request.message().id(),
                self.clock.now(),
                DispatchError::Unbound,
            ),
        }
    }

    /// Like [`send`](Self::send), but a failed result becomes
    /// [`DispatchError::DependencyFailed`] so the handler can `?` it.
    ///
    /// # Errors
    ///
    /// Returns `DependencyFailed` carrying the nested validation errors or
    /// exception.
    pub async fn send_checked(
        &self,
        path: &str,
        message: impl Into<Incoming>,
    ) -> Result<MessageResult, DispatchError> {
        let result = self.send(path, message).await;
        if result.is_successful() {
            Ok(result)
        } else {
            Err(DispatchError::DependencyFailed {
                target: path.to_string(),
                validation_errors: result.validation_errors().to_vec(),
                exception: result.raised_exception().cloned(),
            })
        }
    }

    /// Publishes `event` to subscribers right away, as a child of this
    /// dispatch. Use [`raise`](Self::raise) to publish only on success.
    pub async fn publish(&self, event: EventMessage) -> Vec<MessageResult> {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.publish(event, Some(self.link())).await,
            None => Vec::new(),
        }
    }

    /// Publishes `body` on `channel`.
    pub async fn publish_on(&self, channel: &str, body: MessageBody) -> Vec<MessageResult> {
        let event = EventMessage::on_channel(channel, body, self.clock.now());
        self.publish(event).await
    }

    /// Snapshot of the dispatch outcome.
    #[must_use]
    pub fn to_result(&self) -> MessageResult {
        let state = self.state.lock();
        MessageResult::from_parts(ResultParts {
            correlation_id: self.request.correlation_id(),
            request_id: self.request.message().id(),
            started: self.started,
            completed: state.completed.unwrap_or(self.started),
            is_cancelled: self.cancellation.is_cancelled(),
            response: state.response.clone(),
            validation_errors: state.validation_errors.clone(),
            error: state.exception.clone(),
        })
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("correlation_id", &self.request.correlation_id())
            .field("endpoint", &self.endpoint.label())
            .field("started", &self.started)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
