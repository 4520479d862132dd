//! End-to-end dispatch scenarios through an assembled runtime.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{
    Constraint, EventMessage, ExceptionKind, FieldConstraint, Message, MessageBody, MessageKind,
    MessageResult, ValidationError, ValidationKind,
};
use courier_runtime::{
    AppendLog, Endpoint, EventEntry, EventPublisher, ExecutionContext, MemoryLog, MessageHandler,
    Route, Rule, Runtime,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateOrder {
    sku: String,
    qty: i64,
}

impl Message for CreateOrder {
    fn constraints() -> Vec<FieldConstraint> {
        vec![FieldConstraint::new("qty", Constraint::GreaterThan(0.0))]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderCreated {
    sku: String,
    qty: i64,
}

impl Message for OrderCreated {
    fn kind() -> MessageKind {
        MessageKind::Event
    }
}

#[derive(Clone)]
struct CreateOrderHandler;

#[async_trait]
impl MessageHandler for CreateOrderHandler {
    type Request = CreateOrder;
    type Response = OrderCreated;

    async fn receive(&self, _ctx: &ExecutionContext, request: CreateOrder) -> anyhow::Result<Option<OrderCreated>> {
        Ok(Some(OrderCreated {
            sku: request.sku,
            qty: request.qty,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeleteAccount {
    account: String,
}

impl Message for DeleteAccount {
    fn constraints() -> Vec<FieldConstraint> {
        vec![FieldConstraint::new("account", Constraint::NotNullOrWhitespace)]
    }
}

#[derive(Clone)]
struct DeleteAccountHandler {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl MessageHandler for DeleteAccountHandler {
    type Request = DeleteAccount;
    type Response = ();

    async fn receive(&self, _ctx: &ExecutionContext, _request: DeleteAccount) -> anyhow::Result<Option<()>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Always fails, counting its evaluations.
struct Tripwire {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Rule<DeleteAccount> for Tripwire {
    async fn check(&self, _ctx: &ExecutionContext, _message: &DeleteAccount) -> Vec<ValidationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        vec![ValidationError::new("tripped")]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StockChanged {
    sku: String,
}

#[derive(Clone)]
struct StockListener {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl MessageHandler for StockListener {
    type Request = StockChanged;
    type Response = ();

    async fn receive(&self, _ctx: &ExecutionContext, _event: StockChanged) -> anyhow::Result<Option<()>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

impl Message for StockChanged {
    fn kind() -> MessageKind {
        MessageKind::Event
    }
}

struct CountingPublisher {
    calls: AtomicU32,
}

#[async_trait]
impl EventPublisher for CountingPublisher {
    fn name(&self) -> &str {
        "counting"
    }

    async fn publish(&self, _events: &[EventMessage]) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn order_runtime(events: Arc<MemoryLog<EventEntry>>) -> Runtime {
    Runtime::builder()
        .register(Endpoint::handler(CreateOrderHandler).at("CreateOrder"))
        .event_store(events)
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_valid_order_returns_event_and_stores_it() {
    let events = Arc::new(MemoryLog::<EventEntry>::new());
    let runtime = order_runtime(events.clone());

    let result = runtime
        .send("CreateOrder", json!({ "sku": "ABC", "qty": 2 }))
        .await;

    assert!(result.is_successful());
    assert_eq!(result.response(), Some(&json!({ "sku": "ABC", "qty": 2 })));

    let stored = events.entries().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].request_id, result.request_id());
    assert_eq!(stored[0].name, "OrderCreated");

    let typed = result.into_typed::<OrderCreated>().unwrap();
    assert_eq!(
        typed.response(),
        Some(&OrderCreated {
            sku: "ABC".into(),
            qty: 2
        })
    );
}

#[tokio::test]
async fn scenario_b_invalid_quantity_is_an_input_error() {
    let events = Arc::new(MemoryLog::<EventEntry>::new());
    let runtime = order_runtime(events.clone());

    let result = runtime
        .send("CreateOrder", json!({ "sku": "ABC", "qty": -1 }))
        .await;

    assert!(!result.is_successful());
    assert_eq!(result.validation_errors().len(), 1);
    assert_eq!(result.validation_errors()[0].kind, ValidationKind::Input);
    assert!(result.response().is_none());
    assert!(events.is_empty());
}

#[tokio::test]
async fn scenario_c_secure_endpoint_rejects_anonymous_callers() {
    let handler_calls = Arc::new(AtomicU32::new(0));
    let rule_calls = Arc::new(AtomicU32::new(0));
    let runtime = Runtime::builder()
        .register(
            Endpoint::handler(DeleteAccountHandler {
                calls: handler_calls.clone(),
            })
            .at("accounts/delete")
            .secure()
            .input_rule(Tripwire {
                calls: rule_calls.clone(),
            })
            .business_rule(Tripwire {
                calls: rule_calls.clone(),
            }),
        )
        .build()
        .unwrap();

    // Blank account would also fail the input constraint.
    let result = runtime.send("accounts/delete", json!({ "account": " " })).await;

    assert!(!result.is_successful());
    assert_eq!(result.validation_errors().len(), 1);
    let error = &result.validation_errors()[0];
    assert_eq!(error.kind, ValidationKind::Security);
    assert_eq!(error.message, "Unauthorized");
    assert_eq!(rule_calls.load(Ordering::SeqCst), 0);
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_d_unknown_path_is_reported_not_found() {
    let runtime = order_runtime(Arc::new(MemoryLog::new()));

    let result = runtime.send("orders/nowhere", MessageBody::Empty).await;

    assert!(!result.is_successful());
    let raised = result.raised_exception().unwrap();
    assert_eq!(raised.kind, ExceptionKind::EndpointNotFound);
    assert!(raised.message.contains("orders/nowhere"));
}

#[tokio::test]
async fn scenario_e_publish_reaches_each_subscriber_and_publisher_once() {
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    let publisher = Arc::new(CountingPublisher {
        calls: AtomicU32::new(0),
    });
    let runtime = Runtime::builder()
        .register(Endpoint::handler(StockListener { calls: first.clone() }).subscribe("stock"))
        .register(
            Endpoint::handler(StockListener {
                calls: second.clone(),
            })
            .at("warehouse/stock")
            .subscribe("stock"),
        )
        .publisher(publisher.clone())
        .build()
        .unwrap();

    let results = runtime.publish_on("stock", json!({ "sku": "ABC" })).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_successful()));
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn returned_events_reach_subscribers_after_shutdown_drains() {
    let calls = Arc::new(AtomicU32::new(0));

    #[derive(Clone)]
    struct CreatedListener {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MessageHandler for CreatedListener {
        type Request = OrderCreated;
        type Response = ();

        async fn receive(&self, _ctx: &ExecutionContext, _event: OrderCreated) -> anyhow::Result<Option<()>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    let runtime = Runtime::builder()
        .register(Endpoint::handler(CreateOrderHandler).at("CreateOrder"))
        .register(Endpoint::handler(CreatedListener { calls: calls.clone() }).subscribe("OrderCreated"))
        .build()
        .unwrap();

    let result = runtime
        .send("CreateOrder", json!({ "sku": "ABC", "qty": 1 }))
        .await;
    assert!(result.is_successful());

    assert!(runtime.shutdown().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PriceQuote {
    sku: String,
}

impl Message for PriceQuote {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Priced {
    engine: u32,
}

impl Message for Priced {}

#[derive(Clone)]
struct PricingEngine {
    generation: u32,
}

#[async_trait]
impl MessageHandler for PricingEngine {
    type Request = PriceQuote;
    type Response = Priced;

    async fn receive(&self, _ctx: &ExecutionContext, _request: PriceQuote) -> anyhow::Result<Option<Priced>> {
        Ok(Some(Priced {
            engine: self.generation,
        }))
    }
}

#[tokio::test]
async fn typed_sends_reach_the_current_version() {
    let runtime = Runtime::builder()
        .register(
            Endpoint::handler(PricingEngine { generation: 1 })
                .route(Route::new("quotes").version(1)),
        )
        .register(
            Endpoint::handler(PricingEngine { generation: 2 })
                .route(Route::new("quotes").version(2)),
        )
        .build()
        .unwrap();

    let engine = |result: MessageResult| {
        result
            .into_typed::<Priced>()
            .unwrap()
            .response()
            .map(|p| p.engine)
    };

    let typed = runtime.send_message(PriceQuote { sku: "ABC".into() }).await;
    assert_eq!(engine(typed), Some(2));

    let by_path = runtime.send("quotes", json!({ "sku": "ABC" })).await;
    assert_eq!(engine(by_path), Some(2));

    let pinned = runtime.send("v1/quotes", json!({ "sku": "ABC" })).await;
    assert_eq!(engine(pinned), Some(1));
}
