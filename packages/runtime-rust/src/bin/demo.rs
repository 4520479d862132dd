//! Demo runtime with a small order domain.
//!
//! ```bash
//! courier-demo --body '{"sku":"ABC","qty":2}'
//! courier-demo --path orders/cancel --body '{"order_id":"o-1"}' --user alice
//! courier-demo --list
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use courier_core::{Constraint, FieldConstraint, Message, MessageKind, Origin, Principal, ValidationError};
use courier_runtime::{
    telemetry, Dispatch, Endpoint, EventPublisher, ExecutionContext, LogConfig, MessageHandler,
    Rule, Runtime, RuntimeConfig,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Parser)]
#[command(name = "courier-demo", version, about = "Dispatch one message through a demo runtime")]
struct Cli {
    /// Endpoint path to send to
    #[arg(long, env = "COURIER_PATH", default_value = "orders/create")]
    path: String,

    /// Request body (JSON)
    #[arg(long, env = "COURIER_BODY", default_value = r#"{"sku":"ABC","qty":2}"#)]
    body: String,

    /// Authenticated user id; anonymous when omitted
    #[arg(long, env = "COURIER_USER")]
    user: Option<String>,

    /// Tracing filter, overridden by RUST_LOG
    #[arg(long, env = "COURIER_LOG", default_value = "warn")]
    log_filter: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Print the endpoint catalog instead of dispatching
    #[arg(long)]
    list: bool,
}

// ---------------------------------------------------------------------------
// Order domain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateOrder {
    sku: String,
    qty: i64,
}

impl Message for CreateOrder {
    fn constraints() -> Vec<FieldConstraint> {
        vec![
            FieldConstraint::new("sku", Constraint::NotNullOrWhitespace),
            FieldConstraint::new("sku", Constraint::MaxLength(32)),
            FieldConstraint::new("qty", Constraint::GreaterThan(0.0)),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderCreated {
    order_id: String,
    sku: String,
    qty: i64,
}

impl Message for OrderCreated {
    fn kind() -> MessageKind {
        MessageKind::Event
    }

    fn channel() -> Option<&'static str> {
        Some("orders")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CancelOrder {
    order_id: String,
}

impl Message for CancelOrder {}

#[derive(Clone)]
struct CreateOrderHandler;

#[async_trait]
impl MessageHandler for CreateOrderHandler {
    type Request = CreateOrder;
    type Response = OrderCreated;

    async fn receive(&self, _ctx: &ExecutionContext, request: CreateOrder) -> anyhow::Result<Option<OrderCreated>> {
        Ok(Some(OrderCreated {
            order_id: format!("o-{}", uuid::Uuid::new_v4().simple()),
            sku: request.sku,
            qty: request.qty,
        }))
    }
}

#[derive(Clone)]
struct CancelOrderHandler;

#[async_trait]
impl MessageHandler for CancelOrderHandler {
    type Request = CancelOrder;
    type Response = ();

    async fn receive(&self, ctx: &ExecutionContext, request: CancelOrder) -> anyhow::Result<Option<()>> {
        info!(order_id = %request.order_id, user = ?ctx.request().principal().id, "order cancelled");
        Ok(None)
    }
}

/// Only stocked SKUs can be ordered.
struct InStock;

#[async_trait]
impl Rule<CreateOrder> for InStock {
    async fn check(&self, _ctx: &ExecutionContext, message: &CreateOrder) -> Vec<ValidationError> {
        if message.sku.starts_with('X') {
            vec![ValidationError::for_field("sku", format!("{} is out of stock", message.sku))]
        } else {
            Vec::new()
        }
    }
}

#[derive(Clone)]
struct AuditTrail;

#[async_trait]
impl MessageHandler for AuditTrail {
    type Request = OrderCreated;
    type Response = ();

    async fn receive(&self, ctx: &ExecutionContext, event: OrderCreated) -> anyhow::Result<Option<()>> {
        info!(
            correlation_id = %ctx.request().correlation_id(),
            order_id = %event.order_id,
            "audit: order created"
        );
        Ok(None)
    }
}

/// Prints every externally published event to stderr.
struct StderrPublisher;

#[async_trait]
impl EventPublisher for StderrPublisher {
    fn name(&self) -> &str {
        "stderr"
    }

    async fn publish(&self, events: &[courier_core::EventMessage]) -> anyhow::Result<()> {
        for event in events {
            eprintln!("event {}: {}", event.name(), serde_json::to_string(event.envelope())?);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = RuntimeConfig {
        log: LogConfig {
            filter: cli.log_filter.clone(),
            json: cli.log_json,
        },
        ..RuntimeConfig::default()
    };
    telemetry::init_tracing(&config.log);

    let runtime = Runtime::builder()
        .config(config)
        .register(
            Endpoint::handler(CreateOrderHandler)
                .at("orders/create")
                .tag("orders")
                .business_rule(InStock),
        )
        .register(Endpoint::handler(CancelOrderHandler).at("orders/cancel").secure())
        .register(Endpoint::handler(AuditTrail).subscribe("orders"))
        .publisher(Arc::new(StderrPublisher))
        .build()?;

    if cli.list {
        for descriptor in runtime.catalog().descriptors() {
            println!(
                "{:<24} {:<16} v{} secure={}",
                descriptor.path().unwrap_or("-"),
                descriptor.request_type().name(),
                descriptor.version(),
                descriptor.is_secure()
            );
        }
        runtime.shutdown().await;
        return Ok(ExitCode::SUCCESS);
    }

    let body: serde_json::Value = serde_json::from_str(&cli.body)?;
    let principal = cli.user.map_or_else(Principal::anonymous, Principal::user);
    let result = runtime
        .dispatch(
            Dispatch::to(cli.path)
                .message(body)
                .with_origin(Origin::default().with_principal(principal)),
        )
        .await;
    runtime.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    let code = courier_runtime::transport::status_code(&result);
    info!(status = code.as_u16(), "dispatch finished");
    Ok(if result.is_successful() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
