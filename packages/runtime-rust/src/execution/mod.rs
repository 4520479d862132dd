//! Execution: per-dispatch context, the handler invocation pipeline, and
//! the post-execution stages.

pub mod completion;
pub mod context;
pub mod middleware;
pub mod router;

pub use completion::{CompletionPipeline, Stage};
pub use context::{ExecutionContext, ParentLink};
pub use middleware::{Invocation, InvocationPipeline};
pub use router::{ExecutionRouter, HandlerService};
