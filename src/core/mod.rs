//! Engine internals: the dispatcher, its control surface, and run state.

pub mod dispatcher;
pub mod event_bus;
pub mod flow_context;
pub mod runtime_context;

pub use dispatcher::{Command, EventEmitter, ExecutionStatus, FlowDispatcher};
pub use event_bus::{create_event_channel, FlowEvent};
pub use flow_context::FlowContext;
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
