//! Handler registry (C2), block executor (C3), and the sequencing
//! interpreter (C4) that walks a workflow version's ordered blocks.

pub mod error;
pub mod executor;
pub mod interpreter;
pub mod registry;

pub use error::{HandlerError, InterpreterError, RegistryError};
pub use executor::{BlockExecutor, EventSink, ExecutorPolicy, NullEventSink};
pub use interpreter::{Budgets, Interpreter, RunResult};
pub use registry::{BlockHandler, BlockHandlerRegistry, Capabilities, Passthrough, UnsupportedStub};
