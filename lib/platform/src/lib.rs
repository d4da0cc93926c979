//! Platform adapters (Server, Mobile, Cloud-worker) and the concrete
//! block handlers they register into a
//! [`workforge_interpreter::BlockHandlerRegistry`].

pub mod adapter;
pub mod code;
pub mod data;
pub mod fetch;
pub mod flow;
pub mod misc;
mod support;

pub use adapter::{CloudWorkerAdapter, Coordinates, MobileAdapter, PlatformAdapter, ServerAdapter};
pub use code::CodeHandler;
pub use data::{ArrayHandler, DateHandler, MathHandler, NormalizeHandler, ObjectHandler, StringHandler};
pub use fetch::FetchHandler;
pub use flow::{AgentHandler, GotoHandler, LocationHandler, SleepHandler};
pub use misc::{FilesystemHandler, FtpHandler, ImageHandler, ValidationHandler, VideoHandler};
