//! Platform adapters: the thing that turns a bare [`BlockHandlerRegistry`]
//! into one capable of running a given workflow version, by registering a
//! real handler, an [`UnsupportedStub`], or a [`Passthrough`] for every
//! block type per the host's actual capabilities.

use crate::code::CodeHandler;
use crate::data::{ArrayHandler, DateHandler, MathHandler, NormalizeHandler, ObjectHandler, StringHandler};
use crate::fetch::FetchHandler;
use crate::flow::{AgentHandler, GotoHandler, LocationHandler, SleepHandler};
use crate::misc::{FilesystemHandler, FtpHandler, ImageHandler, ValidationHandler, VideoHandler};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use workforge_interpreter::{BlockHandlerRegistry, Capabilities, Passthrough, UnsupportedStub};
use workforge_workflow::BlockType;

/// A single fixed location reading. Real GPS streaming is out of scope —
/// the adapter hands the Interpreter whatever it was constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

/// Implemented once per host environment. `register_blocks` is the only
/// method the Execution Service calls at startup; `get_location` and
/// `get_filesystem` exist for handlers that need to reach back into the
/// adapter outside the registry (there are none yet, but the distilled
/// contract names them, so they're kept as real accessors rather than
/// dropped).
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> &'static str;
    fn capabilities(&self) -> Capabilities;
    fn register_blocks(&self, registry: &mut BlockHandlerRegistry);
    fn get_location(&self) -> Option<Coordinates>;
    fn get_filesystem(&self) -> Option<PathBuf>;
}

fn register_common(registry: &mut BlockHandlerRegistry) {
    registry.register(BlockType::Object, Arc::new(ObjectHandler));
    registry.register(BlockType::String, Arc::new(StringHandler));
    registry.register(BlockType::Array, Arc::new(ArrayHandler));
    registry.register(BlockType::Math, Arc::new(MathHandler));
    registry.register(BlockType::Date, Arc::new(DateHandler));
    registry.register(BlockType::Normalize, Arc::new(NormalizeHandler));
    registry.register(BlockType::Goto, Arc::new(GotoHandler));
    registry.register(BlockType::Sleep, Arc::new(SleepHandler));
    registry.register(BlockType::Code, Arc::new(CodeHandler));
    registry.register(BlockType::Validation, Arc::new(ValidationHandler));
}

/// Filesystem, FTP, and image access; no camera, UI, or location.
pub struct ServerAdapter {
    fs_root: PathBuf,
}

impl ServerAdapter {
    #[must_use]
    pub fn new(fs_root: PathBuf) -> Self {
        Self { fs_root }
    }
}

impl PlatformAdapter for ServerAdapter {
    fn platform(&self) -> &'static str {
        "server"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_camera: false,
            has_filesystem: true,
            has_ftp: true,
            has_ui: false,
            has_video: true,
            has_location: false,
        }
    }

    fn register_blocks(&self, registry: &mut BlockHandlerRegistry) {
        register_common(registry);
        registry.register(BlockType::Fetch, Arc::new(FetchHandler::default()));
        registry.register(BlockType::Agent, Arc::new(AgentHandler));
        registry.register(BlockType::Video, Arc::new(VideoHandler));
        registry.register(BlockType::Image, Arc::new(ImageHandler));
        registry.register(BlockType::Filesystem, Arc::new(FilesystemHandler::new(self.fs_root.clone())));
        registry.register(BlockType::Ftp, Arc::new(FtpHandler));
        registry.register(BlockType::Location, Arc::new(UnsupportedStub::new("server", BlockType::Location)));
        for ui in [BlockType::UiCamera, BlockType::UiForm, BlockType::UiTable, BlockType::UiDetails] {
            registry.register(ui, Arc::new(UnsupportedStub::new("server", ui)));
        }
    }

    fn get_location(&self) -> Option<Coordinates> {
        None
    }

    fn get_filesystem(&self) -> Option<PathBuf> {
        Some(self.fs_root.clone())
    }
}

/// Camera, UI suspension, and location; no filesystem, FTP, or image
/// decoding pipeline.
pub struct MobileAdapter {
    location: Option<Coordinates>,
}

impl MobileAdapter {
    #[must_use]
    pub fn new(location: Option<Coordinates>) -> Self {
        Self { location }
    }
}

impl PlatformAdapter for MobileAdapter {
    fn platform(&self) -> &'static str {
        "mobile"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_camera: true,
            has_filesystem: false,
            has_ftp: false,
            has_ui: true,
            has_video: true,
            has_location: self.location.is_some(),
        }
    }

    fn register_blocks(&self, registry: &mut BlockHandlerRegistry) {
        register_common(registry);
        registry.register(BlockType::Fetch, Arc::new(FetchHandler::default()));
        registry.register(BlockType::Agent, Arc::new(AgentHandler));
        registry.register(BlockType::Video, Arc::new(VideoHandler));
        registry.register(BlockType::Image, Arc::new(ImageHandler));
        match self.location {
            Some(coords) => registry.register(BlockType::Location, Arc::new(LocationHandler::new(coords))),
            None => registry.register(BlockType::Location, Arc::new(UnsupportedStub::new("mobile", BlockType::Location))),
        }
        registry.register(BlockType::Filesystem, Arc::new(UnsupportedStub::new("mobile", BlockType::Filesystem)));
        registry.register(BlockType::Ftp, Arc::new(UnsupportedStub::new("mobile", BlockType::Ftp)));
        for ui in [BlockType::UiCamera, BlockType::UiForm, BlockType::UiTable, BlockType::UiDetails] {
            registry.register(ui, Arc::new(Passthrough));
        }
    }

    fn get_location(&self) -> Option<Coordinates> {
        self.location
    }

    fn get_filesystem(&self) -> Option<PathBuf> {
        None
    }
}

/// Pure-JS execution: every I/O-capable block type is an unsupported
/// stub, even though the registry still carries an entry for each (the
/// distilled spec's registration requirement is about presence, not
/// capability).
pub struct CloudWorkerAdapter;

impl PlatformAdapter for CloudWorkerAdapter {
    fn platform(&self) -> &'static str {
        "cloud-worker"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn register_blocks(&self, registry: &mut BlockHandlerRegistry) {
        register_common(registry);
        for stub_type in [BlockType::Fetch, BlockType::Agent, BlockType::Location, BlockType::Video] {
            registry.register(stub_type, Arc::new(UnsupportedStub::new("cloud-worker", stub_type)));
        }
    }

    fn get_location(&self) -> Option<Coordinates> {
        None
    }

    fn get_filesystem(&self) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_adapter_satisfies_required_registrations() {
        let adapter = ServerAdapter::new(std::env::temp_dir());
        let mut registry = BlockHandlerRegistry::new();
        adapter.register_blocks(&mut registry);
        assert!(registry.missing_required().is_empty());
    }

    #[test]
    fn mobile_adapter_satisfies_required_registrations() {
        let adapter = MobileAdapter::new(Some(Coordinates { latitude: 0.0, longitude: 0.0, accuracy_m: None }));
        let mut registry = BlockHandlerRegistry::new();
        adapter.register_blocks(&mut registry);
        assert!(registry.missing_required().is_empty());
    }

    #[test]
    fn cloud_worker_adapter_satisfies_required_registrations() {
        let adapter = CloudWorkerAdapter;
        let mut registry = BlockHandlerRegistry::new();
        adapter.register_blocks(&mut registry);
        assert!(registry.missing_required().is_empty());
    }

    #[test]
    fn cloud_worker_has_no_capabilities() {
        let caps = CloudWorkerAdapter.capabilities();
        assert!(!caps.has_camera && !caps.has_filesystem && !caps.has_ftp && !caps.has_ui && !caps.has_video && !caps.has_location);
    }
}
