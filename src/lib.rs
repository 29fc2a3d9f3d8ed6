//! mcpmon — transparent hot-reload proxy for MCP servers over stdio.
//!
//! An unmodified MCP client connects to this proxy as if it were the real
//! server; the proxy spawns and owns the real server as a child process,
//! forwards messages in both directions, watches source artifacts for
//! changes, and atomically replaces the child on change while preserving the
//! client session.

pub mod buffer;
pub mod config;
pub mod container;
pub mod correlator;
pub mod error;
pub mod forwarder;
pub mod framer;
pub mod hooks;
pub mod process;
pub mod protocol;
pub mod restart;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod watch;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use hooks::{Extension, ExtensionRegistry, HookContext, Hooks};
pub use process::{ChildHandle, ProcessManager, TokioProcessManager};
pub use protocol::RequestId;
pub use restart::RestartController;
pub use state::ProxyState;
pub use watch::{ChangeEvent, ChangeKind, ChangeSource, NotifyChangeSource};
