//! Extension hook contract (C3 Extension Registry, `spec.md` §6).
//!
//! Hooks are modeled as a record of optional function values, each with a
//! precise signature, rather than a grab-bag of callbacks dispatched by
//! name (`spec.md` §9 Design Notes: "Extension hooks as first-class tagged
//! unions"). `futures::future::BoxFuture` carries the per-hook async
//! closures, the same way the teacher's stack already depends on `futures`.
//!
//! The registry side (`Extension`, `ExtensionRegistry`) mirrors the
//! teacher's `BuiltinProfile` trait + ordered registry pattern
//! (`cli/profiles/mod.rs`): an object-safe trait held behind `Box<dyn _>`,
//! called in registration order on startup and reverse order on shutdown.

use std::sync::Arc;

use futures::future::BoxFuture;
use rmcp::model::Tool;
use serde_json::Value;

use crate::error::Result;

pub type BeforeStdinForward = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type AfterStdoutReceive = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type GetAdditionalTools = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<Tool>>> + Send + Sync>;
pub type HandleToolCall =
    Arc<dyn Fn(String, Option<Value>) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;

/// The hook record consulted by the Forwarder on every message. Any field
/// left `None` is treated uniformly with one present — absence and presence
/// are handled the same way by the pumps (`spec.md` §9).
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_stdin_forward: Option<BeforeStdinForward>,
    pub after_stdout_receive: Option<AfterStdoutReceive>,
    pub get_additional_tools: Option<GetAdditionalTools>,
    pub handle_tool_call: Option<HandleToolCall>,
}

/// Registration surface handed to each `Extension::initialize` call. Later
/// registrations for the same hook slot replace earlier ones (last writer
/// wins); `spec.md` does not define a composition rule for multiple
/// extensions registering the same hook, so this crate picks last-wins and
/// logs when an existing registration is replaced.
pub struct HookContext {
    hooks: Hooks,
}

impl HookContext {
    fn new() -> Self {
        Self {
            hooks: Hooks::default(),
        }
    }

    pub fn register_before_stdin_forward(&mut self, hook: BeforeStdinForward) {
        if self.hooks.before_stdin_forward.is_some() {
            tracing::warn!("beforeStdinForward hook replaced by a later extension");
        }
        self.hooks.before_stdin_forward = Some(hook);
    }

    pub fn register_after_stdout_receive(&mut self, hook: AfterStdoutReceive) {
        if self.hooks.after_stdout_receive.is_some() {
            tracing::warn!("afterStdoutReceive hook replaced by a later extension");
        }
        self.hooks.after_stdout_receive = Some(hook);
    }

    pub fn register_get_additional_tools(&mut self, hook: GetAdditionalTools) {
        if self.hooks.get_additional_tools.is_some() {
            tracing::warn!("getAdditionalTools hook replaced by a later extension");
        }
        self.hooks.get_additional_tools = Some(hook);
    }

    pub fn register_handle_tool_call(&mut self, hook: HandleToolCall) {
        if self.hooks.handle_tool_call.is_some() {
            tracing::warn!("handleToolCall hook replaced by a later extension");
        }
        self.hooks.handle_tool_call = Some(hook);
    }
}

/// A pluggable behavior installed into the proxy's message pipeline.
///
/// Parallel to the teacher's `BuiltinProfile: Send + Sync` trait: an
/// object-safe interface held behind `Box<dyn Extension>`, with lifecycle
/// calls the registry drives rather than the extension itself.
pub trait Extension: Send + Sync {
    /// A short identifier for logging (e.g. "large-response-persistence").
    fn name(&self) -> &'static str;

    /// Called once at startup, in registration order, with a context the
    /// extension uses to register any hooks it implements.
    fn initialize<'a>(&'a self, ctx: &'a mut HookContext) -> BoxFuture<'a, Result<()>>;

    /// Called once at shutdown, in reverse registration order. Default is a
    /// no-op — most extensions have no teardown concern.
    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Holds the installed extensions and drives their lifecycle, aggregating
/// the `Hooks` record the Forwarder consults.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Box<dyn Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: Box<dyn Extension>) {
        self.extensions.push(extension);
    }

    /// Initialize every extension in registration order, collecting their
    /// hook registrations into a single `Hooks` record.
    pub async fn initialize_all(&self) -> Result<Hooks> {
        let mut ctx = HookContext::new();
        for extension in &self.extensions {
            tracing::info!(extension = extension.name(), "initializing extension");
            extension.initialize(&mut ctx).await?;
        }
        Ok(ctx.hooks)
    }

    /// Shut down every extension in reverse registration order, per `spec.md`
    /// §2 C3. Errors are logged but do not halt the remaining shutdowns.
    pub async fn shutdown_all(&self) {
        for extension in self.extensions.iter().rev() {
            if let Err(e) = extension.shutdown().await {
                tracing::warn!(extension = extension.name(), error = %e, "extension shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TaggingExtension {
        tag: &'static str,
    }

    impl Extension for TaggingExtension {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn initialize<'a>(&'a self, ctx: &'a mut HookContext) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                let tag = self.tag;
                ctx.register_before_stdin_forward(Arc::new(move |mut msg: Value| {
                    Box::pin(async move {
                        msg["tagged_by"] = json!(tag);
                        Ok(msg)
                    })
                }));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_registry_collects_hooks() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Box::new(TaggingExtension { tag: "one" }));

        let hooks = registry.initialize_all().await.unwrap();
        let hook = hooks.before_stdin_forward.expect("hook registered");
        let out = hook(json!({"method": "x"})).await.unwrap();
        assert_eq!(out["tagged_by"], "one");
    }

    #[tokio::test]
    async fn test_last_extension_wins_same_hook() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Box::new(TaggingExtension { tag: "one" }));
        registry.register(Box::new(TaggingExtension { tag: "two" }));

        let hooks = registry.initialize_all().await.unwrap();
        let hook = hooks.before_stdin_forward.expect("hook registered");
        let out = hook(json!({})).await.unwrap();
        assert_eq!(out["tagged_by"], "two");
    }

    struct OrderRecordingExtension {
        order: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    }

    use tokio::sync::Mutex;

    impl Extension for OrderRecordingExtension {
        fn name(&self) -> &'static str {
            self.name
        }

        fn initialize<'a>(&'a self, _ctx: &'a mut HookContext) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.order.lock().await.push(self.name);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_shutdown_runs_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ExtensionRegistry::new();
        registry.register(Box::new(OrderRecordingExtension {
            order: order.clone(),
            name: "first",
        }));
        registry.register(Box::new(OrderRecordingExtension {
            order: order.clone(),
            name: "second",
        }));

        registry.shutdown_all().await;

        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_empty_registry_initializes_to_no_hooks() {
        let registry = ExtensionRegistry::new();
        let hooks = registry.initialize_all().await.unwrap();
        assert!(hooks.before_stdin_forward.is_none());
        assert!(hooks.after_stdout_receive.is_none());
        assert!(hooks.get_additional_tools.is_none());
        assert!(hooks.handle_tool_call.is_none());
    }
}
