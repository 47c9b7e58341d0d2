//! Script type registry and factory system
//!
//! Maps each script's stable type identity to a constructor able to rebuild
//! it from a persisted payload. Dynamic types are registered without a
//! constructor: their entries come back as placeholders. A type identity
//! with no registration is a load-time error, never a silent skip.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::agent::AgentId;
use super::context::{RuntimeContext, ScriptContext};
use super::dynamic::{DynamicScript, PlaceholderScript};
use super::error::{RegistryError, RegistryResult};
use super::script::{AnyScript, BotScript, Script};
use super::snapshot::ScriptSnapshot;
use super::stack::ScriptStack;

/// Rebuilds a script from its persisted payload
pub type ScriptFactory = Arc<
    dyn Fn(ScriptContext, Option<serde_json::Value>) -> RegistryResult<Box<dyn AnyScript>>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum ScriptTypeInfo {
    Persistent(ScriptFactory),
    Dynamic,
}

/// Catalog of script types known to a runtime
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    types: Arc<RwLock<HashMap<String, ScriptTypeInfo>>>,
}

impl ScriptRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, kind: &str, info: ScriptTypeInfo) -> RegistryResult<()> {
        let mut types = self.types.write();
        if types.contains_key(kind) {
            return Err(RegistryError::DuplicateType(kind.to_string()));
        }
        types.insert(kind.to_string(), info);
        tracing::debug!(kind, "script type registered");
        Ok(())
    }

    /// Register a script type. `factory` builds a fresh instance which is then
    /// loaded from the persisted payload.
    pub fn register<S, F>(&self, factory: F) -> RegistryResult<()>
    where
        S: Script,
        F: Fn(&ScriptContext) -> S + Send + Sync + 'static,
    {
        if !S::PERSISTENT {
            return self.insert(S::KIND, ScriptTypeInfo::Dynamic);
        }

        let build: ScriptFactory = Arc::new(
            move |ctx: ScriptContext,
                  data: Option<serde_json::Value>|
                  -> RegistryResult<Box<dyn AnyScript>> {
                let mut script = factory(&ctx);
                let data: S::Data = match data {
                    Some(value) => serde_json::from_value(value).map_err(|e| {
                        RegistryError::MalformedPayload {
                            kind: S::KIND.to_string(),
                            detail: e.to_string(),
                        }
                    })?,
                    // Unit-like payloads serialize to null and come back absent.
                    None => serde_json::from_value(serde_json::Value::Null)
                        .map_err(|_| RegistryError::MissingPayload(S::KIND.to_string()))?,
                };
                script.load(data);
                Ok(Box::new(BotScript::new(ctx, script)))
            },
        );

        self.insert(S::KIND, ScriptTypeInfo::Persistent(build))
    }

    /// Register a script type built with `Default::default` before loading.
    pub fn register_default<S>(&self) -> RegistryResult<()>
    where
        S: Script + Default,
    {
        self.register::<S, _>(|_ctx| S::default())
    }

    /// Register a dynamic script type. Its entries are rebuilt as placeholders.
    pub fn register_dynamic<D: DynamicScript>(&self) -> RegistryResult<()> {
        self.insert(D::KIND, ScriptTypeInfo::Dynamic)
    }

    /// Check whether the registry contains the specified type.
    pub fn has_type(&self, kind: &str) -> bool {
        self.types.read().contains_key(kind)
    }

    /// Whether `kind` is registered as dynamic
    pub fn is_dynamic(&self, kind: &str) -> bool {
        matches!(self.types.read().get(kind), Some(ScriptTypeInfo::Dynamic))
    }

    /// List all script type identifiers, sorted.
    pub fn list_types(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.types.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Rebuild one script from its snapshot. Does not start it.
    pub fn reconstruct(
        &self,
        ctx: ScriptContext,
        snapshot: &ScriptSnapshot,
    ) -> RegistryResult<Box<dyn AnyScript>> {
        let info = self
            .types
            .read()
            .get(&snapshot.kind)
            .cloned()
            .ok_or_else(|| RegistryError::TypeNotFound(snapshot.kind.clone()))?;

        match info {
            ScriptTypeInfo::Persistent(factory) => factory(ctx, snapshot.data.clone()),
            ScriptTypeInfo::Dynamic => Ok(Box::new(PlaceholderScript::new(ctx, snapshot.kind.clone()))),
        }
    }

    /// Rebuild a whole stack in persisted order. The first failing entry
    /// aborts the rebuild.
    pub fn reconstruct_stack(
        &self,
        runtime: &RuntimeContext,
        agent: AgentId,
        snapshots: &[ScriptSnapshot],
    ) -> RegistryResult<ScriptStack> {
        let mut stack = ScriptStack::new(agent);
        for (index, snapshot) in snapshots.iter().enumerate() {
            let script = self
                .reconstruct(runtime.for_agent(agent), snapshot)
                .inspect_err(|e| {
                    tracing::error!(agent = %agent, index, kind = %snapshot.kind, error = %e, "script reconstruction failed");
                })?;
            stack.push(script);
        }
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::clock::TickScheduler;
    use crate::runtime::dispatch::Dispatcher;
    use crate::runtime::scope::TaskScope;
    use crate::runtime::script::ScriptFuture;
    use crate::scripts::idle::{IdleData, IdleScript};
    use std::time::Duration;

    struct Emote;

    impl DynamicScript for Emote {
        const KIND: &'static str = "emote";

        fn run(&self, _ctx: ScriptContext) -> ScriptFuture {
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct Marker;

    impl Script for Marker {
        const KIND: &'static str = "marker";
        type Data = ();

        fn run(&self, _ctx: ScriptContext) -> ScriptFuture {
            Box::pin(async { Ok(()) })
        }

        fn snapshot(&self) {}

        fn load(&mut self, _data: ()) {}
    }

    fn runtime() -> RuntimeContext {
        let dispatcher = Dispatcher::new();
        dispatcher.bind_current_thread();
        RuntimeContext::new(
            Arc::new(TickScheduler::new()),
            TaskScope::new(dispatcher),
            Duration::from_millis(600),
        )
    }

    fn registry() -> ScriptRegistry {
        let registry = ScriptRegistry::new();
        registry
            .register::<IdleScript, _>(|_ctx| IdleScript::new(1))
            .unwrap();
        registry.register_dynamic::<Emote>().unwrap();
        registry.register_default::<Marker>().unwrap();
        registry
    }

    #[test]
    fn test_registry_lists_types() {
        let registry = registry();
        assert_eq!(registry.list_types(), vec!["emote", "idle", "marker"]);
        assert!(registry.is_dynamic("emote"));
        assert!(!registry.is_dynamic("idle"));
        assert!(matches!(
            registry.register_dynamic::<Emote>(),
            Err(RegistryError::DuplicateType(kind)) if kind == "emote"
        ));
    }

    #[test]
    fn test_reconstruct_loads_payload() {
        let runtime = runtime();
        let agent = AgentId::new();
        let snapshot = ScriptSnapshot::new("idle", Some(serde_json::json!({ "remaining": 9 })));

        let script = registry()
            .reconstruct(runtime.for_agent(agent), &snapshot)
            .unwrap();
        assert_eq!(script.kind(), "idle");
        assert_eq!(script.agent(), agent);
        assert!(script.is_idle());

        let idle = script
            .as_any()
            .downcast_ref::<BotScript<IdleScript>>()
            .unwrap();
        assert_eq!(idle.snapshot_data(), IdleData { remaining: 9 });
    }

    #[test]
    fn test_unit_payload_round_trips() {
        let runtime = runtime();
        let snapshot = ScriptSnapshot::empty("marker");
        let script = registry()
            .reconstruct(runtime.for_agent(AgentId::new()), &snapshot)
            .unwrap();
        assert_eq!(script.kind(), "marker");
    }

    #[test]
    fn test_unknown_type_fails() {
        let runtime = runtime();
        let snapshot = ScriptSnapshot::empty("teleport");
        let result = registry().reconstruct(runtime.for_agent(AgentId::new()), &snapshot);
        assert!(matches!(result, Err(RegistryError::TypeNotFound(kind)) if kind == "teleport"));
    }

    #[test]
    fn test_malformed_and_missing_payload() {
        let runtime = runtime();
        let registry = registry();

        let malformed = ScriptSnapshot::new("idle", Some(serde_json::json!({ "remaining": "soon" })));
        assert!(matches!(
            registry.reconstruct(runtime.for_agent(AgentId::new()), &malformed),
            Err(RegistryError::MalformedPayload { .. })
        ));

        let missing = ScriptSnapshot::empty("idle");
        assert!(matches!(
            registry.reconstruct(runtime.for_agent(AgentId::new()), &missing),
            Err(RegistryError::MissingPayload(kind)) if kind == "idle"
        ));
    }

    #[test]
    fn test_dynamic_entries_become_placeholders_in_place() {
        let runtime = runtime();
        let agent = AgentId::new();
        let snapshots = vec![
            ScriptSnapshot::new("idle", Some(serde_json::json!({ "remaining": 3 }))),
            ScriptSnapshot::empty("emote"),
            ScriptSnapshot::new("idle", Some(serde_json::json!({ "remaining": 4 }))),
        ];

        let stack = registry()
            .reconstruct_stack(&runtime, agent, &snapshots)
            .unwrap();
        assert_eq!(stack.kinds(), vec!["idle", "placeholder", "idle"]);
        assert!(stack.get(1).unwrap().is_placeholder());
        assert_eq!(stack.snapshot().unwrap(), snapshots);
    }

    #[test]
    fn test_stack_rebuild_aborts_on_unknown_type() {
        let runtime = runtime();
        let snapshots = vec![
            ScriptSnapshot::new("idle", Some(serde_json::json!({ "remaining": 3 }))),
            ScriptSnapshot::empty("teleport"),
        ];
        let result = registry().reconstruct_stack(&runtime, AgentId::new(), &snapshots);
        assert!(matches!(result, Err(RegistryError::TypeNotFound(_))));
    }
}
