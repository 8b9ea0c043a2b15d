//! Addon module evaluation and entry-point resolution.
//!
//! An addon's main file is rhai source text, executed in the host process.
//! [`ScriptModule::evaluate`] compiles and runs the source exactly once; the
//! resulting exported surface (top-level variables, script functions, tail
//! value) is then probed for an entry point.
//!
//! # Entry-point shapes
//!
//! Addons arrive from different authoring styles, so the entry can take one
//! of five shapes. Resolution is a decision table over [`EntryPoint`], probed
//! strictly in this order — the ordering is the contract:
//!
//! 1. top-level [`DEFAULT_EXPORT`] binding holding a function pointer;
//! 2. top-level [`DEFAULT_EXPORT`] binding holding a map with a
//!    function-typed `enable` member;
//! 3. script function `enable` of arity 1;
//! 4. script function named on [`ENTRY_ALIASES`], arity 1;
//! 5. the script's tail expression evaluating to a function pointer (the
//!    module itself is directly callable).
//!
//! (`default` itself is a reserved word in the script language, so the
//! default-export convention is the `addon` binding.)
//!
//! The retained engine, function-only AST, and scope let the host call back
//! into the module later (disable handles, disable callbacks, click
//! handlers); they are dropped with the module on every exit path.

use std::sync::Arc;

use parking_lot::Mutex;
use rhai::{AST, Dynamic, Engine, FnPtr, Map, Scope};
use thiserror::Error;

/// Name of the top-level binding playing the role of a default export.
pub const DEFAULT_EXPORT: &str = "addon";

/// Conventional entry-function names accepted when no `enable` export or
/// default export is present.
pub const ENTRY_ALIASES: &[&str] = &["activate", "setup", "register"];

/// Errors raised while evaluating a module or calling into it.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Source text failed to parse.
    #[error("compile error: {0}")]
    Compile(String),

    /// Top-level statements failed while evaluating the module.
    #[error("evaluation error: {0}")]
    Eval(String),

    /// A call into the module (entry, disable, callback) failed.
    #[error("script call failed: {0}")]
    Call(String),
}

/// The resolved shape of an addon's entry point.
#[derive(Debug, Clone)]
pub enum EntryPoint {
    /// Default export that is itself a function.
    DefaultFn(FnPtr),
    /// Default export object exposing a function-typed `enable`.
    DefaultEnable(FnPtr),
    /// Named `enable` export.
    NamedEnable,
    /// Named export from the conventional allow-list.
    Conventional(&'static str),
    /// The module itself is directly callable.
    TailCallable(FnPtr),
}

struct ScriptInner {
    engine: Engine,
    /// Function-only clone of the compiled AST: calling back into the module
    /// must not re-run its top-level statements.
    ast: AST,
    scope: Mutex<Scope<'static>>,
}

/// One evaluated addon module.
///
/// Cheap to clone; clones share the engine, AST, and scope. Everything the
/// evaluation produced is owned here and released when the last clone drops.
#[derive(Clone)]
pub struct ScriptModule {
    inner: Arc<ScriptInner>,
}

impl ScriptModule {
    /// Compiles `source` and runs its top-level statements once.
    ///
    /// Returns the module plus the script's tail value, which participates
    /// in entry resolution as shape 5.
    pub fn evaluate(engine: Engine, source: &str) -> Result<(Self, Dynamic), ScriptError> {
        let full = engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        let mut scope = Scope::new();
        let tail: Dynamic = engine
            .eval_ast_with_scope(&mut scope, &full)
            .map_err(|e| ScriptError::Eval(e.to_string()))?;
        let ast = full.clone_functions_only();
        Ok((
            Self {
                inner: Arc::new(ScriptInner {
                    engine,
                    ast,
                    scope: Mutex::new(scope),
                }),
            },
            tail,
        ))
    }

    /// Probes the module's exported surface for an entry point.
    pub fn resolve_entry(&self, tail: &Dynamic) -> Option<EntryPoint> {
        {
            let scope = self.inner.scope.lock();
            if let Some(exported) = scope.get(DEFAULT_EXPORT) {
                let exported = exported.clone();
                if let Some(f) = exported.clone().try_cast::<FnPtr>() {
                    return Some(EntryPoint::DefaultFn(f));
                }
                if let Some(map) = exported.try_cast::<Map>()
                    && let Some(enable) = map.get("enable")
                    && let Some(f) = enable.clone().try_cast::<FnPtr>()
                {
                    return Some(EntryPoint::DefaultEnable(f));
                }
            }
        }

        if self.has_unary_fn("enable") {
            return Some(EntryPoint::NamedEnable);
        }
        for &alias in ENTRY_ALIASES {
            if self.has_unary_fn(alias) {
                return Some(EntryPoint::Conventional(alias));
            }
        }
        if let Some(f) = tail.clone().try_cast::<FnPtr>() {
            return Some(EntryPoint::TailCallable(f));
        }
        None
    }

    /// Invokes the resolved entry with the capability object.
    pub fn invoke_entry(
        &self,
        entry: &EntryPoint,
        capability: impl rhai::Variant + Clone,
    ) -> Result<Dynamic, ScriptError> {
        match entry {
            EntryPoint::DefaultFn(f)
            | EntryPoint::DefaultEnable(f)
            | EntryPoint::TailCallable(f) => f
                .call(&self.inner.engine, &self.inner.ast, (capability,))
                .map_err(|e| ScriptError::Call(e.to_string())),
            EntryPoint::NamedEnable => self.call_fn("enable", capability),
            EntryPoint::Conventional(name) => self.call_fn(name, capability),
        }
    }

    /// Calls a named script function with one argument.
    fn call_fn(
        &self,
        name: &str,
        arg: impl rhai::Variant + Clone,
    ) -> Result<Dynamic, ScriptError> {
        let mut scope = self.inner.scope.lock();
        self.inner
            .engine
            .call_fn(&mut scope, &self.inner.ast, name, (arg,))
            .map_err(|e| ScriptError::Call(e.to_string()))
    }

    /// Calls a stored function pointer with no arguments.
    ///
    /// Used for disable handles, disable callbacks, and click handlers the
    /// addon registered during enable.
    pub fn call_fn_ptr(&self, f: &FnPtr) -> Result<Dynamic, ScriptError> {
        f.call(&self.inner.engine, &self.inner.ast, ())
            .map_err(|e| ScriptError::Call(e.to_string()))
    }

    /// Calls a stored function pointer with one argument.
    ///
    /// Used for event handlers, which receive the event payload.
    pub fn call_fn_ptr_with(&self, f: &FnPtr, arg: Dynamic) -> Result<Dynamic, ScriptError> {
        f.call(&self.inner.engine, &self.inner.ast, (arg,))
            .map_err(|e| ScriptError::Call(e.to_string()))
    }

    fn has_unary_fn(&self, name: &str) -> bool {
        self.inner
            .ast
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == 1)
    }
}

impl std::fmt::Debug for ScriptModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptModule").finish_non_exhaustive()
    }
}

/// Extracts a disable handle from an entry function's return value: a map
/// with a function-typed `disable` member.
pub fn extract_disable(returned: &Dynamic) -> Option<FnPtr> {
    returned
        .clone()
        .try_cast::<Map>()?
        .get("disable")?
        .clone()
        .try_cast::<FnPtr>()
}
