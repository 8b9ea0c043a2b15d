//! Capability objects and the script-facing host bindings.
//!
//! [`CapabilityFactory::create`] assembles the single object passed into an
//! addon's entry function: sidebar and router mutators, the disable-callback
//! registrar, a fresh [`HostApiBridge`], and a fresh [`ScopedSecrets`]
//! namespace. The factory never caches — every enable gets a freshly built
//! record, which is what makes secret namespacing and logger prefixing sound.
//! There is no global capability object.
//!
//! This module also owns the rhai side of the contract:
//! [`build_engine`] produces an engine with resource limits for untrusted
//! source and every host type registered, so a script can write
//!
//! ```rhai
//! fn enable(ctx) {
//!     ctx.sidebar.add_item(#{ id: "t1", label: "Track", order: 10 });
//!     ctx.router.add(#{ path: "/track", component: "tracker-page" });
//!     ctx.secrets.set("token", "alpha");
//!     ctx.api.logger.info("enabled");
//!     let unlisten = ctx.api.events.portfolio.on_update_complete(|e| {});
//!     ctx.on_disable(|| unlisten.unlisten());
//!     #{ disable: || {} }
//! }
//! ```
//!
//! Host commands are async; scripts are synchronous. Calls from a script
//! block on the command future — on the multi-thread runtime via
//! `block_in_place`, otherwise on a helper thread — so the runtime is never
//! blocked from inside an async task.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Map, Position};
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::error;

use moneta_addon_core::{
    ComponentRef, ContributionRegistry, DynError, NavItem, RemoveHandle, RouteEntry, ScopedSecrets,
    SecretStore,
};

use crate::bridge::commands::events;
use crate::bridge::{
    CommandResult, EventHandler, HostApiBridge, HostCommands, LoggerApi, NavigationApi, QueryApi,
    Unlisten,
};
use crate::script::ScriptModule;

/// Operation ceiling for a single script evaluation or callback.
const MAX_OPERATIONS: u64 = 5_000_000;

// ─── CapabilityFactory ────────────────────────────────────────────────────────

/// Builds per-addon capability objects.
///
/// Holds the shared collaborators (registry, flat command record, secret
/// store) and stamps out one fresh [`AddonContext`] per enable.
pub struct CapabilityFactory {
    registry: Arc<ContributionRegistry>,
    commands: Arc<HostCommands>,
    secrets: Arc<dyn SecretStore>,
}

impl CapabilityFactory {
    /// Creates a factory over the shared collaborators.
    pub fn new(
        registry: Arc<ContributionRegistry>,
        commands: Arc<HostCommands>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            registry,
            commands,
            secrets,
        }
    }

    /// Builds the capability object for one enable of `addon_id`.
    pub fn create(&self, addon_id: &str, script: ScriptModule) -> AddonContext {
        AddonContext {
            inner: Arc::new(ContextInner {
                addon_id: addon_id.to_string(),
                registry: Arc::clone(&self.registry),
                bridge: HostApiBridge::new(addon_id, Arc::clone(&self.commands)),
                secrets: ScopedSecrets::new(addon_id, Arc::clone(&self.secrets)),
                script,
            }),
        }
    }
}

// ─── AddonContext ─────────────────────────────────────────────────────────────

struct ContextInner {
    addon_id: String,
    registry: Arc<ContributionRegistry>,
    bridge: HostApiBridge,
    secrets: ScopedSecrets,
    script: ScriptModule,
}

/// The capability object passed to an addon's entry function.
#[derive(Clone)]
pub struct AddonContext {
    inner: Arc<ContextInner>,
}

impl AddonContext {
    /// Id of the addon this capability belongs to.
    pub fn addon_id(&self) -> &str {
        &self.inner.addon_id
    }

    /// Sidebar mutator.
    pub fn sidebar(&self) -> SidebarApi {
        SidebarApi { ctx: self.clone() }
    }

    /// Router mutator.
    pub fn router(&self) -> RouterApi {
        RouterApi { ctx: self.clone() }
    }

    /// This addon's Host API bridge.
    pub fn api(&self) -> HostApiBridge {
        self.inner.bridge.clone()
    }

    /// This addon's scoped secret namespace.
    pub fn secrets(&self) -> ScopedSecrets {
        self.inner.secrets.clone()
    }

    /// Registers a callback to run when this addon is disabled.
    pub fn on_disable(
        &self,
        callback: impl FnOnce() -> Result<(), DynError> + Send + 'static,
    ) {
        self.inner
            .registry
            .register_disable(&self.inner.addon_id, Box::new(callback));
    }

    fn on_disable_ptr(&self, f: FnPtr) {
        let script = self.inner.script.clone();
        self.on_disable(move || script.call_fn_ptr(&f).map(|_| ()).map_err(DynError::from));
    }

    fn subscribe_event(
        &self,
        event: &'static str,
        handler: FnPtr,
    ) -> Result<UnlistenHandle, Box<EvalAltResult>> {
        let script = self.inner.script.clone();
        let addon_id = self.inner.addon_id.clone();
        let wrapped: EventHandler = Arc::new(move |payload: Value| {
            let arg = rhai::serde::to_dynamic(payload).unwrap_or(Dynamic::UNIT);
            if let Err(e) = script.call_fn_ptr_with(&handler, arg) {
                error!(addon = %addon_id, error = %e, "Event handler failed");
            }
        });
        let unlisten = self
            .inner
            .bridge
            .events()
            .subscribe(event, wrapped)
            .map_err(into_script_error)?;
        Ok(UnlistenHandle::new(unlisten))
    }
}

impl std::fmt::Debug for AddonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonContext")
            .field("addon_id", &self.inner.addon_id)
            .finish_non_exhaustive()
    }
}

// ─── Capability members ───────────────────────────────────────────────────────

/// Sidebar mutator of the capability object.
#[derive(Clone)]
pub struct SidebarApi {
    ctx: AddonContext,
}

impl SidebarApi {
    /// Adds a nav item owned by this addon; the handle removes it again.
    pub fn add_item(&self, item: NavItem) -> RemoveHandle {
        self.ctx
            .inner
            .registry
            .add_sidebar_item(&self.ctx.inner.addon_id, item)
    }
}

/// Router mutator of the capability object.
#[derive(Clone)]
pub struct RouterApi {
    ctx: AddonContext,
}

impl RouterApi {
    /// Registers a route owned by this addon.
    pub fn add(&self, entry: RouteEntry) {
        self.ctx
            .inner
            .registry
            .add_route(&self.ctx.inner.addon_id, entry);
    }
}

/// Script-side handle for a sidebar item.
#[derive(Clone)]
pub struct SidebarItemHandle {
    handle: RemoveHandle,
}

/// Script-side handle for an event subscription.
///
/// Clones share the underlying thunk; the first `unlisten` wins.
#[derive(Clone)]
pub struct UnlistenHandle {
    inner: Arc<Mutex<Option<Unlisten>>>,
}

impl UnlistenHandle {
    fn new(unlisten: Unlisten) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(unlisten))),
        }
    }

    /// Cancels the subscription. Safe to call more than once.
    pub fn unlisten(&self) {
        if let Some(unlisten) = self.inner.lock().take() {
            unlisten();
        }
    }
}

/// Script-side root of the grouped host API (`ctx.api`).
///
/// Wraps the bridge rather than exposing it directly so the event groups can
/// reach the evaluated module when wrapping script handlers.
#[derive(Clone)]
pub struct ScriptHostApi {
    ctx: AddonContext,
}

#[derive(Clone)]
struct EventsRoot {
    ctx: AddonContext,
}

#[derive(Clone)]
struct ImportEventsRoot {
    ctx: AddonContext,
}

#[derive(Clone)]
struct PortfolioEventsRoot {
    ctx: AddonContext,
}

#[derive(Clone)]
struct MarketEventsRoot {
    ctx: AddonContext,
}

// ─── Blocking shim ────────────────────────────────────────────────────────────

/// Runs an async host command to completion from synchronous script code.
///
/// Inside the multi-thread runtime this parks the worker via
/// `block_in_place`; inside a current-thread runtime the future is driven
/// from a helper thread; outside any runtime a local executor suffices.
pub(crate) fn block_on_host<T, F>(fut: F) -> CommandResult<T>
where
    F: Future<Output = CommandResult<T>> + Send,
    T: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(fut))
        }
        Ok(handle) => std::thread::scope(|s| {
            s.spawn(move || handle.block_on(fut))
                .join()
                .unwrap_or_else(|_| Err("host command panicked".into()))
        }),
        Err(_) => futures::executor::block_on(fut),
    }
}

fn block_on_script(
    fut: impl Future<Output = CommandResult<Value>> + Send,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let value = block_on_host(fut).map_err(into_script_error)?;
    rhai::serde::to_dynamic(value)
}

fn into_script_error(e: impl std::fmt::Display) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        e.to_string().into(),
        Position::NONE,
    ))
}

/// Converts a script value to pass-through JSON; values JSON cannot express
/// (function pointers, custom types) degrade to their display form.
fn dynamic_to_value(d: &Dynamic) -> Value {
    rhai::serde::from_dynamic::<Value>(d).unwrap_or_else(|_| Value::String(d.to_string()))
}

fn map_string(map: &Map, key: &str) -> Option<String> {
    map.get(key).and_then(|d| d.clone().into_string().ok())
}

fn nav_item_from_map(ctx: &AddonContext, cfg: Map) -> Result<NavItem, Box<EvalAltResult>> {
    let id = map_string(&cfg, "id")
        .ok_or_else(|| into_script_error("sidebar item requires a string 'id'"))?;
    let label = map_string(&cfg, "label")
        .ok_or_else(|| into_script_error("sidebar item requires a string 'label'"))?;
    let mut item = NavItem::new(id, label);
    item.icon = map_string(&cfg, "icon");
    item.route = map_string(&cfg, "route");
    if let Some(order) = cfg.get("order") {
        item.order = order
            .as_int()
            .map_err(|_| into_script_error("sidebar item 'order' must be an integer"))?
            as i32;
    }
    if let Some(on_click) = cfg.get("on_click").or_else(|| cfg.get("onClick"))
        && let Some(f) = on_click.clone().try_cast::<FnPtr>()
    {
        let script = ctx.inner.script.clone();
        let addon_id = ctx.inner.addon_id.clone();
        item.on_click = Some(Arc::new(move || {
            if let Err(e) = script.call_fn_ptr(&f) {
                error!(addon = %addon_id, error = %e, "Nav item click handler failed");
            }
        }));
    }
    Ok(item)
}

fn route_from_map(cfg: Map) -> Result<RouteEntry, Box<EvalAltResult>> {
    let path = map_string(&cfg, "path")
        .ok_or_else(|| into_script_error("route requires a string 'path'"))?;
    let component = cfg
        .get("component")
        .map(dynamic_to_value)
        .unwrap_or(Value::Null);
    Ok(RouteEntry {
        path,
        component: ComponentRef(component),
    })
}

// ─── Engine construction ──────────────────────────────────────────────────────

/// Builds a script engine for one addon load: resource limits for untrusted
/// source, plus every host type registered.
pub fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(64, 32);
    register_host_types(&mut engine);
    engine
}

/// Registers a bridge command group for script use. The method table mirrors
/// the group definitions in [`crate::bridge`].
macro_rules! register_group {
    ($engine:ident, $ty:ty, $type_name:literal, { $( $name:literal => $method:ident($($arg:ident)?); )* }) => {
        $engine.register_type_with_name::<$ty>($type_name);
        $( register_group!(@method $engine, $ty, $name, $method $(, $arg)?); )*
    };
    (@method $engine:ident, $ty:ty, $name:literal, $method:ident) => {
        $engine.register_fn($name, |api: &mut $ty| -> Result<Dynamic, Box<EvalAltResult>> {
            let api = api.clone();
            block_on_script(async move { api.$method().await })
        });
    };
    (@method $engine:ident, $ty:ty, $name:literal, $method:ident, $arg:ident) => {
        $engine.register_fn($name, |api: &mut $ty, $arg: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            let api = api.clone();
            let $arg = dynamic_to_value(&$arg);
            block_on_script(async move { api.$method($arg).await })
        });
    };
}

macro_rules! register_event_group {
    ($engine:ident, $ty:ty, $type_name:literal, { $( $name:literal => $event:expr; )* }) => {
        $engine.register_type_with_name::<$ty>($type_name);
        $(
            $engine.register_fn($name, |g: &mut $ty, handler: FnPtr| -> Result<UnlistenHandle, Box<EvalAltResult>> {
                g.ctx.subscribe_event($event, handler)
            });
        )*
    };
}

fn register_host_types(engine: &mut Engine) {
    use crate::bridge::{
        AccountsApi, ActivitiesApi, AssetsApi, ContributionLimitsApi, ExchangeRatesApi, FilesApi,
        GoalsApi, MarketApi, PerformanceApi, PortfolioApi, QuotesApi, SettingsApi,
    };

    // ── Capability object ────────────────────────────────────────────────
    engine
        .register_type_with_name::<AddonContext>("AddonContext")
        .register_get("id", |ctx: &mut AddonContext| ctx.inner.addon_id.clone())
        .register_get("sidebar", |ctx: &mut AddonContext| ctx.sidebar())
        .register_get("router", |ctx: &mut AddonContext| ctx.router())
        .register_get("secrets", |ctx: &mut AddonContext| ctx.secrets())
        .register_get("api", |ctx: &mut AddonContext| ScriptHostApi {
            ctx: ctx.clone(),
        })
        .register_fn("on_disable", |ctx: &mut AddonContext, f: FnPtr| {
            ctx.on_disable_ptr(f)
        });

    engine
        .register_type_with_name::<SidebarApi>("Sidebar")
        .register_fn(
            "add_item",
            |sidebar: &mut SidebarApi,
             cfg: Map|
             -> Result<SidebarItemHandle, Box<EvalAltResult>> {
                let item = nav_item_from_map(&sidebar.ctx, cfg)?;
                Ok(SidebarItemHandle {
                    handle: sidebar.add_item(item),
                })
            },
        );

    engine
        .register_type_with_name::<SidebarItemHandle>("SidebarItemHandle")
        .register_fn("remove", |handle: &mut SidebarItemHandle| {
            handle.handle.remove()
        });

    engine
        .register_type_with_name::<RouterApi>("Router")
        .register_fn(
            "add",
            |router: &mut RouterApi, cfg: Map| -> Result<(), Box<EvalAltResult>> {
                router.add(route_from_map(cfg)?);
                Ok(())
            },
        );

    engine
        .register_type_with_name::<ScopedSecrets>("Secrets")
        .register_fn(
            "set",
            |secrets: &mut ScopedSecrets, key: &str, value: &str| -> Result<(), Box<EvalAltResult>> {
                secrets.set(key, value).map_err(into_script_error)
            },
        )
        .register_fn(
            "get",
            |secrets: &mut ScopedSecrets, key: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                match secrets.get(key).map_err(into_script_error)? {
                    Some(value) => Ok(value.into()),
                    None => Ok(Dynamic::UNIT),
                }
            },
        )
        .register_fn(
            "delete",
            |secrets: &mut ScopedSecrets, key: &str| -> Result<(), Box<EvalAltResult>> {
                secrets.delete(key).map_err(into_script_error)
            },
        );

    // ── Host API root ────────────────────────────────────────────────────
    engine
        .register_type_with_name::<ScriptHostApi>("HostApi")
        .register_get("accounts", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.accounts()
        })
        .register_get("portfolio", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.portfolio()
        })
        .register_get("activities", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.activities()
        })
        .register_get("market", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.market()
        })
        .register_get("assets", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.assets()
        })
        .register_get("quotes", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.quotes()
        })
        .register_get("performance", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.performance()
        })
        .register_get("exchange_rates", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.exchange_rates()
        })
        .register_get("contribution_limits", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.contribution_limits()
        })
        .register_get("goals", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.goals()
        })
        .register_get("settings", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.settings()
        })
        .register_get("files", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.files()
        })
        .register_get("logger", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.logger()
        })
        .register_get("navigation", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.navigation()
        })
        .register_get("query", |api: &mut ScriptHostApi| {
            api.ctx.inner.bridge.query()
        })
        .register_get("events", |api: &mut ScriptHostApi| EventsRoot {
            ctx: api.ctx.clone(),
        });

    // ── Command groups ───────────────────────────────────────────────────
    register_group!(engine, AccountsApi, "AccountsApi", {
        "get_all" => get_all();
        "create" => create(payload);
        "update" => update(payload);
    });
    register_group!(engine, PortfolioApi, "PortfolioApi", {
        "get_holdings" => get_holdings(payload);
        "get_holding" => get_holding(payload);
        "update" => update(payload);
        "recalculate" => recalculate(payload);
        "get_income_summary" => get_income_summary();
        "get_historical_valuations" => get_historical_valuations(payload);
        "get_latest_valuations" => get_latest_valuations(payload);
    });
    // `import` is a reserved word in scripts, so the binding carries the
    // `_activities` suffix.
    register_group!(engine, ActivitiesApi, "ActivitiesApi", {
        "get_all" => get_all();
        "search" => search(payload);
        "create" => create(payload);
        "update" => update(payload);
        "save_many" => save_many(payload);
        "import_activities" => import(payload);
        "check_import" => check_import(payload);
        "get_import_mapping" => get_import_mapping(payload);
        "save_import_mapping" => save_import_mapping(payload);
    });
    // `sync` is a reserved word in scripts, hence `sync_market`.
    register_group!(engine, MarketApi, "MarketApi", {
        "search_ticker" => search_ticker(payload);
        "sync_history" => sync_history(payload);
        "sync_market" => sync(payload);
        "get_providers" => get_providers();
    });
    register_group!(engine, AssetsApi, "AssetsApi", {
        "get_profile" => get_profile(payload);
        "update_profile" => update_profile(payload);
        "update_data_source" => update_data_source(payload);
    });
    register_group!(engine, QuotesApi, "QuotesApi", {
        "update" => update(payload);
        "get_history" => get_history(payload);
    });
    register_group!(engine, PerformanceApi, "PerformanceApi", {
        "calculate_history" => calculate_history(payload);
        "calculate_summary" => calculate_summary(payload);
        "calculate_accounts_simple" => calculate_accounts_simple(payload);
    });
    register_group!(engine, ExchangeRatesApi, "ExchangeRatesApi", {
        "get_all" => get_all();
        "update" => update(payload);
        "add" => add(payload);
    });
    register_group!(engine, ContributionLimitsApi, "ContributionLimitsApi", {
        "get_all" => get_all();
        "create" => create(payload);
        "update" => update(payload);
        "calculate_deposits" => calculate_deposits(payload);
    });
    register_group!(engine, GoalsApi, "GoalsApi", {
        "get_all" => get_all();
        "create" => create(payload);
        "update" => update(payload);
        "update_allocations" => update_allocations(payload);
        "get_allocations" => get_allocations();
    });
    register_group!(engine, SettingsApi, "SettingsApi", {
        "get" => get();
        "update" => update(payload);
        "backup_database" => backup_database();
    });
    register_group!(engine, FilesApi, "FilesApi", {
        "open_csv_dialog" => open_csv_dialog();
        "open_save_dialog" => open_save_dialog(payload);
    });

    // ── Logger ───────────────────────────────────────────────────────────
    engine
        .register_type_with_name::<LoggerApi>("Logger")
        .register_fn("error", |l: &mut LoggerApi, msg: &str| l.error(msg))
        .register_fn("warn", |l: &mut LoggerApi, msg: &str| l.warn(msg))
        .register_fn("info", |l: &mut LoggerApi, msg: &str| l.info(msg))
        .register_fn("debug", |l: &mut LoggerApi, msg: &str| l.debug(msg))
        .register_fn("trace", |l: &mut LoggerApi, msg: &str| l.trace(msg));

    // ── Navigation / query ───────────────────────────────────────────────
    engine
        .register_type_with_name::<NavigationApi>("Navigation")
        .register_fn(
            "navigate",
            |nav: &mut NavigationApi, route: &str| -> Result<(), Box<EvalAltResult>> {
                nav.navigate(route).map_err(into_script_error)
            },
        );

    engine
        .register_type_with_name::<QueryApi>("Query")
        .register_fn(
            "invalidate_queries",
            |query: &mut QueryApi, keys: Dynamic| -> Result<(), Box<EvalAltResult>> {
                query
                    .invalidate_queries(dynamic_to_value(&keys))
                    .map_err(into_script_error)
            },
        )
        .register_fn(
            "refetch_queries",
            |query: &mut QueryApi, keys: Dynamic| -> Result<(), Box<EvalAltResult>> {
                query
                    .refetch_queries(dynamic_to_value(&keys))
                    .map_err(into_script_error)
            },
        );

    // ── Events ───────────────────────────────────────────────────────────
    // `import` is a keyword in scripts, so the group is exposed as
    // `imports`.
    engine
        .register_type_with_name::<EventsRoot>("Events")
        .register_get("imports", |e: &mut EventsRoot| ImportEventsRoot {
            ctx: e.ctx.clone(),
        })
        .register_get("portfolio", |e: &mut EventsRoot| PortfolioEventsRoot {
            ctx: e.ctx.clone(),
        })
        .register_get("market", |e: &mut EventsRoot| MarketEventsRoot {
            ctx: e.ctx.clone(),
        });

    register_event_group!(engine, ImportEventsRoot, "ImportEvents", {
        "on_drop_hover" => events::IMPORT_DROP_HOVER;
        "on_drop" => events::IMPORT_DROP;
        "on_drop_cancelled" => events::IMPORT_DROP_CANCELLED;
    });
    register_event_group!(engine, PortfolioEventsRoot, "PortfolioEvents", {
        "on_update_start" => events::PORTFOLIO_UPDATE_START;
        "on_update_complete" => events::PORTFOLIO_UPDATE_COMPLETE;
        "on_update_error" => events::PORTFOLIO_UPDATE_ERROR;
    });
    register_event_group!(engine, MarketEventsRoot, "MarketEvents", {
        "on_sync_start" => events::MARKET_SYNC_START;
        "on_sync_complete" => events::MARKET_SYNC_COMPLETE;
    });

    engine
        .register_type_with_name::<UnlistenHandle>("Unlisten")
        .register_fn("unlisten", |u: &mut UnlistenHandle| u.unlisten());
}
