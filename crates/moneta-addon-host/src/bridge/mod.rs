//! The versioned, grouped Host API facade.
//!
//! Addons never call the application's internal command functions directly:
//! they receive a [`HostApiBridge`], which groups the flat
//! [`HostCommands`] record into the stable per-domain surface (`accounts`,
//! `portfolio`, `activities`, …) an addon programs against. Internals can be
//! rewired freely as long as the flat record keeps the same names.
//!
//! The bridge is per-addon — required, because the [`logger`](LoggerApi)
//! group stamps every line with the owning addon's id. Argument and return
//! shapes pass through unchanged, and command errors propagate unchanged;
//! [`CommandUnavailable`] is the only error the bridge raises itself.

pub mod commands;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

pub use commands::{
    CommandError, CommandFn, CommandFuture, CommandResult, CommandUnavailable, EventHandler,
    HostCommands, HostCommandsBuilder, NavigateFn, QueryClient, SubscribeFn, Unlisten,
};

use commands::{events, names};

struct BridgeInner {
    addon_id: String,
    commands: Arc<HostCommands>,
}

impl BridgeInner {
    async fn invoke(&self, name: &str, args: Value) -> CommandResult<Value> {
        self.commands.invoke(name, args).await
    }
}

/// Per-addon facade over the host command surface.
#[derive(Clone)]
pub struct HostApiBridge {
    inner: Arc<BridgeInner>,
}

impl HostApiBridge {
    /// Builds the facade for one addon over the shared flat record.
    pub fn new(addon_id: impl Into<String>, commands: Arc<HostCommands>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                addon_id: addon_id.into(),
                commands,
            }),
        }
    }

    /// Id of the addon this bridge belongs to.
    pub fn addon_id(&self) -> &str {
        &self.inner.addon_id
    }
}

// ─── Command groups ───────────────────────────────────────────────────────────

/// Generates a command group: a cloneable sub-facade whose methods pass
/// their single optional JSON argument through to the named command.
macro_rules! command_group {
    (
        $(#[$doc:meta])*
        $group:ident via $accessor:ident {
            $( fn $method:ident($($arg:ident)?) => $cmd:expr; )*
        }
    ) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $group {
            inner: Arc<BridgeInner>,
        }

        impl $group {
            $(
                pub async fn $method(&self $(, $arg: Value)?) -> CommandResult<Value> {
                    self.inner.invoke($cmd, command_group!(@args $($arg)?)).await
                }
            )*
        }

        impl HostApiBridge {
            /// Accessor for the group.
            pub fn $accessor(&self) -> $group {
                $group { inner: Arc::clone(&self.inner) }
            }
        }
    };
    (@args) => { Value::Null };
    (@args $arg:ident) => { $arg };
}

command_group! {
    /// Account management.
    AccountsApi via accounts {
        fn get_all() => names::ACCOUNTS_GET_ALL;
        fn create(account) => names::ACCOUNTS_CREATE;
        fn update(account) => names::ACCOUNTS_UPDATE;
    }
}

command_group! {
    /// Holdings, valuations, and income.
    PortfolioApi via portfolio {
        fn get_holdings(query) => names::PORTFOLIO_GET_HOLDINGS;
        fn get_holding(query) => names::PORTFOLIO_GET_HOLDING;
        fn update(payload) => names::PORTFOLIO_UPDATE;
        fn recalculate(payload) => names::PORTFOLIO_RECALCULATE;
        fn get_income_summary() => names::PORTFOLIO_GET_INCOME_SUMMARY;
        fn get_historical_valuations(query) => names::PORTFOLIO_GET_HISTORICAL_VALUATIONS;
        fn get_latest_valuations(query) => names::PORTFOLIO_GET_LATEST_VALUATIONS;
    }
}

command_group! {
    /// Transaction activity, search, and CSV import.
    ActivitiesApi via activities {
        fn get_all() => names::ACTIVITIES_GET_ALL;
        fn search(query) => names::ACTIVITIES_SEARCH;
        fn create(activity) => names::ACTIVITIES_CREATE;
        fn update(activity) => names::ACTIVITIES_UPDATE;
        fn save_many(activities) => names::ACTIVITIES_SAVE_MANY;
        fn import(payload) => names::ACTIVITIES_IMPORT;
        fn check_import(payload) => names::ACTIVITIES_CHECK_IMPORT;
        fn get_import_mapping(query) => names::ACTIVITIES_GET_IMPORT_MAPPING;
        fn save_import_mapping(mapping) => names::ACTIVITIES_SAVE_IMPORT_MAPPING;
    }
}

command_group! {
    /// Market data lookup and synchronisation.
    MarketApi via market {
        fn search_ticker(query) => names::MARKET_SEARCH_TICKER;
        fn sync_history(payload) => names::MARKET_SYNC_HISTORY;
        fn sync(payload) => names::MARKET_SYNC;
        fn get_providers() => names::MARKET_GET_PROVIDERS;
    }
}

command_group! {
    /// Asset profiles and data sources.
    AssetsApi via assets {
        fn get_profile(query) => names::ASSETS_GET_PROFILE;
        fn update_profile(profile) => names::ASSETS_UPDATE_PROFILE;
        fn update_data_source(payload) => names::ASSETS_UPDATE_DATA_SOURCE;
    }
}

command_group! {
    /// Quote updates and history.
    QuotesApi via quotes {
        fn update(quote) => names::QUOTES_UPDATE;
        fn get_history(query) => names::QUOTES_GET_HISTORY;
    }
}

command_group! {
    /// Performance calculations.
    PerformanceApi via performance {
        fn calculate_history(query) => names::PERFORMANCE_CALCULATE_HISTORY;
        fn calculate_summary(query) => names::PERFORMANCE_CALCULATE_SUMMARY;
        fn calculate_accounts_simple(query) => names::PERFORMANCE_CALCULATE_ACCOUNTS_SIMPLE;
    }
}

command_group! {
    /// Exchange rates.
    ExchangeRatesApi via exchange_rates {
        fn get_all() => names::EXCHANGE_RATES_GET_ALL;
        fn update(rate) => names::EXCHANGE_RATES_UPDATE;
        fn add(rate) => names::EXCHANGE_RATES_ADD;
    }
}

command_group! {
    /// Contribution limits.
    ContributionLimitsApi via contribution_limits {
        fn get_all() => names::CONTRIBUTION_LIMITS_GET_ALL;
        fn create(limit) => names::CONTRIBUTION_LIMITS_CREATE;
        fn update(limit) => names::CONTRIBUTION_LIMITS_UPDATE;
        fn calculate_deposits(query) => names::CONTRIBUTION_LIMITS_CALCULATE_DEPOSITS;
    }
}

command_group! {
    /// Savings goals and allocations.
    GoalsApi via goals {
        fn get_all() => names::GOALS_GET_ALL;
        fn create(goal) => names::GOALS_CREATE;
        fn update(goal) => names::GOALS_UPDATE;
        fn update_allocations(allocations) => names::GOALS_UPDATE_ALLOCATIONS;
        fn get_allocations() => names::GOALS_GET_ALLOCATIONS;
    }
}

command_group! {
    /// Application settings and database backup.
    SettingsApi via settings {
        fn get() => names::SETTINGS_GET;
        fn update(settings) => names::SETTINGS_UPDATE;
        fn backup_database() => names::SETTINGS_BACKUP_DATABASE;
    }
}

command_group! {
    /// Native file dialogs.
    FilesApi via files {
        fn open_csv_dialog() => names::FILES_OPEN_CSV_DIALOG;
        fn open_save_dialog(options) => names::FILES_OPEN_SAVE_DIALOG;
    }
}

// ─── Logger group ─────────────────────────────────────────────────────────────

/// Diagnostic logger scoped to one addon.
///
/// Every line is prefixed `[<addonId>]` before delegating to the host
/// logger, so interleaved addon output stays attributable.
#[derive(Clone)]
pub struct LoggerApi {
    inner: Arc<BridgeInner>,
}

impl LoggerApi {
    pub fn error(&self, message: &str) {
        error!("[{}] {}", self.inner.addon_id, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.inner.addon_id, message);
    }

    pub fn info(&self, message: &str) {
        info!("[{}] {}", self.inner.addon_id, message);
    }

    pub fn debug(&self, message: &str) {
        debug!("[{}] {}", self.inner.addon_id, message);
    }

    pub fn trace(&self, message: &str) {
        trace!("[{}] {}", self.inner.addon_id, message);
    }
}

impl HostApiBridge {
    /// Logger scoped to this bridge's addon.
    pub fn logger(&self) -> LoggerApi {
        LoggerApi {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ─── Events group ─────────────────────────────────────────────────────────────

/// Host event stream subscriptions.
///
/// Each subscription returns an unlisten thunk. The bridge does not
/// auto-unregister subscriptions when the addon is disabled — addons are
/// expected to call the thunk from an `on_disable` callback.
#[derive(Clone)]
pub struct EventsApi {
    inner: Arc<BridgeInner>,
}

impl EventsApi {
    /// Subscribes to an event stream by name.
    ///
    /// The typed sub-group methods below are the documented surface; this is
    /// the shared path they and the script bindings go through.
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> CommandResult<Unlisten> {
        self.inner.commands.subscribe(event, handler)
    }
}

macro_rules! event_subgroup {
    (
        $(#[$doc:meta])*
        $group:ident via $accessor:ident {
            $( fn $method:ident => $event:expr; )*
        }
    ) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $group {
            inner: Arc<BridgeInner>,
        }

        impl $group {
            $(
                pub fn $method(&self, handler: EventHandler) -> CommandResult<Unlisten> {
                    self.inner.commands.subscribe($event, handler)
                }
            )*
        }

        impl EventsApi {
            /// Accessor for the event sub-group.
            pub fn $accessor(&self) -> $group {
                $group { inner: Arc::clone(&self.inner) }
            }
        }
    };
}

event_subgroup! {
    /// CSV import drop-zone events.
    ImportEvents via import {
        fn on_drop_hover => events::IMPORT_DROP_HOVER;
        fn on_drop => events::IMPORT_DROP;
        fn on_drop_cancelled => events::IMPORT_DROP_CANCELLED;
    }
}

event_subgroup! {
    /// Portfolio recalculation lifecycle events.
    PortfolioEvents via portfolio {
        fn on_update_start => events::PORTFOLIO_UPDATE_START;
        fn on_update_complete => events::PORTFOLIO_UPDATE_COMPLETE;
        fn on_update_error => events::PORTFOLIO_UPDATE_ERROR;
    }
}

event_subgroup! {
    /// Market synchronisation lifecycle events.
    MarketEvents via market {
        fn on_sync_start => events::MARKET_SYNC_START;
        fn on_sync_complete => events::MARKET_SYNC_COMPLETE;
    }
}

impl HostApiBridge {
    /// Event stream subscriptions.
    pub fn events(&self) -> EventsApi {
        EventsApi {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ─── Navigation group ─────────────────────────────────────────────────────────

/// Host router control.
#[derive(Clone)]
pub struct NavigationApi {
    inner: Arc<BridgeInner>,
}

impl NavigationApi {
    /// Navigates the host UI to `route`.
    pub fn navigate(&self, route: &str) -> CommandResult<()> {
        self.inner.commands.navigate(route)
    }
}

impl HostApiBridge {
    /// Router control.
    pub fn navigation(&self) -> NavigationApi {
        NavigationApi {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ─── Query group ──────────────────────────────────────────────────────────────

/// Host query cache control.
#[derive(Clone)]
pub struct QueryApi {
    inner: Arc<BridgeInner>,
}

impl QueryApi {
    /// The underlying query cache client.
    pub fn get_client(&self) -> CommandResult<Arc<dyn QueryClient>> {
        self.inner.commands.query_client()
    }

    /// Marks the given key (string) or keys (array of strings) stale.
    pub fn invalidate_queries(&self, key_or_keys: Value) -> CommandResult<()> {
        let client = self.inner.commands.query_client()?;
        client.invalidate(&normalize_keys(&key_or_keys));
        Ok(())
    }

    /// Refetches the given key or keys immediately.
    pub fn refetch_queries(&self, key_or_keys: Value) -> CommandResult<()> {
        let client = self.inner.commands.query_client()?;
        client.refetch(&normalize_keys(&key_or_keys));
        Ok(())
    }
}

impl HostApiBridge {
    /// Query cache control.
    pub fn query(&self) -> QueryApi {
        QueryApi {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Accepts a single key or an array of keys, mirroring the addon-facing
/// `keyOrKeys` argument shape.
fn normalize_keys(value: &Value) -> Vec<String> {
    match value {
        Value::String(key) => vec![key.clone()],
        Value::Array(keys) => keys
            .iter()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn bridge_with(commands: HostCommands) -> HostApiBridge {
        HostApiBridge::new("tracker", Arc::new(commands))
    }

    #[tokio::test]
    async fn test_groups_route_to_named_commands() {
        let commands = HostCommands::builder()
            .command(names::PORTFOLIO_GET_HOLDINGS, |args| async move {
                Ok(serde_json::json!({ "echo": args }))
            })
            .build();
        let bridge = bridge_with(commands);

        let query = serde_json::json!({ "accountId": "acc-1" });
        let result = bridge.portfolio().get_holdings(query.clone()).await.unwrap();
        assert_eq!(result["echo"], query);
    }

    #[tokio::test]
    async fn test_unavailable_command_error_names_the_command() {
        let bridge = bridge_with(HostCommands::builder().build());
        let err = bridge.market().get_providers().await.unwrap_err();
        assert!(err.to_string().contains("market.getProviders"));
    }

    #[tokio::test]
    async fn test_event_subscription_returns_unlisten() {
        let listeners: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&listeners);
        let commands = HostCommands::builder()
            .subscribe_fn(Arc::new(move |event, _handler| {
                seen.lock().push(event.to_string());
                Box::new(|| {})
            }))
            .build();
        let bridge = bridge_with(commands);

        let unlisten = bridge
            .events()
            .portfolio()
            .on_update_complete(Arc::new(|_| {}))
            .unwrap();
        unlisten();
        assert_eq!(listeners.lock().as_slice(), ["portfolio:update-complete"]);
    }

    #[tokio::test]
    async fn test_query_invalidate_accepts_key_or_keys() {
        struct RecordingClient(Mutex<Vec<Vec<String>>>);
        impl QueryClient for RecordingClient {
            fn invalidate(&self, keys: &[String]) {
                self.0.lock().push(keys.to_vec());
            }
            fn refetch(&self, _keys: &[String]) {}
        }

        let client = Arc::new(RecordingClient(Mutex::new(Vec::new())));
        let commands = HostCommands::builder().query_client(client.clone()).build();
        let bridge = bridge_with(commands);

        bridge
            .query()
            .invalidate_queries(serde_json::json!("holdings"))
            .unwrap();
        bridge
            .query()
            .invalidate_queries(serde_json::json!(["holdings", "accounts"]))
            .unwrap();

        let calls = client.0.lock();
        assert_eq!(calls[0], vec!["holdings"]);
        assert_eq!(calls[1], vec!["holdings", "accounts"]);
    }
}
