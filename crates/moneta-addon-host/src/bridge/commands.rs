//! The flat record of host command functions.
//!
//! The application's backend command layer hands the addon subsystem a
//! [`HostCommands`] record: a name → async-function map covering every data
//! operation, plus the event-subscribe, navigation, and query-cache hooks.
//! The record is built once at startup and shared by every per-addon
//! [`HostApiBridge`](super::HostApiBridge); the bridge only groups, it never
//! translates arguments or results.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

/// Error type commands raise; passed through to addons unchanged.
pub type CommandError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a host command invocation.
pub type CommandResult<T> = Result<T, CommandError>;

/// Future returned by a host command.
pub type CommandFuture = BoxFuture<'static, CommandResult<Value>>;

/// One internal command function. Arguments and results are opaque JSON.
pub type CommandFn = Arc<dyn Fn(Value) -> CommandFuture + Send + Sync>;

/// Handler for a host event stream subscription.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Thunk that cancels an event subscription.
pub type Unlisten = Box<dyn FnOnce() + Send>;

/// Subscribe function provided by the host's event system.
pub type SubscribeFn = Arc<dyn Fn(&str, EventHandler) -> Unlisten + Send + Sync>;

/// Navigation hook into the host router.
pub type NavigateFn = Arc<dyn Fn(&str) + Send + Sync>;

/// The host's query cache, used to invalidate or refetch cached queries.
pub trait QueryClient: Send + Sync {
    /// Marks the given query keys stale.
    fn invalidate(&self, keys: &[String]);

    /// Refetches the given query keys immediately.
    fn refetch(&self, keys: &[String]);
}

/// The only error the bridge originates itself: the flat record has no
/// function under the requested name.
#[derive(Debug, Clone, Error)]
#[error("host command '{0}' is not available")]
pub struct CommandUnavailable(pub String);

// ─── Command names ────────────────────────────────────────────────────────────

/// Canonical names of the internal command functions, as keyed in the flat
/// record. Grouping in the bridge follows these prefixes.
pub mod names {
    pub const ACCOUNTS_GET_ALL: &str = "accounts.getAll";
    pub const ACCOUNTS_CREATE: &str = "accounts.create";
    pub const ACCOUNTS_UPDATE: &str = "accounts.update";

    pub const PORTFOLIO_GET_HOLDINGS: &str = "portfolio.getHoldings";
    pub const PORTFOLIO_GET_HOLDING: &str = "portfolio.getHolding";
    pub const PORTFOLIO_UPDATE: &str = "portfolio.update";
    pub const PORTFOLIO_RECALCULATE: &str = "portfolio.recalculate";
    pub const PORTFOLIO_GET_INCOME_SUMMARY: &str = "portfolio.getIncomeSummary";
    pub const PORTFOLIO_GET_HISTORICAL_VALUATIONS: &str = "portfolio.getHistoricalValuations";
    pub const PORTFOLIO_GET_LATEST_VALUATIONS: &str = "portfolio.getLatestValuations";

    pub const ACTIVITIES_GET_ALL: &str = "activities.getAll";
    pub const ACTIVITIES_SEARCH: &str = "activities.search";
    pub const ACTIVITIES_CREATE: &str = "activities.create";
    pub const ACTIVITIES_UPDATE: &str = "activities.update";
    pub const ACTIVITIES_SAVE_MANY: &str = "activities.saveMany";
    pub const ACTIVITIES_IMPORT: &str = "activities.import";
    pub const ACTIVITIES_CHECK_IMPORT: &str = "activities.checkImport";
    pub const ACTIVITIES_GET_IMPORT_MAPPING: &str = "activities.getImportMapping";
    pub const ACTIVITIES_SAVE_IMPORT_MAPPING: &str = "activities.saveImportMapping";

    pub const MARKET_SEARCH_TICKER: &str = "market.searchTicker";
    pub const MARKET_SYNC_HISTORY: &str = "market.syncHistory";
    pub const MARKET_SYNC: &str = "market.sync";
    pub const MARKET_GET_PROVIDERS: &str = "market.getProviders";

    pub const ASSETS_GET_PROFILE: &str = "assets.getProfile";
    pub const ASSETS_UPDATE_PROFILE: &str = "assets.updateProfile";
    pub const ASSETS_UPDATE_DATA_SOURCE: &str = "assets.updateDataSource";

    pub const QUOTES_UPDATE: &str = "quotes.update";
    pub const QUOTES_GET_HISTORY: &str = "quotes.getHistory";

    pub const PERFORMANCE_CALCULATE_HISTORY: &str = "performance.calculateHistory";
    pub const PERFORMANCE_CALCULATE_SUMMARY: &str = "performance.calculateSummary";
    pub const PERFORMANCE_CALCULATE_ACCOUNTS_SIMPLE: &str = "performance.calculateAccountsSimple";

    pub const EXCHANGE_RATES_GET_ALL: &str = "exchangeRates.getAll";
    pub const EXCHANGE_RATES_UPDATE: &str = "exchangeRates.update";
    pub const EXCHANGE_RATES_ADD: &str = "exchangeRates.add";

    pub const CONTRIBUTION_LIMITS_GET_ALL: &str = "contributionLimits.getAll";
    pub const CONTRIBUTION_LIMITS_CREATE: &str = "contributionLimits.create";
    pub const CONTRIBUTION_LIMITS_UPDATE: &str = "contributionLimits.update";
    pub const CONTRIBUTION_LIMITS_CALCULATE_DEPOSITS: &str = "contributionLimits.calculateDeposits";

    pub const GOALS_GET_ALL: &str = "goals.getAll";
    pub const GOALS_CREATE: &str = "goals.create";
    pub const GOALS_UPDATE: &str = "goals.update";
    pub const GOALS_UPDATE_ALLOCATIONS: &str = "goals.updateAllocations";
    pub const GOALS_GET_ALLOCATIONS: &str = "goals.getAllocations";

    pub const SETTINGS_GET: &str = "settings.get";
    pub const SETTINGS_UPDATE: &str = "settings.update";
    pub const SETTINGS_BACKUP_DATABASE: &str = "settings.backupDatabase";

    pub const FILES_OPEN_CSV_DIALOG: &str = "files.openCsvDialog";
    pub const FILES_OPEN_SAVE_DIALOG: &str = "files.openSaveDialog";
}

/// Names of the host event streams addons can subscribe to.
pub mod events {
    pub const IMPORT_DROP_HOVER: &str = "import:drop-hover";
    pub const IMPORT_DROP: &str = "import:drop";
    pub const IMPORT_DROP_CANCELLED: &str = "import:drop-cancelled";

    pub const PORTFOLIO_UPDATE_START: &str = "portfolio:update-start";
    pub const PORTFOLIO_UPDATE_COMPLETE: &str = "portfolio:update-complete";
    pub const PORTFOLIO_UPDATE_ERROR: &str = "portfolio:update-error";

    pub const MARKET_SYNC_START: &str = "market:sync-start";
    pub const MARKET_SYNC_COMPLETE: &str = "market:sync-complete";
}

// ─── HostCommands ─────────────────────────────────────────────────────────────

/// The flat record of internal functions the bridge is constructed from.
pub struct HostCommands {
    commands: HashMap<&'static str, CommandFn>,
    subscribe: Option<SubscribeFn>,
    navigate: Option<NavigateFn>,
    query: Option<Arc<dyn QueryClient>>,
}

impl HostCommands {
    /// Starts an empty builder.
    pub fn builder() -> HostCommandsBuilder {
        HostCommandsBuilder::default()
    }

    /// Invokes the command registered under `name`, passing `args` through
    /// unchanged. Errors raised by the command propagate unchanged.
    pub async fn invoke(&self, name: &str, args: Value) -> CommandResult<Value> {
        let command = self
            .commands
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::from(CommandUnavailable(name.to_string())))?;
        command(args).await
    }

    /// Subscribes `handler` to the host event stream `event`.
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> CommandResult<Unlisten> {
        let subscribe = self
            .subscribe
            .as_ref()
            .ok_or_else(|| CommandError::from(CommandUnavailable("events.subscribe".into())))?;
        Ok(subscribe(event, handler))
    }

    /// Navigates the host router to `route`.
    pub fn navigate(&self, route: &str) -> CommandResult<()> {
        let navigate = self
            .navigate
            .as_ref()
            .ok_or_else(|| CommandError::from(CommandUnavailable("navigation.navigate".into())))?;
        navigate(route);
        Ok(())
    }

    /// The host's query cache client.
    pub fn query_client(&self) -> CommandResult<Arc<dyn QueryClient>> {
        self.query
            .clone()
            .ok_or_else(|| CommandError::from(CommandUnavailable("query.getClient".into())))
    }
}

impl std::fmt::Debug for HostCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCommands")
            .field("commands", &self.commands.len())
            .field("has_subscribe", &self.subscribe.is_some())
            .field("has_navigate", &self.navigate.is_some())
            .field("has_query", &self.query.is_some())
            .finish()
    }
}

/// Builder for [`HostCommands`].
#[derive(Default)]
pub struct HostCommandsBuilder {
    commands: HashMap<&'static str, CommandFn>,
    subscribe: Option<SubscribeFn>,
    navigate: Option<NavigateFn>,
    query: Option<Arc<dyn QueryClient>>,
}

impl HostCommandsBuilder {
    /// Registers the async function behind a command name.
    pub fn command<F, Fut>(mut self, name: &'static str, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CommandResult<Value>> + Send + 'static,
    {
        self.commands
            .insert(name, Arc::new(move |args| Box::pin(f(args))));
        self
    }

    /// Registers the event-subscribe hook.
    pub fn subscribe_fn(mut self, f: SubscribeFn) -> Self {
        self.subscribe = Some(f);
        self
    }

    /// Registers the navigation hook.
    pub fn navigate_fn(mut self, f: NavigateFn) -> Self {
        self.navigate = Some(f);
        self
    }

    /// Registers the query cache client.
    pub fn query_client(mut self, client: Arc<dyn QueryClient>) -> Self {
        self.query = Some(client);
        self
    }

    /// Finishes the record.
    pub fn build(self) -> HostCommands {
        HostCommands {
            commands: self.commands,
            subscribe: self.subscribe,
            navigate: self.navigate,
            query: self.query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_passes_args_through() {
        let commands = HostCommands::builder()
            .command(names::ACCOUNTS_CREATE, |args| async move { Ok(args) })
            .build();

        let payload = serde_json::json!({ "name": "Brokerage" });
        let result = commands
            .invoke(names::ACCOUNTS_CREATE, payload.clone())
            .await
            .unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_missing_command_is_unavailable() {
        let commands = HostCommands::builder().build();
        let err = commands
            .invoke(names::ACCOUNTS_GET_ALL, Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("accounts.getAll"));
    }

    #[tokio::test]
    async fn test_command_errors_propagate_unchanged() {
        let commands = HostCommands::builder()
            .command(names::SETTINGS_GET, |_| async {
                Err(CommandError::from("database locked"))
            })
            .build();
        let err = commands
            .invoke(names::SETTINGS_GET, Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "database locked");
    }
}
