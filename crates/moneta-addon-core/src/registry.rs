//! Registry of dynamic UI contributions.
//!
//! [`ContributionRegistry`] is the authoritative store of everything addons
//! contribute to the host shell: sidebar navigation items, routes, and the
//! disable callbacks to run when their owner is torn down. The host UI has
//! exactly one sidebar and one route table, so the registry is process-wide —
//! but it is an explicitly owned object handed to the loader and dev manager
//! at construction time, not a module-level singleton.
//!
//! # Ownership
//!
//! The registry exclusively owns its collections. External subscribers
//! observe through [`snapshot`](ContributionRegistry::snapshot) copies and
//! never mutate. Disable callbacks are owned by the registry for the lifetime
//! of their addon; on teardown, ownership transfers to the invoker, which
//! calls each once and drops it.
//!
//! # Notifications
//!
//! Subscribers are invoked synchronously after every effective mutation:
//! one notification per `add_sidebar_item`, per effective `RemoveHandle`
//! use, and per `add_route`. Teardown paths coalesce — removing all of an
//! addon's contributions emits exactly one notification, and
//! [`teardown_all`](ContributionRegistry::teardown_all) emits one for the
//! whole sweep. Callbacks run with no registry lock held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::DynError;

/// Sidebar position assigned when an addon does not choose one.
pub const DEFAULT_NAV_ORDER: i32 = 999;

// ─── Contribution types ───────────────────────────────────────────────────────

/// Handler invoked when a nav item without a route is clicked.
pub type ClickHandler = Arc<dyn Fn() + Send + Sync>;

/// Callback registered by an addon to run when it is disabled.
///
/// Invoked at most once; errors are logged and swallowed so one failing
/// callback cannot block its siblings.
pub type DisableCallback = Box<dyn FnOnce() -> Result<(), DynError> + Send>;

/// A sidebar navigation item contributed by an addon.
#[derive(Clone)]
pub struct NavItem {
    /// Addon-chosen identifier, unique within the owning addon.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Opaque icon reference the UI layer resolves.
    pub icon: Option<String>,
    /// Route to navigate to on click, if the item is route-backed.
    pub route: Option<String>,
    /// Click handler, for items that act instead of navigating.
    pub on_click: Option<ClickHandler>,
    /// Sort key; lower values render first. Ties keep insertion order.
    pub order: i32,
}

impl NavItem {
    /// Creates an item with the default order and no icon, route, or handler.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            icon: None,
            route: None,
            on_click: None,
            order: DEFAULT_NAV_ORDER,
        }
    }
}

impl std::fmt::Debug for NavItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavItem")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("icon", &self.icon)
            .field("route", &self.route)
            .field("order", &self.order)
            .field("has_click_handler", &self.on_click.is_some())
            .finish()
    }
}

/// Opaque, lazily-resolved reference to a UI component.
///
/// The registry stores whatever the addon supplied; the UI layer interprets
/// it when the route is first rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentRef(pub serde_json::Value);

/// A route contributed by an addon.
#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    /// Author-chosen path, expected unique across addons.
    pub path: String,
    /// Component rendered at the path.
    pub component: ComponentRef,
}

// ─── Snapshot types ───────────────────────────────────────────────────────────

/// Copy of one nav item plus owner metadata, for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct NavItemSnapshot {
    /// Id of the contributing addon.
    pub owner: String,
    /// Addon-chosen item id.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Opaque icon reference.
    pub icon: Option<String>,
    /// Route, for route-backed items.
    pub route: Option<String>,
    /// Sort key.
    pub order: i32,
}

/// Copy of one route plus owner metadata.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSnapshot {
    /// Id of the contributing addon.
    pub owner: String,
    /// Route path.
    pub path: String,
    /// Opaque component reference.
    pub component: ComponentRef,
}

/// Consistent copy of the registry for the UI layer.
///
/// Nav items are sorted by `order` ascending, ties in insertion order.
/// Subscribers never observe torn state: the snapshot is built under the
/// state lock and handed out by value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    /// Sorted nav items.
    pub nav_items: Vec<NavItemSnapshot>,
    /// Routes in registration order.
    pub routes: Vec<RouteSnapshot>,
}

impl RegistrySnapshot {
    /// Returns the nav item with the given addon-chosen id, if present.
    pub fn nav_item(&self, id: &str) -> Option<&NavItemSnapshot> {
        self.nav_items.iter().find(|i| i.id == id)
    }

    /// Returns the route registered at `path`, if present.
    pub fn route(&self, path: &str) -> Option<&RouteSnapshot> {
        self.routes.iter().find(|r| r.path == path)
    }
}

/// Counts of live contributions, for logs and the debug surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistryStats {
    /// Number of live nav items.
    pub nav_items: usize,
    /// Number of live routes.
    pub routes: usize,
    /// Number of pending disable callbacks.
    pub disable_callbacks: usize,
}

impl std::fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nav item(s), {} route(s), {} disable callback(s)",
            self.nav_items, self.routes, self.disable_callbacks
        )
    }
}

// ─── Internal state ───────────────────────────────────────────────────────────

struct NavEntry {
    owner: String,
    seq: u64,
    item: NavItem,
}

struct RouteOwned {
    owner: String,
    entry: RouteEntry,
}

#[derive(Default)]
struct RegistryState {
    nav_items: Vec<NavEntry>,
    routes: Vec<RouteOwned>,
    disable_callbacks: HashMap<String, Vec<DisableCallback>>,
    next_seq: u64,
}

type SubscriberFn = Arc<dyn Fn() + Send + Sync>;

// ─── ContributionRegistry ─────────────────────────────────────────────────────

/// Process-wide store of addon UI contributions.
///
/// All mutation goes through the registry's own methods; locks are held only
/// across non-async critical sections and are always released before
/// subscriber callbacks run.
#[derive(Default)]
pub struct ContributionRegistry {
    state: Mutex<RegistryState>,
    subscribers: Mutex<Vec<(u64, SubscriberFn)>>,
    next_subscriber: AtomicU64,
}

impl ContributionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Mutations ───────────────────────────────────────────────────────────

    /// Inserts a nav item owned by `addon_id` and notifies subscribers.
    ///
    /// The returned handle removes the item again; a second invocation is a
    /// no-op.
    pub fn add_sidebar_item(self: &Arc<Self>, addon_id: &str, item: NavItem) -> RemoveHandle {
        let seq = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.nav_items.push(NavEntry {
                owner: addon_id.to_string(),
                seq,
                item,
            });
            seq
        };
        debug!(addon = %addon_id, "Sidebar item added");
        self.notify();
        RemoveHandle {
            inner: Arc::new(RemoveInner {
                registry: Arc::downgrade(self),
                seq,
                removed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a route owned by `addon_id` and notifies subscribers.
    ///
    /// A later registration for the same path replaces the earlier one,
    /// including when the owners differ; ownership of the path moves to the
    /// later addon.
    pub fn add_route(&self, addon_id: &str, entry: RouteEntry) {
        {
            let mut state = self.state.lock();
            let owned = RouteOwned {
                owner: addon_id.to_string(),
                entry,
            };
            if let Some(existing) = state
                .routes
                .iter_mut()
                .find(|r| r.entry.path == owned.entry.path)
            {
                debug!(addon = %addon_id, path = %owned.entry.path, "Route replaced");
                *existing = owned;
            } else {
                debug!(addon = %addon_id, path = %owned.entry.path, "Route added");
                state.routes.push(owned);
            }
        }
        self.notify();
    }

    /// Appends a disable callback to `addon_id`'s list. No notification.
    pub fn register_disable(&self, addon_id: &str, callback: DisableCallback) {
        self.state
            .lock()
            .disable_callbacks
            .entry(addon_id.to_string())
            .or_default()
            .push(callback);
    }

    fn remove_nav_entry(&self, seq: u64) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.nav_items.len();
            state.nav_items.retain(|e| e.seq != seq);
            state.nav_items.len() != before
        };
        if removed {
            self.notify();
        }
    }

    // ─── Teardown ────────────────────────────────────────────────────────────

    /// Removes every trace of `addon_id`, in order: run its disable
    /// callbacks (each error logged and swallowed), delete its nav items
    /// and routes, then emit one notification.
    pub fn teardown_addon(&self, addon_id: &str) {
        let callbacks = self
            .state
            .lock()
            .disable_callbacks
            .remove(addon_id)
            .unwrap_or_default();
        run_disable_callbacks(addon_id, callbacks);

        {
            let mut state = self.state.lock();
            state.nav_items.retain(|e| e.owner != addon_id);
            state.routes.retain(|r| r.owner != addon_id);
            // A callback may have re-registered during the sweep; the
            // no-orphans invariant wins.
            state.disable_callbacks.remove(addon_id);
        }
        debug!(addon = %addon_id, "Contributions removed");
        self.notify();
    }

    /// Tears down every known addon, emitting exactly one notification at
    /// the end.
    pub fn teardown_all(&self) {
        let drained: Vec<(String, Vec<DisableCallback>)> = {
            let mut state = self.state.lock();
            state.nav_items.clear();
            state.routes.clear();
            state.disable_callbacks.drain().collect()
        };
        for (addon_id, callbacks) in drained {
            run_disable_callbacks(&addon_id, callbacks);
        }
        self.state.lock().disable_callbacks.clear();
        self.notify();
    }

    // ─── Observation ─────────────────────────────────────────────────────────

    /// Adds a subscriber invoked synchronously on every subsequent mutation.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        Subscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    /// Emits a notification without a mutation.
    ///
    /// Used by the dev manager after a hot reload so navigation observers
    /// refresh even when the reloaded addon registered identical items.
    pub fn publish(&self) {
        self.notify();
    }

    /// Returns a consistent copy of the registry for rendering.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        let mut nav_items: Vec<NavItemSnapshot> = state
            .nav_items
            .iter()
            .map(|e| NavItemSnapshot {
                owner: e.owner.clone(),
                id: e.item.id.clone(),
                label: e.item.label.clone(),
                icon: e.item.icon.clone(),
                route: e.item.route.clone(),
                order: e.item.order,
            })
            .collect();
        // Entries are kept in insertion order, so the stable sort preserves
        // it for equal orders.
        nav_items.sort_by_key(|i| i.order);
        let routes = state
            .routes
            .iter()
            .map(|r| RouteSnapshot {
                owner: r.owner.clone(),
                path: r.entry.path.clone(),
                component: r.entry.component.clone(),
            })
            .collect();
        RegistrySnapshot { nav_items, routes }
    }

    /// Current contribution counts.
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            nav_items: state.nav_items.len(),
            routes: state.routes.len(),
            disable_callbacks: state.disable_callbacks.values().map(Vec::len).sum(),
        }
    }

    fn notify(&self) {
        let callbacks: Vec<SubscriberFn> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }
}

fn run_disable_callbacks(addon_id: &str, callbacks: Vec<DisableCallback>) {
    for callback in callbacks {
        if let Err(e) = callback() {
            error!(addon = %addon_id, error = %e, "Disable callback failed");
        }
    }
}

// ─── Handles ──────────────────────────────────────────────────────────────────

struct RemoveInner {
    registry: Weak<ContributionRegistry>,
    seq: u64,
    removed: AtomicBool,
}

/// Idempotent handle to remove a previously added sidebar item.
///
/// Clones share the idempotency flag: the first `remove` across all clones
/// takes effect, the rest are no-ops.
#[derive(Clone)]
pub struct RemoveHandle {
    inner: Arc<RemoveInner>,
}

impl RemoveHandle {
    /// Removes the item. Safe to call more than once.
    pub fn remove(&self) {
        if self.inner.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove_nav_entry(self.inner.seq);
        }
    }
}

/// Handle to an active subscription.
pub struct Subscription {
    registry: Weak<ContributionRegistry>,
    id: u64,
}

impl Subscription {
    /// Stops further notifications to the callback.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> Arc<ContributionRegistry> {
        Arc::new(ContributionRegistry::new())
    }

    fn item(id: &str, order: i32) -> NavItem {
        let mut item = NavItem::new(id, format!("label-{id}"));
        item.order = order;
        item
    }

    fn route(path: &str) -> RouteEntry {
        RouteEntry {
            path: path.to_string(),
            component: ComponentRef(serde_json::json!({ "page": path })),
        }
    }

    #[test]
    fn test_nav_items_sorted_by_order_then_insertion() {
        let reg = registry();
        reg.add_sidebar_item("a", item("late", 20));
        reg.add_sidebar_item("a", item("first", 10));
        reg.add_sidebar_item("b", item("tied", 10));

        let snapshot = reg.snapshot();
        let ids: Vec<&str> = snapshot.nav_items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "tied", "late"]);
    }

    #[test]
    fn test_default_order_applies() {
        let reg = registry();
        reg.add_sidebar_item("a", NavItem::new("n", "N"));
        assert_eq!(reg.snapshot().nav_items[0].order, DEFAULT_NAV_ORDER);
    }

    #[test]
    fn test_remove_handle_is_idempotent() {
        let reg = registry();
        let notifications = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&notifications);
        let _sub = reg.subscribe(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let handle = reg.add_sidebar_item("a", item("n", 1));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        handle.remove();
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
        assert!(reg.snapshot().nav_items.is_empty());

        // Second removal changes nothing and notifies nobody.
        handle.remove();
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_handle_clone_shares_flag() {
        let reg = registry();
        let notifications = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&notifications);
        let _sub = reg.subscribe(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let handle = reg.add_sidebar_item("a", item("n", 1));
        let clone = handle.clone();
        handle.remove();
        clone.remove();
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_route_same_path_replaces() {
        let reg = registry();
        reg.add_route("a", route("/track"));
        reg.add_route("b", route("/track"));

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.routes.len(), 1);
        assert_eq!(snapshot.routes[0].owner, "b");
    }

    #[test]
    fn test_route_replacement_moves_ownership_for_teardown() {
        let reg = registry();
        reg.add_route("a", route("/track"));
        reg.add_route("b", route("/track"));

        // The original owner's teardown no longer touches the path.
        reg.teardown_addon("a");
        assert!(reg.snapshot().route("/track").is_some());

        reg.teardown_addon("b");
        assert!(reg.snapshot().route("/track").is_none());
    }

    #[test]
    fn test_teardown_removes_everything_and_notifies_once() {
        let reg = registry();
        reg.add_sidebar_item("tracker", item("t1", 10));
        reg.add_route("tracker", route("/track"));
        reg.add_sidebar_item("other", item("o1", 5));

        let notifications = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&notifications);
        let _sub = reg.subscribe(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        reg.teardown_addon("tracker");
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        let snapshot = reg.snapshot();
        assert!(snapshot.nav_item("t1").is_none());
        assert!(snapshot.route("/track").is_none());
        assert!(snapshot.nav_item("o1").is_some());
    }

    #[test]
    fn test_disable_callbacks_run_once_with_error_isolation() {
        let reg = registry();
        let invoked = Arc::new(AtomicUsize::new(0));

        reg.register_disable(
            "x",
            Box::new(|| Err("first callback failed".to_string().into())),
        );
        let count = Arc::clone(&invoked);
        reg.register_disable(
            "x",
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        reg.teardown_addon("x");
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(reg.stats().disable_callbacks, 0);

        // Callbacks were drained: a second teardown cannot re-run them.
        reg.teardown_addon("x");
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_all_notifies_once() {
        let reg = registry();
        reg.add_sidebar_item("a", item("a1", 1));
        reg.add_sidebar_item("b", item("b1", 2));
        reg.add_route("b", route("/b"));
        reg.register_disable("a", Box::new(|| Ok(())));

        let notifications = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&notifications);
        let _sub = reg.subscribe(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        reg.teardown_all();
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        let stats = reg.stats();
        assert_eq!(stats.nav_items, 0);
        assert_eq!(stats.routes, 0);
        assert_eq!(stats.disable_callbacks, 0);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let reg = registry();
        let notifications = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&notifications);
        let sub = reg.subscribe(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        reg.add_sidebar_item("a", item("n1", 1));
        sub.unsubscribe();
        reg.add_sidebar_item("a", item("n2", 2));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let reg = registry();
        let notifications = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&notifications);
        let _sub = reg.subscribe(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        reg.publish();
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Add { owner: usize, order: i32 },
        RemoveLast { owner: usize },
        AddRoute { owner: usize, path: u8 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, -5i32..5).prop_map(|(owner, order)| Op::Add { owner, order }),
            (0usize..3).prop_map(|owner| Op::RemoveLast { owner }),
            (0usize..3, 0u8..4).prop_map(|(owner, path)| Op::AddRoute { owner, path }),
        ]
    }

    fn owner_name(owner: usize) -> String {
        format!("addon-{owner}")
    }

    proptest! {
        /// After tearing an addon down, no contribution of that addon
        /// survives, regardless of the add/remove sequence that preceded it.
        #[test]
        fn teardown_leaves_no_orphans(ops in prop::collection::vec(op_strategy(), 0..40), victim in 0usize..3) {
            let reg = Arc::new(ContributionRegistry::new());
            let mut handles: Vec<Vec<RemoveHandle>> = vec![Vec::new(), Vec::new(), Vec::new()];

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Add { owner, order } => {
                        let mut item = NavItem::new(format!("n{i}"), "n");
                        item.order = order;
                        handles[owner].push(reg.add_sidebar_item(&owner_name(owner), item));
                    }
                    Op::RemoveLast { owner } => {
                        if let Some(handle) = handles[owner].pop() {
                            handle.remove();
                        }
                    }
                    Op::AddRoute { owner, path } => {
                        reg.add_route(&owner_name(owner), RouteEntry {
                            path: format!("/p{path}"),
                            component: ComponentRef(serde_json::Value::Null),
                        });
                    }
                }
            }

            let victim_name = owner_name(victim);
            reg.teardown_addon(&victim_name);
            let snapshot = reg.snapshot();
            prop_assert!(snapshot.nav_items.iter().all(|i| i.owner != victim_name));
            prop_assert!(snapshot.routes.iter().all(|r| r.owner != victim_name));
        }

        /// The snapshot is always sorted by order, with insertion order
        /// preserved for ties.
        #[test]
        fn snapshot_is_stably_sorted(orders in prop::collection::vec(-10i32..10, 0..30)) {
            let reg = Arc::new(ContributionRegistry::new());
            for (i, order) in orders.iter().enumerate() {
                let mut item = NavItem::new(format!("n{i}"), "n");
                item.order = *order;
                reg.add_sidebar_item("a", item);
            }

            let snapshot = reg.snapshot();
            for pair in snapshot.nav_items.windows(2) {
                prop_assert!(pair[0].order <= pair[1].order);
                if pair[0].order == pair[1].order {
                    // Ids encode insertion order.
                    let a: usize = pair[0].id[1..].parse().unwrap();
                    let b: usize = pair[1].id[1..].parse().unwrap();
                    prop_assert!(a < b);
                }
            }
        }
    }
}
