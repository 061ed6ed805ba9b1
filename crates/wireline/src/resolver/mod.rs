//! Name resolution with a static hosts table and a TTL cache.
//!
//! Lookup precedence: static table, then unexpired cache entries, then DNS.
//! Only the DNS step touches the network, and it runs outside the table
//! lock, so concurrent lookups never serialize behind a slow query.
//! Duplicate in-flight lookups for the same name are allowed to fan out;
//! whichever answer lands last wins the cache slot.

mod hosts;

pub use hosts::parse_hosts;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use parking_lot::Mutex;

use crate::address::Address;
use crate::error::{NetError, Result};

/// Default lifetime of a cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    addresses: Vec<Address>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Tables {
    static_names: HashMap<String, Vec<Address>>,
    cache: HashMap<String, CacheEntry>,
}

/// A caching resolver backed by DNS.
///
/// Cheap to clone; clones share the tables and the underlying resolver.
#[derive(Clone)]
pub struct Resolver {
    resolver: TokioResolver,
    ttl: Option<Duration>,
    tables: Arc<Mutex<Tables>>,
}

impl Resolver {
    /// Create a resolver with the default cache TTL.
    pub fn new() -> Self {
        Self::with_cache_ttl(Some(DEFAULT_CACHE_TTL))
    }

    /// Create a resolver with a custom cache TTL. `None` caches forever.
    pub fn with_cache_ttl(ttl: Option<Duration>) -> Self {
        let resolver = hickory_resolver::Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();
        Self {
            resolver,
            ttl,
            tables: Arc::new(Mutex::new(Tables::default())),
        }
    }

    /// Look `name` up in the static table only. Never resolves.
    pub fn lookup_sync(&self, name: &str) -> Option<Vec<Address>> {
        self.tables
            .lock()
            .static_names
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// Resolve `name` to addresses: static table, then cache, then DNS.
    pub async fn lookup(&self, name: &str) -> Result<Vec<Address>> {
        let key = name.to_ascii_lowercase();

        if let Some(found) = self.lookup_local(&key) {
            return Ok(found);
        }

        // DNS runs outside the lock.
        let addresses = self.query(name).await?;
        self.store(&key, addresses.clone());
        Ok(addresses)
    }

    /// Resolve on a background task, delivering the outcome to `callback`.
    pub fn lookup_async<F>(&self, name: &str, callback: F)
    where
        F: FnOnce(Result<Vec<Address>>) + Send + 'static,
    {
        let resolver = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            callback(resolver.lookup(&name).await);
        });
    }

    /// Replace the static table with the contents of a hosts file.
    ///
    /// All-or-nothing: a parse failure leaves the previous table intact.
    pub fn load_static_hosts(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let table = parse_hosts(&text)?;
        tracing::debug!(target: "wireline::resolver", names = table.len(), "static hosts loaded");
        self.tables.lock().static_names = table;
        Ok(())
    }

    /// Drop every cached DNS answer. The static table is untouched.
    pub fn clear_cache(&self) {
        self.tables.lock().cache.clear();
    }

    fn lookup_local(&self, key: &str) -> Option<Vec<Address>> {
        let mut tables = self.tables.lock();
        if let Some(found) = tables.static_names.get(key) {
            return Some(found.clone());
        }
        match tables.cache.get(key) {
            Some(entry) if entry.expires_at.is_none_or(|at| at > Instant::now()) => {
                Some(entry.addresses.clone())
            }
            Some(_) => {
                tables.cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: &str, addresses: Vec<Address>) {
        let entry = CacheEntry {
            addresses,
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.tables.lock().cache.insert(key.to_string(), entry);
    }

    async fn query(&self, name: &str) -> Result<Vec<Address>> {
        // Literals never hit DNS.
        if let Ok(address) = Address::parse(name, None, None) {
            return Ok(vec![address]);
        }

        let response = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|e| NetError::Resolution {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let addresses: BTreeSet<Address> = response
            .iter()
            .map(|ip| Address::new(ip, None))
            .collect();

        if addresses.is_empty() {
            return Err(NetError::Resolution {
                name: name.to_string(),
                message: "no addresses found".to_string(),
            });
        }
        Ok(addresses.into_iter().collect())
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("Resolver")
            .field("ttl", &self.ttl)
            .field("static_names", &tables.static_names.len())
            .field("cached", &tables.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_static(resolver: &Resolver, name: &str, addresses: Vec<Address>) {
        resolver
            .tables
            .lock()
            .static_names
            .insert(name.to_string(), addresses);
    }

    #[tokio::test]
    async fn static_entries_win_over_cache_and_dns() {
        let resolver = Resolver::new();
        let pinned: Address = "10.9.9.9".parse().unwrap();
        seed_static(&resolver, "service.internal", vec![pinned]);
        // A conflicting cache entry is shadowed.
        resolver.store("service.internal", vec!["10.0.0.1".parse().unwrap()]);

        assert_eq!(
            resolver.lookup("service.internal").await.unwrap(),
            vec![pinned]
        );
        assert_eq!(resolver.lookup_sync("service.internal"), Some(vec![pinned]));
    }

    #[tokio::test]
    async fn lookup_sync_never_resolves() {
        let resolver = Resolver::new();
        // A literal would resolve trivially, but the static table is empty.
        assert_eq!(resolver.lookup_sync("127.0.0.1"), None);
        assert_eq!(resolver.lookup_sync("nothing.example"), None);
    }

    #[tokio::test]
    async fn literals_short_circuit_dns() {
        let resolver = Resolver::new();
        let found = resolver.lookup("192.0.2.1:80").await.unwrap();
        assert_eq!(found, vec!["192.0.2.1:80".parse().unwrap()]);
    }

    #[tokio::test]
    async fn expired_cache_entries_are_ignored_and_evicted() {
        let resolver = Resolver::with_cache_ttl(Some(Duration::ZERO));
        resolver.store("stale.example", vec!["10.0.0.1".parse().unwrap()]);
        assert_eq!(resolver.lookup_local("stale.example"), None);
        assert!(resolver.tables.lock().cache.is_empty());
    }

    #[tokio::test]
    async fn unexpired_and_forever_entries_are_served() {
        let resolver = Resolver::with_cache_ttl(Some(Duration::from_secs(300)));
        let addr: Address = "10.0.0.2".parse().unwrap();
        resolver.store("fresh.example", vec![addr]);
        assert_eq!(resolver.lookup_local("fresh.example"), Some(vec![addr]));

        let forever = Resolver::with_cache_ttl(None);
        forever.store("pinned.example", vec![addr]);
        assert_eq!(forever.lookup_local("pinned.example"), Some(vec![addr]));

        forever.clear_cache();
        assert_eq!(forever.lookup_local("pinned.example"), None);
    }

    #[tokio::test]
    async fn load_static_hosts_is_atomic() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("hosts.good");
        std::fs::write(&good, "127.0.0.1 localhost\n10.0.0.1 service\n").unwrap();
        let bad = dir.path().join("hosts.bad");
        std::fs::write(&bad, "127.0.0.1 localhost\nbogus line\n").unwrap();

        let resolver = Resolver::new();
        resolver.load_static_hosts(&good).unwrap();
        assert!(resolver.lookup_sync("service").is_some());

        // The failed load leaves the previous table in place.
        assert!(resolver.load_static_hosts(&bad).is_err());
        assert!(resolver.lookup_sync("service").is_some());
        assert_eq!(
            resolver.lookup_sync("localhost"),
            Some(vec!["127.0.0.1".parse().unwrap()])
        );
    }
}
