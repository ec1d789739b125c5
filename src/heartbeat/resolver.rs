use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use tokio::net::lookup_host;

use super::HeartbeatError;

/// Maps a monitored process's logical name to its heartbeat address.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve(&self, name: &str) -> Result<SocketAddr, HeartbeatError>;
}

/// Resolves names through DNS (e.g. container hostnames) on a fixed port.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    port: u16,
}

impl DnsResolver {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait::async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, name: &str) -> Result<SocketAddr, HeartbeatError> {
        let mut addrs = lookup_host((name, self.port))
            .await
            .map_err(|e| HeartbeatError::Unresolvable {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        addrs.next().ok_or_else(|| HeartbeatError::Unresolvable {
            name: name.to_string(),
            reason: "no addresses".to_string(),
        })
    }
}

/// Fixed name table; entries can be changed at runtime.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: RwLock<HashMap<String, SocketAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, addr: SocketAddr) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(name.to_string(), addr);
        }
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(name);
        }
    }
}

#[async_trait::async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, name: &str) -> Result<SocketAddr, HeartbeatError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| HeartbeatError::Unresolvable {
                name: name.to_string(),
                reason: "resolver table poisoned".to_string(),
            })?;

        entries
            .get(name)
            .copied()
            .ok_or_else(|| HeartbeatError::Unresolvable {
                name: name.to_string(),
                reason: "unknown name".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dns_resolver_resolves_ip_literals_on_its_port() {
        let resolver = DnsResolver::new(6000);
        let addr = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addr, "127.0.0.1:6000".parse().unwrap());
    }

    #[tokio::test]
    async fn static_resolver_follows_updates() {
        let resolver = StaticResolver::new();
        assert!(resolver.resolve("w1").await.is_err());

        resolver.insert("w1", "127.0.0.1:7001".parse().unwrap());
        assert_eq!(
            resolver.resolve("w1").await.unwrap(),
            "127.0.0.1:7001".parse().unwrap()
        );

        resolver.remove("w1");
        assert!(matches!(
            resolver.resolve("w1").await,
            Err(HeartbeatError::Unresolvable { .. })
        ));
    }
}
