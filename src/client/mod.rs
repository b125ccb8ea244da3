// Module: Client pool
// Caches HTTP clients keyed by (timeout, redirect policy); every client
// drawn from one pool shares the pool's cookie jar.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::Client;

/// Redirects are followed through at most this many hops before the
/// client fails the request.
pub const MAX_REDIRECTS: usize = 10;

/// A cache of HTTP clients sharing one cookie jar.
///
/// Clients are keyed by `(timeout_ms, follow_redirects)` and built
/// lazily under a mutex, so concurrent tests with the same settings
/// reuse one transport. With "no follow", the client's redirect policy
/// is `Policy::none()` and a 3xx response is returned to the caller
/// as-is, Location header intact.
pub struct ClientPool {
    jar: Arc<Jar>,
    clients: Mutex<HashMap<(u64, bool), Client>>,
}

impl ClientPool {
    /// A pool with a fresh, empty cookie jar.
    pub fn new() -> ClientPool {
        ClientPool::with_jar(Arc::new(Jar::default()))
    }

    /// A pool sharing the caller's cookie jar.
    pub fn with_jar(jar: Arc<Jar>) -> ClientPool {
        ClientPool {
            jar,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The pool's cookie jar, shared by all its clients.
    pub fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    /// A client with the given timeout and redirect behaviour.
    /// Construction is lazy; clients are cheap to clone and reusable.
    pub fn get(&self, timeout_ms: u64, follow_redirects: bool) -> reqwest::Result<Client> {
        let key = (timeout_ms, follow_redirects);
        let mut clients = self.clients.lock().expect("client pool poisoned");
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let policy = if follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(policy)
            .cookie_provider(Arc::clone(&self.jar))
            .build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        ClientPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_cached_per_key() {
        let pool = ClientPool::new();
        pool.get(2_000, false).unwrap();
        pool.get(2_000, false).unwrap();
        pool.get(2_000, true).unwrap();
        pool.get(5_000, false).unwrap();

        let clients = pool.clients.lock().unwrap();
        assert_eq!(clients.len(), 3);
    }

    #[test]
    fn test_pools_share_their_jar() {
        let jar = Arc::new(Jar::default());
        let pool = ClientPool::with_jar(Arc::clone(&jar));
        assert!(Arc::ptr_eq(&pool.jar(), &jar));
    }
}
