//! The typed client facade.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use protocol_meta::{key_is_valid, Request, Response, ReturnCode, Ttl};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::conn::{Command, CommandKind, Connection};
use crate::value::CacheValue;
use crate::{Config, Error};

/// Result metadata for a completed command, passed to the `on_result` callback.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The command kind.
    pub command: CommandKind,
    /// Latency in nanoseconds (enqueue to response interpreted).
    pub latency_ns: u64,
    /// For GET: `Some(true)` = hit, `Some(false)` = miss. `None` for others.
    pub hit: Option<bool>,
    /// Whether the command succeeded.
    pub success: bool,
}

type Observer = Arc<dyn Fn(&CommandResult) + Send + Sync>;

// -- Instrumentation ---------------------------------------------------------

/// Completion counts and a latency histogram for one wire verb.
#[cfg(feature = "metrics")]
pub struct VerbMetrics {
    /// Requests completed, successfully or not.
    pub completed: u64,
    /// Requests that ended in an error.
    pub failed: u64,
    /// Latency distribution in nanoseconds.
    pub latency: histogram::Histogram,
}

#[cfg(feature = "metrics")]
impl VerbMetrics {
    fn new() -> Self {
        Self {
            completed: 0,
            failed: 0,
            latency: latency_histogram(),
        }
    }
}

/// ~3% buckets up to 2^45 ns, far past any sane request timeout.
#[cfg(feature = "metrics")]
fn latency_histogram() -> histogram::Histogram {
    histogram::Histogram::new(5, 45).expect("static histogram parameters are in range")
}

/// Built-in client statistics, available when the `metrics` feature is
/// enabled. Latency is bucketed by the wire verb a command was sent as,
/// since that is the axis the server's cost varies along. Not registered
/// globally; read them through [`Client::metrics`].
#[cfg(feature = "metrics")]
pub struct ClientMetrics {
    /// `mg` commands: get and touch.
    pub mg: VerbMetrics,
    /// `ms` commands: set, add, replace, append, prepend.
    pub ms: VerbMetrics,
    /// `md` commands: delete.
    pub md: VerbMetrics,
    /// `ma` commands: increment and decrement.
    pub ma: VerbMetrics,
    /// GET hits.
    pub hits: u64,
    /// GET misses.
    pub misses: u64,
}

#[cfg(feature = "metrics")]
impl ClientMetrics {
    fn new() -> Self {
        Self {
            mg: VerbMetrics::new(),
            ms: VerbMetrics::new(),
            md: VerbMetrics::new(),
            ma: VerbMetrics::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn record(&mut self, result: &CommandResult) {
        let verb = match result.command {
            CommandKind::Get | CommandKind::Touch => &mut self.mg,
            CommandKind::Set
            | CommandKind::Add
            | CommandKind::Replace
            | CommandKind::Append
            | CommandKind::Prepend => &mut self.ms,
            CommandKind::Delete => &mut self.md,
            CommandKind::Increment | CommandKind::Decrement => &mut self.ma,
        };
        verb.completed += 1;
        if !result.success {
            verb.failed += 1;
        }
        let _ = verb.latency.increment(result.latency_ns);

        // Hit/miss is a get-only signal, carried in the result rather than
        // inferred from the verb (a touch is also an mg).
        match result.hit {
            Some(true) => self.hits += 1,
            Some(false) => self.misses += 1,
            None => {}
        }
    }
}

// -- Builder -----------------------------------------------------------------

/// Builder for creating a [`Client`] with per-request callbacks and metrics.
pub struct ClientBuilder<T> {
    transport: T,
    config: Config,
    observer: Option<Observer>,
    #[cfg(feature = "metrics")]
    with_metrics: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> ClientBuilder<T> {
    fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            config: config.clone(),
            observer: None,
            #[cfg(feature = "metrics")]
            with_metrics: false,
        }
    }

    /// Register a callback invoked after each command completes.
    pub fn on_result<F: Fn(&CommandResult) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.observer = Some(Arc::new(f));
        self
    }

    /// Enable built-in histogram tracking (requires `metrics` feature).
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self) -> Self {
        self.with_metrics = true;
        self
    }

    /// Build the client and its connection engine.
    pub fn build(self) -> (Client, Connection<T>) {
        let (mut client, conn) = Client::pair(self.transport, &self.config);
        client.observer = self.observer;
        #[cfg(feature = "metrics")]
        if self.with_metrics {
            client.metrics = Some(Arc::new(std::sync::Mutex::new(ClientMetrics::new())));
        }
        (client, conn)
    }
}

// -- Client handle -----------------------------------------------------------

/// A cloneable handle for issuing commands on one connection.
///
/// All key parameters accept `impl AsRef<[u8]>`, so you can pass `&str`,
/// `String`, `&[u8]`, `Vec<u8>`, `Bytes`, etc. Values go through
/// [`CacheValue`]. Every operation suspends until its paired response
/// arrives, or fails with [`Error::ConnectionShutdown`] if the engine stops
/// first. Clones share the connection; requests from a single handle complete
/// in submission order.
#[derive(Clone)]
pub struct Client {
    tx: mpsc::Sender<Command>,
    max_value_size: usize,
    observer: Option<Observer>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<std::sync::Mutex<ClientMetrics>>>,
}

impl Client {
    /// Connect to the configured endpoint.
    ///
    /// Returns the client handle and the connection engine; spawn
    /// [`Connection::run`] to start serving requests.
    pub async fn connect(config: &Config) -> Result<(Client, Connection<TcpStream>), Error> {
        let stream = TcpStream::connect(config.addr()).await?;
        if config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(Self::pair(stream, config))
    }

    /// Create a client over an already-established transport.
    pub fn pair<T: AsyncRead + AsyncWrite + Unpin>(
        transport: T,
        config: &Config,
    ) -> (Client, Connection<T>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let client = Client {
            tx,
            max_value_size: config.max_value_size,
            observer: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        };
        (client, Connection::new(transport, rx))
    }

    /// Create a builder for a client with per-request callbacks.
    pub fn builder<T: AsyncRead + AsyncWrite + Unpin>(
        transport: T,
        config: &Config,
    ) -> ClientBuilder<T> {
        ClientBuilder::new(transport, config)
    }

    /// Lock and return the built-in metrics, if enabled.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<std::sync::MutexGuard<'_, ClientMetrics>> {
        self.metrics
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // -- Operations --------------------------------------------------------

    /// Store a key-value pair unconditionally.
    pub async fn set<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        value: V,
        ttl: Option<Ttl>,
    ) -> Result<(), Error> {
        let start = Instant::now();
        let result = self
            .store(CommandKind::Set, key.as_ref(), &value, ttl)
            .await;
        self.record(CommandKind::Set, start, None, result.is_ok());
        result
    }

    /// Store a key only if it does not already exist.
    /// Fails with [`Error::KeyExists`] otherwise.
    pub async fn add<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        value: V,
        ttl: Option<Ttl>,
    ) -> Result<(), Error> {
        let start = Instant::now();
        let result = self
            .store(CommandKind::Add, key.as_ref(), &value, ttl)
            .await;
        self.record(CommandKind::Add, start, None, result.is_ok());
        result
    }

    /// Store a key only if it already exists.
    /// Fails with [`Error::KeyNotFound`] otherwise.
    pub async fn replace<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        value: V,
        ttl: Option<Ttl>,
    ) -> Result<(), Error> {
        let start = Instant::now();
        let result = self
            .store(CommandKind::Replace, key.as_ref(), &value, ttl)
            .await;
        self.record(CommandKind::Replace, start, None, result.is_ok());
        result
    }

    /// Append data to an existing item's value.
    pub async fn append<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        value: V,
    ) -> Result<(), Error> {
        let start = Instant::now();
        let result = self
            .store(CommandKind::Append, key.as_ref(), &value, None)
            .await;
        self.record(CommandKind::Append, start, None, result.is_ok());
        result
    }

    /// Prepend data to an existing item's value.
    pub async fn prepend<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        value: V,
    ) -> Result<(), Error> {
        let start = Instant::now();
        let result = self
            .store(CommandKind::Prepend, key.as_ref(), &value, None)
            .await;
        self.record(CommandKind::Prepend, start, None, result.is_ok());
        result
    }

    /// Get the value of a key. Returns `None` on cache miss.
    pub async fn get<V: CacheValue>(&self, key: impl AsRef<[u8]>) -> Result<Option<V>, Error> {
        let start = Instant::now();
        let result = async {
            let key = self.checked_key(key.as_ref())?;
            let response = self.execute(CommandKind::Get, Request::get(key)).await?;
            match response.code {
                ReturnCode::Value => {
                    let data = response.value.unwrap_or_default();
                    Ok(Some(V::from_bytes(&data)?))
                }
                // A value-less HD on a get is a miss, same as EN.
                ReturnCode::Stored | ReturnCode::Miss => Ok(None),
                code => Err(Error::UnexpectedReturnCode(code)),
            }
        }
        .await;

        let hit = match &result {
            Ok(Some(_)) => Some(true),
            Ok(None) => Some(false),
            Err(_) => None,
        };
        self.record(CommandKind::Get, start, hit, result.is_ok());
        result
    }

    /// Delete a key. Fails with [`Error::KeyNotFound`] if it was not present.
    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<(), Error> {
        let start = Instant::now();
        let result = async {
            let key = self.checked_key(key.as_ref())?;
            let response = self.execute(CommandKind::Delete, Request::delete(key)).await?;
            match response.code {
                ReturnCode::Stored => Ok(()),
                ReturnCode::NotFound => Err(Error::KeyNotFound),
                code => Err(Error::UnexpectedReturnCode(code)),
            }
        }
        .await;
        self.record(CommandKind::Delete, start, None, result.is_ok());
        result
    }

    /// Update a key's expiry without fetching its value.
    pub async fn touch(&self, key: impl AsRef<[u8]>, ttl: Ttl) -> Result<(), Error> {
        let start = Instant::now();
        let result = async {
            let key = self.checked_key(key.as_ref())?;
            let response = self.execute(CommandKind::Touch, Request::touch(key, ttl)).await?;
            match response.code {
                ReturnCode::Stored => Ok(()),
                ReturnCode::NotFound | ReturnCode::Miss => Err(Error::KeyNotFound),
                code => Err(Error::UnexpectedReturnCode(code)),
            }
        }
        .await;
        self.record(CommandKind::Touch, start, None, result.is_ok());
        result
    }

    /// Increment a numeric value by `delta`, returning the new value.
    pub async fn increment<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
    ) -> Result<V, Error> {
        self.arithmetic(CommandKind::Increment, key.as_ref(), delta, None, None)
            .await
    }

    /// Increment with an initial value to seed when the key is missing, and
    /// an optional TTL for the seeded item.
    pub async fn increment_with<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Ttl>,
    ) -> Result<V, Error> {
        self.arithmetic(CommandKind::Increment, key.as_ref(), delta, initial, ttl)
            .await
    }

    /// Decrement a numeric value by `delta`, returning the new value.
    pub async fn decrement<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
    ) -> Result<V, Error> {
        self.arithmetic(CommandKind::Decrement, key.as_ref(), delta, None, None)
            .await
    }

    /// Decrement with an initial value to seed when the key is missing.
    pub async fn decrement_with<V: CacheValue>(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Ttl>,
    ) -> Result<V, Error> {
        self.arithmetic(CommandKind::Decrement, key.as_ref(), delta, initial, ttl)
            .await
    }

    // -- Plumbing ----------------------------------------------------------

    async fn store<V: CacheValue>(
        &self,
        kind: CommandKind,
        key: &[u8],
        value: &V,
        ttl: Option<Ttl>,
    ) -> Result<(), Error> {
        let key = self.checked_key(key)?;
        let value = self.checked_value(value)?;
        let request = match kind {
            CommandKind::Set => Request::set(key, value, ttl),
            CommandKind::Add => Request::add(key, value, ttl),
            CommandKind::Replace => Request::replace(key, value, ttl),
            CommandKind::Append => Request::append(key, value),
            CommandKind::Prepend => Request::prepend(key, value),
            _ => unreachable!("not a store command"),
        };

        let response = self.execute(kind, request).await?;
        match (kind, response.code) {
            (_, ReturnCode::Stored) => Ok(()),
            (CommandKind::Add, ReturnCode::NotStored) => Err(Error::KeyExists),
            (
                CommandKind::Replace | CommandKind::Append | CommandKind::Prepend,
                ReturnCode::NotStored | ReturnCode::NotFound,
            ) => Err(Error::KeyNotFound),
            (_, code) => Err(Error::UnexpectedReturnCode(code)),
        }
    }

    async fn arithmetic<V: CacheValue>(
        &self,
        kind: CommandKind,
        key: &[u8],
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Ttl>,
    ) -> Result<V, Error> {
        let start = Instant::now();
        let result = async {
            if !V::NUMERIC {
                return Err(Error::TypeMismatch);
            }
            let key = self.checked_key(key)?;
            let request = match kind {
                CommandKind::Increment => Request::increment(key, delta, initial, ttl),
                CommandKind::Decrement => Request::decrement(key, delta, initial, ttl),
                _ => unreachable!("not an arithmetic command"),
            };

            let response = self.execute(kind, request).await?;
            match response.code {
                ReturnCode::Value => {
                    let data = response.value.unwrap_or_default();
                    Ok(V::from_bytes(&data)?)
                }
                ReturnCode::NotStored | ReturnCode::NotFound | ReturnCode::Miss => {
                    Err(Error::KeyNotFound)
                }
                code => Err(Error::UnexpectedReturnCode(code)),
            }
        }
        .await;
        self.record(kind, start, None, result.is_ok());
        result
    }

    /// Enqueue a request and await its paired response.
    async fn execute(&self, kind: CommandKind, request: Request) -> Result<Response, Error> {
        let (done, wait) = oneshot::channel();
        self.tx
            .send(Command {
                kind,
                request,
                done,
            })
            .await
            .map_err(|_| Error::ConnectionShutdown("connection is not running".to_string()))?;

        match wait.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionShutdown(
                "connection task stopped".to_string(),
            )),
        }
    }

    fn checked_key(&self, key: &[u8]) -> Result<Bytes, Error> {
        if !key_is_valid(key) {
            return Err(Error::InvalidKey);
        }
        Ok(Bytes::copy_from_slice(key))
    }

    fn checked_value<V: CacheValue>(&self, value: &V) -> Result<Bytes, Error> {
        let bytes = value.to_bytes();
        if bytes.len() > self.max_value_size {
            return Err(Error::ValueTooLarge {
                limit: self.max_value_size,
            });
        }
        Ok(bytes)
    }

    #[inline]
    fn is_instrumented(&self) -> bool {
        if self.observer.is_some() {
            return true;
        }
        #[cfg(feature = "metrics")]
        if self.metrics.is_some() {
            return true;
        }
        false
    }

    fn record(&self, command: CommandKind, start: Instant, hit: Option<bool>, success: bool) {
        if !self.is_instrumented() {
            return;
        }
        let result = CommandResult {
            command,
            latency_ns: start.elapsed().as_nanos() as u64,
            hit,
            success,
        };
        if let Some(ref observer) = self.observer {
            observer(&result);
        }
        #[cfg(feature = "metrics")]
        if let Some(ref metrics) = self.metrics {
            if let Ok(mut metrics) = metrics.lock() {
                metrics.record(&result);
            }
        }
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    fn completed(command: CommandKind, success: bool, hit: Option<bool>) -> CommandResult {
        CommandResult {
            command,
            latency_ns: 1_000,
            hit,
            success,
        }
    }

    #[test]
    fn metrics_bucket_by_wire_verb() {
        let mut metrics = ClientMetrics::new();
        metrics.record(&completed(CommandKind::Get, true, Some(true)));
        metrics.record(&completed(CommandKind::Get, true, Some(false)));
        metrics.record(&completed(CommandKind::Touch, true, None));
        metrics.record(&completed(CommandKind::Set, true, None));
        metrics.record(&completed(CommandKind::Prepend, false, None));
        metrics.record(&completed(CommandKind::Delete, true, None));
        metrics.record(&completed(CommandKind::Increment, false, None));

        // Touch counts toward mg; the whole set family toward ms.
        assert_eq!(metrics.mg.completed, 3);
        assert_eq!(metrics.mg.failed, 0);
        assert_eq!(metrics.ms.completed, 2);
        assert_eq!(metrics.ms.failed, 1);
        assert_eq!(metrics.md.completed, 1);
        assert_eq!(metrics.ma.completed, 1);
        assert_eq!(metrics.ma.failed, 1);
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }
}
