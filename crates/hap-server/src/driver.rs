//! The accessory driver: glues together the attribute database, the TCP
//! session loops, event fan-out, persistence and mDNS advertisement.
//!
//! One task runs per active TCP session. A single update-pump task applies
//! server-originated value changes from accessory handlers. The
//! advertisement is refreshed whenever the pairing state or topology
//! changes.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hap_accessory::{AccessoryDatabase, AccessoryContext, ValueUpdate};
use hap_core::error::Result;
use hap_core::{HapStatus, DEFAULT_PORT};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::advertise::{AdvertisedInfo, Advertiser};
use crate::events::{EventRegistry, SessionId, SessionMessage};
use crate::handlers::ConnectionHandler;
use crate::http;
use crate::pairing::PairSetupShared;
use crate::setup;
use crate::state::ServerState;
use crate::transport::SessionCrypto;

/// Window within which repeated updates to one characteristic coalesce.
const EVENT_COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Socket read chunk size.
const READ_CHUNK: usize = 4096;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// TCP port; 0 binds an ephemeral port.
    pub port: u16,
    /// Path of the persisted state file.
    pub persist_path: PathBuf,
    /// Fixed pincode (`NNN-NN-NNN`); generated when absent.
    pub pincode: Option<String>,
    /// Fixed device id; generated when absent.
    pub mac: Option<String>,
    /// Addresses to advertise; autodetected when empty.
    pub advertised_addresses: Vec<IpAddr>,
    /// Disable to run without an mDNS announcement (tests).
    pub advertise: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            persist_path: PathBuf::from("accessory_state.json"),
            pincode: None,
            mac: None,
            advertised_addresses: Vec::new(),
            advertise: true,
        }
    }
}

/// Shared driver internals.
pub(crate) struct DriverInner {
    pub(crate) config: DriverConfig,
    pub(crate) db: RwLock<AccessoryDatabase>,
    pub(crate) state: Mutex<ServerState>,
    pub(crate) events: EventRegistry,
    pub(crate) pair_setup: Mutex<PairSetupShared>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) updates_tx: mpsc::UnboundedSender<ValueUpdate>,
    advertiser: Mutex<Option<Advertiser>>,
}

impl DriverInner {
    pub(crate) async fn persist_state(&self, state: &ServerState) {
        if let Err(e) = state.persist(&self.config.persist_path) {
            error!("failed to persist server state: {e}");
        }
    }

    /// Apply a controller write: coerce, commit, run the setter hook and
    /// fan out events excluding the originator.
    pub(crate) async fn client_update_value(
        &self,
        aid: u64,
        iid: u64,
        value: &Value,
        session: SessionId,
    ) -> (HapStatus, Option<Value>) {
        let (committed, handler) = {
            let mut db = self.db.write().await;
            let handler = db.get(aid).and_then(|a| a.handler());
            let Some(characteristic) = db.get_characteristic_mut(aid, iid) else {
                return (HapStatus::ResourceDoesNotExist, None);
            };
            if !characteristic.has_perm(hap_accessory::Perm::PairWrite) {
                return (HapStatus::NotPermitted, None);
            }
            match characteristic.coerce(value, hap_accessory::CoercionMode::Reject) {
                Ok(committed) => {
                    characteristic.commit(committed.clone());
                    (committed, handler)
                }
                Err(status) => return (status, None),
            }
        };

        if let Some(handler) = handler {
            handler.on_value_set(iid, &committed).await;
        }
        self.events.publish(aid, iid, &committed, Some(session));
        (HapStatus::Success, Some(committed))
    }

    /// Apply a server-originated update from an accessory handler:
    /// clamp-coerce, commit, fan out to every subscriber.
    pub(crate) async fn apply_server_update(&self, update: ValueUpdate) {
        let committed = {
            let mut db = self.db.write().await;
            let Some(characteristic) = db.get_characteristic_mut(update.aid, update.iid) else {
                warn!(
                    "server update for unknown characteristic {}.{}",
                    update.aid, update.iid
                );
                return;
            };
            match characteristic.set_value(&update.value) {
                Ok(committed) => committed,
                Err(e) => {
                    warn!("server update rejected: {e}");
                    return;
                }
            }
        };
        self.events
            .publish(update.aid, update.iid, &committed, None);
    }

    /// Refresh the stored value through the accessory's read hook, then
    /// return the current value.
    pub(crate) async fn read_characteristic_value(
        &self,
        aid: u64,
        iid: u64,
    ) -> (HapStatus, Option<Value>) {
        let handler = {
            let db = self.db.read().await;
            let Some(characteristic) = db.get_characteristic(aid, iid) else {
                return (HapStatus::ResourceDoesNotExist, None);
            };
            if !characteristic.has_perm(hap_accessory::Perm::PairRead) {
                return (HapStatus::NotPermitted, None);
            }
            db.get(aid).and_then(|a| a.handler())
        };

        if let Some(handler) = handler {
            if let Some(fresh) = handler.on_value_get(iid).await {
                let mut db = self.db.write().await;
                if let Some(characteristic) = db.get_characteristic_mut(aid, iid) {
                    if let Err(e) = characteristic.set_value(&fresh) {
                        warn!("read hook produced invalid value: {e}");
                    }
                }
            }
        }

        let db = self.db.read().await;
        let value = db
            .get_characteristic(aid, iid)
            .and_then(|c| c.value().cloned());
        (HapStatus::Success, value)
    }

    /// Re-announce after a pairing or topology change.
    pub(crate) async fn refresh_advertisement(&self) {
        if !self.config.advertise {
            return;
        }
        let info = self.advertised_info().await;
        let mut advertiser = self.advertiser.lock().await;
        if let Some(advertiser) = advertiser.as_mut() {
            if let Err(e) = advertiser.register(&info) {
                error!("failed to refresh mDNS advertisement: {e}");
            }
        }
    }

    async fn advertised_info(&self) -> AdvertisedInfo {
        let (display_name, category) = {
            let db = self.db.read().await;
            let primary = db.primary();
            (primary.display_name().to_string(), primary.category())
        };
        let state = self.state.lock().await;
        let addresses = if self.config.advertised_addresses.is_empty() {
            setup::local_address().into_iter().collect()
        } else {
            self.config.advertised_addresses.clone()
        };
        AdvertisedInfo {
            display_name,
            mac: state.mac().to_string(),
            port: self.config.port,
            category,
            config_version: state.config_version(),
            paired: state.paired(),
            setup_id: state.setup_id().to_string(),
            addresses,
        }
    }
}

/// Cloneable control handle for a running driver.
#[derive(Clone)]
pub struct DriverHandle {
    inner: Arc<DriverInner>,
}

impl DriverHandle {
    /// Request shutdown; `run()` returns after cleanup.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Server-originated value change (same path accessory contexts use).
    pub async fn set_value(&self, aid: u64, iid: u64, value: Value) {
        self.inner
            .apply_server_update(ValueUpdate { aid, iid, value })
            .await;
    }

    /// Note a topology change: recompute the structural hash, bump `c#`
    /// when it moved, persist and re-announce.
    pub async fn config_changed(&self) {
        let hash = {
            let db = self.inner.db.read().await;
            db.structural_hash()
        };
        let changed = {
            let mut state = self.inner.state.lock().await;
            let changed = state.set_accessories_hash(hash);
            if changed {
                self.inner.persist_state(&state).await;
            }
            changed
        };
        if changed {
            self.inner.refresh_advertisement().await;
        }
    }

    /// Wipe the failed pair-setup attempt counter.
    pub async fn reset_pairing_throttle(&self) {
        self.inner.pair_setup.lock().await.reset_throttle();
    }
}

/// The accessory server.
pub struct HapDriver {
    pub(crate) inner: Arc<DriverInner>,
    updates_rx: Option<mpsc::UnboundedReceiver<ValueUpdate>>,
    listener: Option<TcpListener>,
}

impl HapDriver {
    /// Create a driver: loads (or generates) the persisted identity.
    pub fn new(db: AccessoryDatabase, mut config: DriverConfig) -> Result<Self> {
        let state = ServerState::load_or_create(
            &config.persist_path,
            config.pincode.take(),
            config.mac.take(),
        )?;
        let (shutdown, _) = watch::channel(false);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(DriverInner {
            config,
            db: RwLock::new(db),
            state: Mutex::new(state),
            events: EventRegistry::new(),
            pair_setup: Mutex::new(PairSetupShared::new()),
            shutdown,
            updates_tx,
            advertiser: Mutex::new(None),
        });
        Ok(Self {
            inner,
            updates_rx: Some(updates_rx),
            listener: None,
        })
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            inner: self.inner.clone(),
        }
    }

    /// The pincode a controller must enter.
    pub async fn pincode(&self) -> String {
        self.inner.state.lock().await.pincode().to_string()
    }

    /// The `X-HM://` setup payload for QR display.
    pub async fn setup_payload(&self) -> String {
        let category = {
            let db = self.inner.db.read().await;
            db.primary().category()
        };
        let state = self.inner.state.lock().await;
        setup::xhm_uri(category, state.pincode(), state.setup_id())
    }

    /// Bind the TCP listener ahead of `run()`, returning the local
    /// address (useful with port 0).
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.inner.config.port)).await?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Run the server until `DriverHandle::shutdown` is called.
    pub async fn run(mut self) -> Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(("0.0.0.0", self.inner.config.port)).await?,
        };
        let local_addr = listener.local_addr()?;
        info!("HAP server listening on {local_addr}");

        // Reconcile the structural hash so controllers drop stale caches.
        {
            let hash = self.inner.db.read().await.structural_hash();
            let mut state = self.inner.state.lock().await;
            state.set_accessories_hash(hash);
            self.inner.persist_state(&state).await;
        }

        // Announce.
        if self.inner.config.advertise {
            let info = self.inner.advertised_info().await;
            let mut advertiser = Advertiser::new()?;
            advertiser.register(&info)?;
            *self.inner.advertiser.lock().await = Some(advertiser);
        }

        // Start accessory handlers.
        let handlers: Vec<(u64, Arc<dyn hap_accessory::AccessoryHandler>)> = {
            let db = self.inner.db.read().await;
            db.accessories()
                .filter_map(|a| Some((a.aid()?, a.handler()?)))
                .collect()
        };
        for (aid, handler) in &handlers {
            let ctx = AccessoryContext::new(
                *aid,
                self.inner.updates_tx.clone(),
                self.inner.shutdown.subscribe(),
            );
            handler.on_start(ctx).await;
        }

        // Pump server-originated updates into the tree and the event
        // dispatcher.
        let updates_rx = self
            .updates_rx
            .take()
            .expect("driver can only run once");
        let pump_inner = self.inner.clone();
        let mut pump_shutdown = self.inner.shutdown.subscribe();
        let pump = tokio::spawn(async move {
            let mut updates_rx = updates_rx;
            loop {
                tokio::select! {
                    update = updates_rx.recv() => match update {
                        Some(update) => pump_inner.apply_server_update(update).await,
                        None => break,
                    },
                    _ = pump_shutdown.changed() => break,
                }
            }
        });

        // Accept loop.
        let session_counter = AtomicU64::new(1);
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session_id = session_counter.fetch_add(1, Ordering::Relaxed);
                        info!("{peer}: connection made (session {session_id})");
                        let inner = self.inner.clone();
                        tokio::spawn(async move {
                            run_session(inner, stream, peer, session_id).await;
                        });
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("HAP server shutting down");
        for (_aid, handler) in &handlers {
            handler.on_stop().await;
        }
        self.inner.events.close_all();
        pump.abort();
        if let Some(advertiser) = self.inner.advertiser.lock().await.take() {
            advertiser.shutdown();
        }
        Ok(())
    }
}

/// One task per TCP session: reads (optionally encrypted) bytes, parses
/// HTTP requests, dispatches them, and interleaves coalesced EVENT
/// messages on the same stream.
async fn run_session(
    inner: Arc<DriverInner>,
    mut stream: TcpStream,
    peer: SocketAddr,
    session_id: SessionId,
) {
    let mut event_rx = inner.events.register_session(session_id);
    let mut handler = ConnectionHandler::new(inner.clone(), session_id, peer);
    let mut shutdown = inner.shutdown.subscribe();

    let mut crypto: Option<SessionCrypto> = None;
    let mut plaintext: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending: BTreeMap<(u64, u64), Value> = BTreeMap::new();
    let mut flush_at: Option<Instant> = None;

    loop {
        let deadline = flush_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        let has_deadline = flush_at.is_some();

        tokio::select! {
            read = stream.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!("{peer}: read error: {e}");
                        break;
                    }
                };
                if let Some(active) = crypto.as_mut() {
                    active.receive_data(&chunk[..n]);
                    match active.decrypt() {
                        Ok(decrypted) => plaintext.extend_from_slice(&decrypted),
                        Err(e) => {
                            // Do not leak detail to the peer; just drop the
                            // connection.
                            debug!("{peer}: decrypt failed, closing: {e}");
                            break;
                        }
                    }
                } else {
                    plaintext.extend_from_slice(&chunk[..n]);
                }
                if !process_requests(&inner, &mut handler, &mut stream, &mut crypto, &mut plaintext)
                    .await
                {
                    break;
                }
            }
            message = event_rx.recv() => match message {
                Some(SessionMessage::Event { aid, iid, value }) => {
                    pending.insert((aid, iid), value);
                    if flush_at.is_none() {
                        flush_at = Some(Instant::now() + EVENT_COALESCE_WINDOW);
                    }
                }
                Some(SessionMessage::Close) | None => break,
            },
            _ = tokio::time::sleep_until(deadline), if has_deadline => {
                flush_at = None;
                if !flush_events(&inner, session_id, &mut stream, &mut crypto, &mut pending).await {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("{peer}: connection closed (session {session_id})");
    inner.events.connection_lost(session_id);
    inner.pair_setup.lock().await.connection_lost(session_id);
}

/// Parse and dispatch every complete request in the plaintext buffer.
/// Returns false when the connection must close.
async fn process_requests(
    inner: &Arc<DriverInner>,
    handler: &mut ConnectionHandler,
    stream: &mut TcpStream,
    crypto: &mut Option<SessionCrypto>,
    plaintext: &mut Vec<u8>,
) -> bool {
    loop {
        let request = match http::parse_request(plaintext) {
            Ok(Some(request)) => request,
            Ok(None) => return true,
            Err(e) => {
                debug!("malformed request, closing: {e}");
                return false;
            }
        };

        let response = handler.dispatch(&request).await;
        let wire = http::HttpResponse {
            status: response.status,
            reason: response.reason,
            content_type: response.content_type,
            body: response.body.clone(),
        }
        .serialize();
        if write_session(stream, crypto, &wire).await.is_err() {
            return false;
        }

        // The write side switches to encrypted frames only after the M4
        // response bytes went out in plaintext; the read side follows at
        // the same frame boundary on the next received bytes.
        if let Some(shared_secret) = &response.shared_secret {
            match SessionCrypto::accessory(shared_secret) {
                Ok(session_crypto) => *crypto = Some(session_crypto),
                Err(e) => {
                    error!("failed to derive transport keys: {e}");
                    return false;
                }
            }
        }
        if response.pairing_changed {
            let inner = inner.clone();
            tokio::spawn(async move {
                inner.refresh_advertisement().await;
            });
        }
        if response.drop_all_sessions {
            inner.events.close_all();
        }
    }
}

/// Write pending coalesced events that still have an active subscription.
async fn flush_events(
    inner: &Arc<DriverInner>,
    session_id: SessionId,
    stream: &mut TcpStream,
    crypto: &mut Option<SessionCrypto>,
    pending: &mut BTreeMap<(u64, u64), Value>,
) -> bool {
    let entries: Vec<Value> = pending
        .iter()
        .filter(|((aid, iid), _)| inner.events.is_subscribed(session_id, *aid, *iid))
        .map(|((aid, iid), value)| json!({ "aid": aid, "iid": iid, "value": value }))
        .collect();
    pending.clear();
    if entries.is_empty() {
        return true;
    }

    let body = json!({ "characteristics": entries }).to_string();
    let wire = http::event_message(body.as_bytes());
    write_session(stream, crypto, &wire).await.is_ok()
}

/// Write bytes through the session crypto when it is installed.
async fn write_session(
    stream: &mut TcpStream,
    crypto: &mut Option<SessionCrypto>,
    data: &[u8],
) -> std::io::Result<()> {
    match crypto.as_mut() {
        Some(active) => {
            let framed = active.encrypt(data).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
            stream.write_all(&framed).await
        }
        None => stream.write_all(data).await,
    }
}
