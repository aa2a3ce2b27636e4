//! Per-connection dispatch of HAP operations.
//!
//! A [`ConnectionHandler`] holds everything scoped to one TCP session:
//! its pair-verify state, the verified controller identity, and pending
//! prepared-write tokens. The session loop feeds it parsed requests and
//! writes back the [`HapResponse`], applying the transport upgrade and
//! advertisement side effects the response carries.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hap_core::HapStatus;
use hap_crypto::tlv::{Tlv8, TlvType};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::driver::DriverInner;
use crate::events::SessionId;
use crate::http::{HttpRequest, CONTENT_TYPE_JSON, CONTENT_TYPE_TLV};
use crate::pairing::{error_code, state_num, PairVerify};
use crate::state::PERMISSION_ADMIN;

/// Delay inserted before replying to a failed SRP proof.
const AUTH_FAILURE_DELAY: Duration = Duration::from_secs(1);

/// Deadline for camera snapshot production.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(8);

/// A response plus the session side effects it triggers.
pub struct HapResponse {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
    /// Upgrade the transport to encrypted frames after this response's
    /// bytes have been written in plaintext.
    pub shared_secret: Option<Vec<u8>>,
    /// Refresh the mDNS announcement (pairing added/removed).
    pub pairing_changed: bool,
    /// Close every open session (pairing registry wiped).
    pub drop_all_sessions: bool,
}

impl HapResponse {
    fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            content_type: None,
            body: Vec::new(),
            shared_secret: None,
            pairing_changed: false,
            drop_all_sessions: false,
        }
    }

    fn tlv(tlv: Tlv8) -> Self {
        let mut response = Self::new(200, "OK");
        response.content_type = Some(CONTENT_TYPE_TLV);
        response.body = tlv.encode();
        response
    }

    fn json(status: u16, reason: &'static str, body: &Value) -> Self {
        let mut response = Self::new(status, reason);
        response.content_type = Some(CONTENT_TYPE_JSON);
        response.body = body.to_string().into_bytes();
        response
    }

    fn no_content() -> Self {
        Self::new(204, "No Content")
    }

    fn bad_request() -> Self {
        Self::json(400, "Bad Request", &json!({}))
    }

    /// HAP-defined authorization failure for plain requests before
    /// pair-verify completed.
    fn unauthorized() -> Self {
        Self::json(
            470,
            "Connection Authorization Required",
            &json!({ "status": HapStatus::NotPermitted.code() }),
        )
    }
}

/// Per-characteristic result row of a read or write operation.
struct EntryResult {
    aid: u64,
    iid: u64,
    status: HapStatus,
    value: Option<Value>,
    extra: Map<String, Value>,
}

impl EntryResult {
    fn new(aid: u64, iid: u64, status: HapStatus) -> Self {
        Self {
            aid,
            iid,
            status,
            value: None,
            extra: Map::new(),
        }
    }

    fn to_json(&self, include_status: bool) -> Value {
        let mut map = Map::new();
        map.insert("aid".to_string(), json!(self.aid));
        map.insert("iid".to_string(), json!(self.iid));
        if let Some(value) = &self.value {
            map.insert("value".to_string(), value.clone());
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        if include_status {
            map.insert("status".to_string(), json!(self.status.code()));
        }
        Value::Object(map)
    }
}

/// Dispatch state for one TCP session.
pub struct ConnectionHandler {
    driver: Arc<DriverInner>,
    session_id: SessionId,
    peer: SocketAddr,
    verify: PairVerify,
    encrypted: bool,
    client_username: Option<String>,
    prepared_writes: HashMap<u64, Instant>,
}

impl ConnectionHandler {
    pub fn new(driver: Arc<DriverInner>, session_id: SessionId, peer: SocketAddr) -> Self {
        Self {
            driver,
            session_id,
            peer,
            verify: PairVerify::new(),
            encrypted: false,
            client_username: None,
            prepared_writes: HashMap::new(),
        }
    }

    /// Route one request to its operation.
    pub async fn dispatch(&mut self, request: &HttpRequest) -> HapResponse {
        debug!(
            "{}: {} {} (session {})",
            self.peer, request.method, request.path, self.session_id
        );
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/pair-setup") => self.pair_setup(&request.body).await,
            ("POST", "/pair-verify") => self.pair_verify(&request.body).await,
            ("GET", "/accessories") => self.accessories().await,
            ("GET", "/characteristics") => self.get_characteristics(&request.query).await,
            ("PUT", "/characteristics") => self.put_characteristics(&request.body).await,
            ("PUT", "/prepare") => self.prepare(&request.body).await,
            ("POST", "/pairings") => self.pairings(&request.body).await,
            ("POST", "/identify") => self.identify().await,
            ("POST", "/resource") => self.resource(&request.body).await,
            _ => {
                warn!("{}: unknown endpoint {} {}", self.peer, request.method, request.path);
                HapResponse::bad_request()
            }
        }
    }

    // ### Pairing endpoints ###

    async fn pair_setup(&mut self, body: &[u8]) -> HapResponse {
        let reply = {
            let state = self.driver.state.lock().await;
            let mut setup = self.driver.pair_setup.lock().await;
            setup.handle(self.session_id, body, &state)
        };

        if reply.delay_before_reply {
            // Resist pincode guessing.
            tokio::time::sleep(AUTH_FAILURE_DELAY).await;
        }

        let mut response = HapResponse::tlv(reply.tlv);
        if let Some(pairing) = reply.new_pairing {
            let mut state = self.driver.state.lock().await;
            state.add_paired_client(&pairing.username, pairing.ltpk, PERMISSION_ADMIN);
            if let Err(e) = state.persist(&self.driver.config.persist_path) {
                // Losing the first admin pairing is unrecoverable; take the
                // server down rather than advertise a pairing we cannot keep.
                error!("unable to persist first pairing, shutting down: {e}");
                let _ = self.driver.shutdown.send(true);
                return HapResponse::tlv(Tlv8::error_reply(
                    state_num::M6,
                    error_code::UNKNOWN,
                ));
            }
            debug!("{}: paired with admin {}", self.peer, pairing.username);
            response.pairing_changed = true;
        }
        response
    }

    async fn pair_verify(&mut self, body: &[u8]) -> HapResponse {
        let reply = {
            let state = self.driver.state.lock().await;
            self.verify.handle(body, &state)
        };

        let mut response = HapResponse::tlv(reply.tlv);
        if let Some(shared_secret) = reply.shared_secret {
            debug!(
                "{}: pair verify complete, switching to encrypted transport",
                self.peer
            );
            self.encrypted = true;
            self.client_username = reply.client_username;
            response.shared_secret = Some(shared_secret);
        }
        response
    }

    // ### Attribute endpoints ###

    async fn accessories(&self) -> HapResponse {
        if !self.encrypted {
            return HapResponse::unauthorized();
        }
        let tree = self.driver.db.read().await.to_hap();
        HapResponse::json(200, "OK", &tree)
    }

    async fn get_characteristics(&self, query: &HashMap<String, String>) -> HapResponse {
        if !self.encrypted {
            return HapResponse::unauthorized();
        }
        let Some(ids) = query.get("id") else {
            return HapResponse::bad_request();
        };
        let want_meta = flag(query, "meta");
        let want_perms = flag(query, "perms");
        let want_type = flag(query, "type");
        let want_ev = flag(query, "ev");

        let mut results = Vec::new();
        for id_pair in ids.split(',') {
            let Some((aid, iid)) = parse_char_id(id_pair) else {
                return HapResponse::bad_request();
            };

            let (status, value) = self.driver.read_characteristic_value(aid, iid).await;
            let mut result = EntryResult::new(aid, iid, status);
            if status.is_success() {
                result.value = value;
                self.decorate(&mut result, aid, iid, want_meta, want_perms, want_type, want_ev)
                    .await;
            }
            results.push(result);
        }

        respond_characteristics(&results, true)
    }

    /// Attach requested metadata members to a successful read result.
    async fn decorate(
        &self,
        result: &mut EntryResult,
        aid: u64,
        iid: u64,
        want_meta: bool,
        want_perms: bool,
        want_type: bool,
        want_ev: bool,
    ) {
        if want_ev {
            result.extra.insert(
                "ev".to_string(),
                json!(self.driver.events.is_subscribed(self.session_id, aid, iid)),
            );
        }
        if !(want_meta || want_perms || want_type) {
            return;
        }

        let db = self.driver.db.read().await;
        let Some(characteristic) = db.get_characteristic(aid, iid) else {
            return;
        };
        let rep = characteristic.to_hap();
        if want_perms {
            if let Some(perms) = rep.get("perms") {
                result.extra.insert("perms".to_string(), perms.clone());
            }
        }
        if want_type {
            if let Some(hap_type) = rep.get("type") {
                result.extra.insert("type".to_string(), hap_type.clone());
            }
        }
        if want_meta {
            for key in [
                "format",
                "unit",
                "minValue",
                "maxValue",
                "minStep",
                "maxLen",
                "maxDataLen",
                "valid-values",
                "valid-values-range",
            ] {
                if let Some(value) = rep.get(key) {
                    result.extra.insert(key.to_string(), value.clone());
                }
            }
        }
    }

    async fn put_characteristics(&mut self, body: &[u8]) -> HapResponse {
        if !self.encrypted {
            return HapResponse::unauthorized();
        }
        let Ok(parsed) = serde_json::from_slice::<Value>(body) else {
            return HapResponse::bad_request();
        };
        let Some(entries) = parsed.get("characteristics").and_then(Value::as_array) else {
            return HapResponse::bad_request();
        };

        let mut results: Vec<EntryResult> = Vec::new();

        // Subscription toggles apply before any value writes.
        for entry in entries {
            let (Some(aid), Some(iid)) = (id_of(entry, "aid"), id_of(entry, "iid")) else {
                return HapResponse::bad_request();
            };
            let Some(subscribed) = entry.get("ev").and_then(Value::as_bool) else {
                continue;
            };
            let status = self.toggle_subscription(aid, iid, subscribed).await;
            if !status.is_success() {
                results.push(EntryResult::new(aid, iid, status));
            }
        }

        // A stale or unknown prepared-write id poisons the whole request.
        let pid_valid = match parsed.get("pid").and_then(Value::as_u64) {
            None => true,
            Some(pid) => matches!(
                self.prepared_writes.remove(&pid),
                Some(expiry) if Instant::now() <= expiry
            ),
        };

        for entry in entries {
            let (Some(aid), Some(iid)) = (id_of(entry, "aid"), id_of(entry, "iid")) else {
                return HapResponse::bad_request();
            };
            let Some(value) = entry.get("value") else {
                continue;
            };
            if !pid_valid {
                results.push(EntryResult::new(aid, iid, HapStatus::InvalidPreparedWriteId));
                continue;
            }

            let (status, committed) = self
                .driver
                .client_update_value(aid, iid, value, self.session_id)
                .await;
            let mut result = EntryResult::new(aid, iid, status);

            let write_response = entry.get("r").and_then(Value::as_bool).unwrap_or(false);
            if write_response && status.is_success() {
                let allows = {
                    let db = self.driver.db.read().await;
                    db.get_characteristic(aid, iid)
                        .map(|c| c.has_perm(hap_accessory::Perm::WriteResponse))
                        .unwrap_or(false)
                };
                if allows {
                    result.value = committed;
                }
            }
            results.push(result);
        }

        let all_success = results.iter().all(|r| r.status.is_success());
        let any_value = results.iter().any(|r| r.value.is_some());
        if all_success && !any_value {
            return HapResponse::no_content();
        }
        respond_characteristics(&results, false)
    }

    async fn toggle_subscription(&self, aid: u64, iid: u64, subscribed: bool) -> HapStatus {
        let notify_allowed = {
            let db = self.driver.db.read().await;
            match db.get_characteristic(aid, iid) {
                Some(characteristic) => characteristic.has_perm(hap_accessory::Perm::Notify),
                None => return HapStatus::ResourceDoesNotExist,
            }
        };
        if !notify_allowed {
            return HapStatus::NotPermitted;
        }
        self.driver
            .events
            .subscribe(self.session_id, aid, iid, subscribed);
        HapStatus::Success
    }

    async fn prepare(&mut self, body: &[u8]) -> HapResponse {
        if !self.encrypted {
            return HapResponse::unauthorized();
        }
        let Ok(parsed) = serde_json::from_slice::<Value>(body) else {
            return HapResponse::bad_request();
        };
        let (Some(ttl), Some(pid)) = (
            parsed.get("ttl").and_then(Value::as_u64),
            parsed.get("pid").and_then(Value::as_u64),
        ) else {
            return HapResponse::json(
                200,
                "OK",
                &json!({ "status": HapStatus::InvalidValue.code() }),
            );
        };

        self.prepared_writes
            .insert(pid, Instant::now() + Duration::from_millis(ttl));
        HapResponse::json(200, "OK", &json!({ "status": HapStatus::Success.code() }))
    }

    // ### Pairing management ###

    async fn pairings(&mut self, body: &[u8]) -> HapResponse {
        let Ok(tlv) = Tlv8::parse(body) else {
            return HapResponse::tlv(Tlv8::error_reply(state_num::M2, error_code::UNKNOWN));
        };

        let mut state = self.driver.state.lock().await;
        let admin = self
            .client_username
            .as_deref()
            .map(|username| state.is_admin(username))
            .unwrap_or(false);
        if !self.encrypted || !admin {
            warn!("{}: unauthorized pairings request", self.peer);
            return HapResponse::tlv(Tlv8::error_reply(
                state_num::M2,
                error_code::AUTHENTICATION,
            ));
        }

        match tlv.method() {
            Some(3) => {
                // Add (or update) a pairing.
                let (Some(username_bytes), Some(ltpk_raw)) = (
                    tlv.get(TlvType::Identifier),
                    tlv.get(TlvType::PublicKey),
                ) else {
                    return HapResponse::tlv(Tlv8::error_reply(
                        state_num::M2,
                        error_code::UNKNOWN,
                    ));
                };
                let Ok(ltpk) = <[u8; 32]>::try_from(ltpk_raw) else {
                    return HapResponse::tlv(Tlv8::error_reply(
                        state_num::M2,
                        error_code::UNKNOWN,
                    ));
                };
                let Ok(username) = String::from_utf8(username_bytes.to_vec()) else {
                    return HapResponse::tlv(Tlv8::error_reply(
                        state_num::M2,
                        error_code::UNKNOWN,
                    ));
                };
                let permissions = tlv
                    .get(TlvType::Permissions)
                    .and_then(|p| p.first().copied())
                    .unwrap_or(0);

                debug!("{}: add pairing for {username}", self.peer);
                state.add_paired_client(&username, ltpk, permissions);
                self.driver.persist_state(&state).await;

                let mut reply = Tlv8::new();
                reply.push(TlvType::State, vec![state_num::M2]);
                HapResponse::tlv(reply)
            }
            Some(4) => {
                // Remove a pairing. Removing an unknown controller still
                // reports success; removing an admin wipes the registry.
                let Some(username_bytes) = tlv.get(TlvType::Identifier) else {
                    return HapResponse::tlv(Tlv8::error_reply(
                        state_num::M2,
                        error_code::UNKNOWN,
                    ));
                };
                let username = String::from_utf8_lossy(username_bytes).to_string();
                let was_paired = state.paired();

                debug!("{}: remove pairing for {username}", self.peer);
                if let Some(removed) = state.remove_paired_client(&username) {
                    if removed.is_admin() {
                        state.clear_pairings();
                    }
                }
                self.driver.persist_state(&state).await;

                let mut reply = Tlv8::new();
                reply.push(TlvType::State, vec![state_num::M2]);
                let mut response = HapResponse::tlv(reply);
                if was_paired && !state.paired() {
                    debug!("{}: last pairing removed, dropping sessions", self.peer);
                    response.pairing_changed = true;
                    response.drop_all_sessions = true;
                }
                response
            }
            Some(5) => {
                // List pairings; entries are separated, no trailing
                // separator.
                let mut reply = Tlv8::new();
                reply.push(TlvType::State, vec![state_num::M2]);
                let mut usernames: Vec<&String> = state.paired_clients().keys().collect();
                usernames.sort();
                for (index, username) in usernames.iter().enumerate() {
                    let controller = &state.paired_clients()[*username];
                    if index > 0 {
                        reply.push(TlvType::Separator, Vec::new());
                    }
                    reply.push(TlvType::Identifier, username.as_bytes().to_vec());
                    reply.push(TlvType::PublicKey, controller.ltpk.to_vec());
                    reply.push(TlvType::Permissions, vec![controller.permissions]);
                }
                HapResponse::tlv(reply)
            }
            other => {
                warn!("{}: unknown pairings method {other:?}", self.peer);
                HapResponse::tlv(Tlv8::error_reply(state_num::M2, error_code::UNKNOWN))
            }
        }
    }

    // ### Misc endpoints ###

    async fn identify(&self) -> HapResponse {
        let paired = self.driver.state.lock().await.paired();
        if paired {
            return HapResponse::json(
                400,
                "Bad Request",
                &json!({ "status": HapStatus::NotPermitted.code() }),
            );
        }

        let handler = {
            let db = self.driver.db.read().await;
            db.primary().handler()
        };
        if let Some(handler) = handler {
            handler.identify().await;
        }
        HapResponse::no_content()
    }

    async fn resource(&self, body: &[u8]) -> HapResponse {
        if !self.encrypted {
            return HapResponse::unauthorized();
        }
        let Ok(parsed) = serde_json::from_slice::<Value>(body) else {
            return HapResponse::bad_request();
        };
        let aid = parsed.get("aid").and_then(Value::as_u64).unwrap_or(1);
        let width = parsed
            .get("image-width")
            .and_then(Value::as_u64)
            .unwrap_or(640) as u32;
        let height = parsed
            .get("image-height")
            .and_then(Value::as_u64)
            .unwrap_or(480) as u32;

        let handler = {
            let db = self.driver.db.read().await;
            db.get(aid).and_then(|a| a.handler())
        };
        let Some(handler) = handler else {
            return HapResponse::bad_request();
        };

        match tokio::time::timeout(SNAPSHOT_TIMEOUT, handler.snapshot(width, height)).await {
            Ok(Some(image)) => {
                let mut response = HapResponse::new(200, "OK");
                response.content_type = Some("image/jpeg");
                response.body = image;
                response
            }
            Ok(None) => HapResponse::bad_request(),
            Err(_) => {
                warn!("{}: snapshot timed out", self.peer);
                HapResponse::new(500, "Internal Server Error")
            }
        }
    }
}

/// Build a `/characteristics` response with partial-success semantics:
/// all-success reads reply 200 without per-row status, anything else
/// replies 207 with status on every row.
fn respond_characteristics(results: &[EntryResult], ok_on_success: bool) -> HapResponse {
    let all_success = results.iter().all(|r| r.status.is_success());
    let rows: Vec<Value> = results
        .iter()
        .map(|r| r.to_json(!all_success))
        .collect();
    let body = json!({ "characteristics": rows });
    if all_success && ok_on_success {
        HapResponse::json(200, "OK", &body)
    } else {
        HapResponse::json(207, "Multi-Status", &body)
    }
}

fn flag(query: &HashMap<String, String>, key: &str) -> bool {
    query.get(key).map(|v| v == "1").unwrap_or(false)
}

fn parse_char_id(pair: &str) -> Option<(u64, u64)> {
    let (aid, iid) = pair.split_once('.')?;
    Some((aid.parse().ok()?, iid.parse().ok()?))
}

fn id_of(entry: &Value, key: &str) -> Option<u64> {
    entry.get(key).and_then(Value::as_u64)
}
