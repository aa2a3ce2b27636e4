//! End-to-end exercises against a running server over loopback TCP: a
//! minimal controller implementation pairs, verifies, upgrades to the
//! encrypted transport and drives the HAP operations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hap_accessory::{Accessory, AccessoryDatabase, AccessoryHandler, Loader};
use hap_core::Category;
use hap_crypto::chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string};
use hap_crypto::curve25519::EcdhKeyPair;
use hap_crypto::ed25519::IdentityKeyPair;
use hap_crypto::hkdf::{constants, derive_key_32, derive_pair_setup_key, derive_pair_verify_key};
use hap_crypto::srp::{SrpChallenge, SrpClient, PAIR_SETUP_IDENTITY};
use hap_crypto::tlv::{Tlv8, TlvType};
use hap_server::transport::SessionCrypto;
use hap_server::{DriverConfig, HapDriver};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const PIN: &str = "031-45-154";
const CONTROLLER_ID: &str = "5F7C3A19-8E21-4D6B-B4F2-0C9D8E7A6B5C";
const IO_TIMEOUT: Duration = Duration::from_secs(5);

struct NullHandler;

#[async_trait]
impl AccessoryHandler for NullHandler {}

/// Fixture: a bridge with one lightbulb and one temperature sensor.
/// Returns the database plus the interesting (aid, iid) addresses.
struct Fixture {
    db: AccessoryDatabase,
    light_aid: u64,
    on_iid: u64,
    brightness_iid: u64,
    sensor_aid: u64,
    temperature_iid: u64,
}

fn fixture() -> Fixture {
    let loader = Loader::embedded().unwrap();
    let mut db = AccessoryDatabase::bridge(&loader, "Test Bridge").unwrap();

    let mut light = Accessory::new(&loader, "Test Light", Category::Lightbulb).unwrap();
    light
        .add_preload_service(&loader, "Lightbulb", &["Brightness"])
        .unwrap();
    light.set_handler(Arc::new(NullHandler));
    let on_iid = light.char_iid("Lightbulb", "On").unwrap();
    let brightness_iid = light.char_iid("Lightbulb", "Brightness").unwrap();
    let light_aid = db.add_bridged(light).unwrap();

    let mut sensor = Accessory::new(&loader, "Test Sensor", Category::Sensor).unwrap();
    sensor
        .add_preload_service(&loader, "TemperatureSensor", &[])
        .unwrap();
    let temperature_iid = sensor
        .char_iid("TemperatureSensor", "CurrentTemperature")
        .unwrap();
    let sensor_aid = db.add_bridged(sensor).unwrap();

    Fixture {
        db,
        light_aid,
        on_iid,
        brightness_iid,
        sensor_aid,
        temperature_iid,
    }
}

fn temp_state_path(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "hap-e2e-{tag}-{}-{:x}.json",
        std::process::id(),
        rand_suffix()
    ));
    path
}

fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos() as u64
}

/// A running server plus its control handle.
struct Server {
    addr: std::net::SocketAddr,
    handle: hap_server::driver::DriverHandle,
    state_path: PathBuf,
}

async fn start_server(tag: &str, fixture: Fixture) -> Server {
    let state_path = temp_state_path(tag);
    let config = DriverConfig {
        port: 0,
        persist_path: state_path.clone(),
        pincode: Some(PIN.to_string()),
        mac: None,
        advertised_addresses: Vec::new(),
        advertise: false,
    };
    let mut driver = HapDriver::new(fixture.db, config).unwrap();
    let bound = driver.bind().await.unwrap();
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], bound.port()));
    let handle = driver.handle();
    tokio::spawn(async move {
        let _ = driver.run().await;
    });
    Server {
        addr,
        handle,
        state_path,
    }
}

/// A parsed HTTP-shaped message (HTTP/1.1 response or EVENT/1.0).
#[derive(Debug)]
struct Message {
    protocol: String,
    status: u16,
    body: Vec<u8>,
}

impl Message {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn tlv(&self) -> Tlv8 {
        Tlv8::parse(&self.body).unwrap()
    }
}

/// Minimal controller: one TCP connection, optionally upgraded.
struct Controller {
    stream: TcpStream,
    crypto: Option<SessionCrypto>,
    buffer: Vec<u8>,
    identity: IdentityKeyPair,
}

impl Controller {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self::connect_with_identity(addr, IdentityKeyPair::generate()).await
    }

    async fn connect_with_identity(
        addr: std::net::SocketAddr,
        identity: IdentityKeyPair,
    ) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            crypto: None,
            buffer: Vec::new(),
            identity,
        }
    }

    async fn send_request(
        &mut self,
        method: &str,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) {
        let mut request = format!("{method} {path} HTTP/1.1\r\n");
        if let Some(content_type) = content_type {
            request.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        if !body.is_empty() {
            request.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        request.push_str("\r\n");
        let mut wire = request.into_bytes();
        wire.extend_from_slice(body);

        let wire = match self.crypto.as_mut() {
            Some(crypto) => crypto.encrypt(&wire).unwrap(),
            None => wire,
        };
        self.stream.write_all(&wire).await.unwrap();
    }

    /// Read the next complete message off the stream.
    async fn read_message(&mut self) -> std::io::Result<Message> {
        loop {
            if let Some(message) = self.try_parse()? {
                return Ok(message);
            }
            let mut chunk = [0u8; 4096];
            let n = timeout(IO_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("read timed out")?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed",
                ));
            }
            match self.crypto.as_mut() {
                Some(crypto) => {
                    crypto.receive_data(&chunk[..n]);
                    let plaintext = crypto.decrypt().map_err(|e| {
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                    })?;
                    self.buffer.extend_from_slice(&plaintext);
                }
                None => self.buffer.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn try_parse(&mut self) -> std::io::Result<Option<Message>> {
        let Some(header_end) = self
            .buffer
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
        else {
            return Ok(None);
        };
        let head = String::from_utf8_lossy(&self.buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let status_line = lines.next().unwrap_or_default().to_string();
        let mut parts = status_line.split_whitespace();
        let protocol = parts.next().unwrap_or_default().to_string();
        let status: u16 = parts.next().unwrap_or("0").parse().unwrap_or(0);

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((k, v)) = line.split_once(':') {
                headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
            }
        }
        let content_length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let total = header_end + 4 + content_length;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let body = self.buffer[header_end + 4..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(Message {
            protocol,
            status,
            body,
        }))
    }

    async fn post_tlv(&mut self, path: &str, tlv: &Tlv8) -> Message {
        self.send_request(
            "POST",
            path,
            Some("application/pairing+tlv8"),
            &tlv.encode(),
        )
        .await;
        self.read_message().await.unwrap()
    }

    async fn request_json(
        &mut self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Message {
        let body_bytes = body.map(|b| b.to_string().into_bytes()).unwrap_or_default();
        let content_type = body.map(|_| "application/hap+json");
        self.send_request(method, path, content_type, &body_bytes)
            .await;
        self.read_message().await.unwrap()
    }

    /// Complete pair-setup as a new admin controller.
    async fn pair_setup(&mut self, pin: &str) {
        // M1
        let mut m1 = Tlv8::new();
        m1.push(TlvType::State, vec![0x01]);
        m1.push(TlvType::Method, vec![0x00]);
        let m2 = self.post_tlv("/pair-setup", &m1).await.tlv();
        assert_eq!(m2.error(), None, "M2 carried an error");

        let salt: [u8; 16] = m2.get(TlvType::Salt).unwrap().try_into().unwrap();
        let server_public = m2.get(TlvType::PublicKey).unwrap().to_vec();

        let srp = SrpClient::new(PAIR_SETUP_IDENTITY, pin.as_bytes());
        let proof = srp
            .process_challenge(&SrpChallenge {
                salt,
                server_public_key: server_public,
            })
            .unwrap();

        // M3
        let mut m3 = Tlv8::new();
        m3.push(TlvType::State, vec![0x03]);
        m3.push(TlvType::PublicKey, srp.public_key());
        m3.push(TlvType::Proof, proof.client_proof.clone());
        let m4 = self.post_tlv("/pair-setup", &m3).await.tlv();
        assert_eq!(m4.error(), None, "M4 carried an error (wrong pin?)");
        assert!(srp.verify_server_proof(
            m4.get(TlvType::Proof).unwrap(),
            &proof.expected_server_proof
        ));

        // M5
        let session_key = derive_pair_setup_key(&proof.shared_secret).unwrap();
        let controller_x = derive_key_32(
            &proof.shared_secret,
            constants::PAIR_SETUP_CONTROLLER_SIGN_SALT,
            constants::PAIR_SETUP_CONTROLLER_SIGN_INFO,
        )
        .unwrap();
        let mut material = Vec::new();
        material.extend_from_slice(&controller_x);
        material.extend_from_slice(CONTROLLER_ID.as_bytes());
        material.extend_from_slice(&self.identity.public_key());
        let signature = self.identity.sign(&material);

        let mut inner = Tlv8::new();
        inner.push(TlvType::Identifier, CONTROLLER_ID.as_bytes().to_vec());
        inner.push(TlvType::PublicKey, self.identity.public_key().to_vec());
        inner.push(TlvType::Signature, signature.to_vec());
        let encrypted = encrypt_with_nonce(
            &session_key,
            &nonce_from_string(b"PS-Msg05"),
            &inner.encode(),
        )
        .unwrap();

        let mut m5 = Tlv8::new();
        m5.push(TlvType::State, vec![0x05]);
        m5.push(TlvType::EncryptedData, encrypted);
        let m6 = self.post_tlv("/pair-setup", &m5).await.tlv();
        assert_eq!(m6.error(), None, "M6 carried an error");
        assert!(m6.get(TlvType::EncryptedData).is_some());
    }

    /// Complete pair-verify and upgrade the connection.
    async fn pair_verify(&mut self) {
        let ecdh = EcdhKeyPair::generate();
        let client_public = ecdh.public_key();

        let mut m1 = Tlv8::new();
        m1.push(TlvType::State, vec![0x01]);
        m1.push(TlvType::PublicKey, client_public.to_vec());
        let m2 = self.post_tlv("/pair-verify", &m1).await.tlv();
        assert_eq!(m2.error(), None, "verify M2 carried an error");

        let accessory_public: [u8; 32] =
            m2.get(TlvType::PublicKey).unwrap().try_into().unwrap();
        let shared = ecdh.diffie_hellman(&accessory_public).unwrap();
        let session_key = derive_pair_verify_key(&shared).unwrap();

        // We trust the fixture server; skip the accessory proof check here
        // (covered by the pairing unit tests) and answer M3.
        let mut material = Vec::new();
        material.extend_from_slice(&client_public);
        material.extend_from_slice(CONTROLLER_ID.as_bytes());
        material.extend_from_slice(&accessory_public);
        let proof = self.identity.sign(&material);

        let mut inner = Tlv8::new();
        inner.push(TlvType::Identifier, CONTROLLER_ID.as_bytes().to_vec());
        inner.push(TlvType::Signature, proof.to_vec());
        let encrypted = encrypt_with_nonce(
            &session_key,
            &nonce_from_string(b"PV-Msg03"),
            &inner.encode(),
        )
        .unwrap();

        let mut m3 = Tlv8::new();
        m3.push(TlvType::State, vec![0x03]);
        m3.push(TlvType::EncryptedData, encrypted);
        let m4 = self.post_tlv("/pair-verify", &m3).await.tlv();
        assert_eq!(m4.error(), None, "verify M4 carried an error");

        self.crypto = Some(SessionCrypto::controller(&shared).unwrap());
    }
}

#[tokio::test]
async fn fresh_pair_verify_and_read_tree() {
    let fixture = fixture();
    let server = start_server("fresh-pair", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    controller.pair_setup(PIN).await;

    // The state file now holds exactly one admin entry.
    let persisted: Value =
        serde_json::from_str(&std::fs::read_to_string(&server.state_path).unwrap()).unwrap();
    let clients = persisted["paired_clients"].as_object().unwrap();
    assert_eq!(clients.len(), 1);
    assert!(clients.contains_key(CONTROLLER_ID));
    assert_eq!(persisted["permissions"][CONTROLLER_ID], json!(1));

    controller.pair_verify().await;

    let response = controller.request_json("GET", "/accessories", None).await;
    assert_eq!(response.status, 200);
    let tree = response.json();
    let info_chars = tree["accessories"][0]["services"][0]["characteristics"]
        .as_array()
        .unwrap();
    let by_name: HashMap<&str, u64> = info_chars
        .iter()
        .map(|c| {
            (
                c["description"].as_str().unwrap(),
                c["iid"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(by_name["Identify"], 2);
    assert_eq!(by_name["Manufacturer"], 3);
    assert_eq!(by_name["Model"], 4);
    assert_eq!(by_name["Name"], 5);
    assert_eq!(by_name["SerialNumber"], 6);
    assert_eq!(by_name["FirmwareRevision"], 7);

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn plain_requests_are_rejected_before_verify() {
    let fixture = fixture();
    let server = start_server("unauthorized", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    let response = controller.request_json("GET", "/accessories", None).await;
    assert_eq!(response.status, 470);

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn identify_works_only_while_unpaired() {
    let fixture = fixture();
    let server = start_server("identify", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    let response = controller.request_json("POST", "/identify", None).await;
    assert_eq!(response.status, 204);

    controller.pair_setup(PIN).await;
    let response = controller.request_json("POST", "/identify", None).await;
    assert_eq!(response.status, 400);

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn write_with_partial_failure_reports_per_char_status() {
    let fixture = fixture();
    let light_aid = fixture.light_aid;
    let on_iid = fixture.on_iid;
    let server = start_server("partial", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    controller.pair_setup(PIN).await;
    controller.pair_verify().await;

    let body = json!({
        "characteristics": [
            { "aid": light_aid, "iid": on_iid, "value": true },
            { "aid": light_aid, "iid": 999, "value": 1 },
        ]
    });
    let response = controller
        .request_json("PUT", "/characteristics", Some(&body))
        .await;
    assert_eq!(response.status, 207);

    let rows = response.json()["characteristics"].as_array().unwrap().clone();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["aid"].as_u64().unwrap(), light_aid);
    assert_eq!(rows[0]["iid"].as_u64().unwrap(), on_iid);
    assert_eq!(rows[0]["status"], json!(0));
    assert_eq!(rows[1]["iid"].as_u64().unwrap(), 999);
    assert_eq!(rows[1]["status"], json!(-70406));

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn float_writes_truncate_and_out_of_range_rejects() {
    let fixture = fixture();
    let light_aid = fixture.light_aid;
    let brightness_iid = fixture.brightness_iid;
    let server = start_server("coerce", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    controller.pair_setup(PIN).await;
    controller.pair_verify().await;

    // 23.6 truncates to 23 on an integer format; success replies 204.
    let body = json!({
        "characteristics": [
            { "aid": light_aid, "iid": brightness_iid, "value": 23.6 },
        ]
    });
    let response = controller
        .request_json("PUT", "/characteristics", Some(&body))
        .await;
    assert_eq!(response.status, 204);

    let path = format!("/characteristics?id={light_aid}.{brightness_iid}");
    let response = controller.request_json("GET", &path, None).await;
    assert_eq!(response.status, 200);
    let rows = response.json()["characteristics"].as_array().unwrap().clone();
    assert_eq!(rows[0]["value"], json!(23));

    // 101 exceeds maxValue=100: per-characteristic invalid-value, and the
    // stored value does not move.
    let body = json!({
        "characteristics": [
            { "aid": light_aid, "iid": brightness_iid, "value": 101 },
        ]
    });
    let response = controller
        .request_json("PUT", "/characteristics", Some(&body))
        .await;
    assert_eq!(response.status, 207);
    let rows = response.json()["characteristics"].as_array().unwrap().clone();
    assert_eq!(rows[0]["status"], json!(-70407));

    let response = controller.request_json("GET", &path, None).await;
    let rows = response.json()["characteristics"].as_array().unwrap().clone();
    assert_eq!(rows[0]["value"], json!(23));

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn prepared_write_expires_with_invalid_pid_status() {
    let fixture = fixture();
    let light_aid = fixture.light_aid;
    let on_iid = fixture.on_iid;
    let server = start_server("prepare", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    controller.pair_setup(PIN).await;
    controller.pair_verify().await;

    let response = controller
        .request_json("PUT", "/prepare", Some(&json!({ "ttl": 100, "pid": 42 })))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.json()["status"], json!(0));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let body = json!({
        "pid": 42,
        "characteristics": [
            { "aid": light_aid, "iid": on_iid, "value": true },
        ]
    });
    let response = controller
        .request_json("PUT", "/characteristics", Some(&body))
        .await;
    assert_eq!(response.status, 207);
    let rows = response.json()["characteristics"].as_array().unwrap().clone();
    assert_eq!(rows[0]["status"], json!(-70410));

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn events_coalesce_and_exclude_the_originator() {
    let fixture = fixture();
    let light_aid = fixture.light_aid;
    let on_iid = fixture.on_iid;
    let sensor_aid = fixture.sensor_aid;
    let temperature_iid = fixture.temperature_iid;
    let server = start_server("events", fixture).await;

    // Session A pairs; session B verifies with the same controller
    // identity on a second connection.
    let identity = IdentityKeyPair::generate();
    let mut session_a =
        Controller::connect_with_identity(server.addr, identity.clone()).await;
    session_a.pair_setup(PIN).await;
    session_a.pair_verify().await;

    let mut session_b = Controller::connect_with_identity(server.addr, identity).await;
    session_b.pair_verify().await;

    // Both subscribe to the light and the sensor.
    for session in [&mut session_a, &mut session_b] {
        let body = json!({
            "characteristics": [
                { "aid": light_aid, "iid": on_iid, "ev": true },
                { "aid": sensor_aid, "iid": temperature_iid, "ev": true },
            ]
        });
        let response = session.request_json("PUT", "/characteristics", Some(&body)).await;
        assert_eq!(response.status, 204);
    }

    // Five rapid server-originated updates coalesce: B sees at least one
    // EVENT whose final value is the last write.
    for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
        server
            .handle
            .set_value(sensor_aid, temperature_iid, json!(value))
            .await;
    }

    let mut last_value = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_millis(300), session_b.read_message()).await {
            Ok(Ok(message)) => {
                assert_eq!(message.protocol, "EVENT/1.0");
                for row in message.json()["characteristics"].as_array().unwrap() {
                    if row["iid"].as_u64() == Some(temperature_iid) {
                        last_value = Some(row["value"].clone());
                    }
                }
            }
            _ => break,
        }
    }
    assert_eq!(last_value, Some(json!(5.0)));

    // A subscribed to the sensor too; drain its copy of the temperature
    // events before checking that it never sees its own light write.
    while let Ok(Ok(message)) =
        timeout(Duration::from_millis(300), session_a.read_message()).await
    {
        assert_eq!(message.protocol, "EVENT/1.0");
    }

    // A writes the light; B receives the event, A does not.
    let body = json!({
        "characteristics": [
            { "aid": light_aid, "iid": on_iid, "value": true },
        ]
    });
    let response = session_a
        .request_json("PUT", "/characteristics", Some(&body))
        .await;
    assert_eq!(response.status, 204);

    let event = timeout(Duration::from_secs(2), session_b.read_message())
        .await
        .expect("subscriber should receive the event")
        .unwrap();
    assert_eq!(event.protocol, "EVENT/1.0");
    let rows = event.json()["characteristics"].as_array().unwrap().clone();
    assert!(rows
        .iter()
        .any(|row| row["iid"].as_u64() == Some(on_iid) && row["value"] == json!(true)));

    // The originator's stream stays quiet.
    assert!(
        timeout(Duration::from_millis(400), session_a.read_message())
            .await
            .is_err(),
        "originator must not receive its own event"
    );

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn removing_the_admin_wipes_pairings_and_drops_sessions() {
    let fixture = fixture();
    let server = start_server("unpair", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    controller.pair_setup(PIN).await;
    controller.pair_verify().await;

    let mut remove = Tlv8::new();
    remove.push(TlvType::State, vec![0x01]);
    remove.push(TlvType::Method, vec![0x04]);
    remove.push(TlvType::Identifier, CONTROLLER_ID.as_bytes().to_vec());
    let reply = controller.post_tlv("/pairings", &remove).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.tlv().error(), None);

    // The registry is wiped on disk...
    let persisted: Value =
        serde_json::from_str(&std::fs::read_to_string(&server.state_path).unwrap()).unwrap();
    assert!(persisted["paired_clients"].as_object().unwrap().is_empty());

    // ...the session is dropped...
    let closed = timeout(IO_TIMEOUT, controller.read_message()).await;
    assert!(matches!(closed, Ok(Err(_))), "session should be closed");

    // ...and a fresh controller can pair again.
    let mut fresh = Controller::connect(server.addr).await;
    fresh.pair_setup(PIN).await;

    std::fs::remove_file(&server.state_path).ok();
}

#[tokio::test]
async fn oversized_request_spans_multiple_frames() {
    let fixture = fixture();
    let light_aid = fixture.light_aid;
    let on_iid = fixture.on_iid;
    let server = start_server("frames", fixture).await;

    let mut controller = Controller::connect(server.addr).await;
    controller.pair_setup(PIN).await;
    controller.pair_verify().await;

    // Pad the request body well past one 1024-byte frame. Unknown members
    // of a characteristic entry are ignored.
    let padding = "x".repeat(4000);
    let body = json!({
        "characteristics": [
            { "aid": light_aid, "iid": on_iid, "value": true, "padding": padding },
        ]
    });
    let response = controller
        .request_json("PUT", "/characteristics", Some(&body))
        .await;
    assert_eq!(response.status, 204);

    std::fs::remove_file(&server.state_path).ok();
}
