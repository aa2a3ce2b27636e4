//! Demo bridge: a simulated lightbulb and temperature sensor behind one
//! HAP bridge, served to HomeKit controllers on the local network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hap_accessory::{
    Accessory, AccessoryContext, AccessoryDatabase, AccessoryHandler, Loader,
};
use hap_core::Category;
use hap_server::{DriverConfig, HapDriver};
use rand::Rng;
use serde_json::{json, Value};
use tracing::info;

/// A lightbulb that just remembers its state.
struct DemoLight;

#[async_trait]
impl AccessoryHandler for DemoLight {
    async fn identify(&self) {
        info!("demo light: identify requested");
    }

    async fn on_value_set(&self, iid: u64, value: &Value) {
        info!("demo light: characteristic {iid} set to {value}");
    }
}

/// A temperature sensor publishing a random walk every few seconds.
struct DemoSensor {
    temperature_iid: u64,
}

#[async_trait]
impl AccessoryHandler for DemoSensor {
    async fn on_start(&self, ctx: AccessoryContext) {
        let iid = self.temperature_iid;
        let mut shutdown = ctx.shutdown_signal();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3));
            let mut temperature = 21.0f64;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        temperature += rand::thread_rng().gen_range(-0.5..0.5);
                        temperature = temperature.clamp(0.0, 100.0);
                        ctx.set_value(iid, json!((temperature * 10.0).round() / 10.0));
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let loader = Loader::embedded()?;
    let mut db = AccessoryDatabase::bridge(&loader, "Rust Bridge")?;

    let mut light = Accessory::new(&loader, "Demo Light", Category::Lightbulb)?;
    light.add_preload_service(&loader, "Lightbulb", &["Brightness"])?;
    light.set_info_service(Some("1.0"), Some("hap-rs"), Some("DemoLight"), Some("L-0001"));
    light.set_handler(Arc::new(DemoLight));
    db.add_bridged(light)?;

    let mut sensor = Accessory::new(&loader, "Demo Sensor", Category::Sensor)?;
    sensor.add_preload_service(&loader, "TemperatureSensor", &[])?;
    sensor.set_info_service(Some("1.0"), Some("hap-rs"), Some("DemoSensor"), Some("S-0001"));
    let temperature_iid = sensor
        .char_iid("TemperatureSensor", "CurrentTemperature")
        .expect("sensor service was just added");
    sensor.set_handler(Arc::new(DemoSensor { temperature_iid }));
    db.add_bridged(sensor)?;

    let driver = HapDriver::new(db, DriverConfig::default())?;
    info!("Setup payload: {}", driver.setup_payload().await);
    info!("Setup code: {}", driver.pincode().await);

    let handle = driver.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    driver.run().await?;
    Ok(())
}
