/**
 * MESHION KERNEL - Point d'entrée principal de l'agent Meshion
 *
 * RÔLE : Orchestration de tous les modules : config, adaptateur Thread,
 * collections, file d'actions, HTTP. Bootstrap du système complet.
 *
 * ARCHITECTURE : boucle moteur événementielle (tick + callbacks Thread)
 * + API REST json:api + collections en mémoire.
 */

use meshion_kernel::actions::{spawn_engine, Context, Engine};
use meshion_kernel::config::load_config;
use meshion_kernel::devices::new_devices_collection;
use meshion_kernel::diagnostics::new_diagnostics_collection;
use meshion_kernel::http::{self, AppState};
use meshion_kernel::state::new_state;
use meshion_kernel::thread::{event_channel, SharedThreadApi, StubThreadClient};

use anyhow::{Context as _, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    // collections et conf partagées
    let devices = new_state(new_devices_collection());
    let diagnostics = new_state(new_diagnostics_collection());
    let cfg = load_config().await;

    // adaptateur vers la pile Thread ; le client de repli sert tant que le
    // binding NCP n'est pas câblé, l'émetteur d'événements reste à brancher
    // TODO: instancier le client NCP depuis cfg.ncp quand le binding arrive
    let (_events_tx, events_rx) = event_channel();
    let thread: SharedThreadApi = Arc::new(StubThreadClient::new());

    // boucle moteur : file d'actions, collecteur, allow-list, scan d'énergie
    let ctx = Context::new(thread, devices.clone(), diagnostics.clone());
    let engine = new_state(Engine::new(ctx));
    spawn_engine(engine.clone(), events_rx, cfg.tick_interval_ms());
    println!(
        "[kernel] engine started (tick every {} ms)",
        cfg.tick_interval_ms()
    );

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        engine,
        devices,
        diagnostics,
        diag_conf: cfg.diag_conf(),
    };
    let app = http::build_router(app_state);

    let http_conf = cfg.http.clone().unwrap_or(meshion_kernel::config::HttpConf {
        bind: "0.0.0.0".into(),
        port: 8081,
    });
    let addr: SocketAddr = format!("{}:{}", http_conf.bind, http_conf.port)
        .parse()
        .context("invalid http bind address")?;

    println!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
