/**
 * CONFIGURATION KERNEL - Chargement et gestion des paramètres Meshion
 *
 * RÔLE :
 * Ce module gère la configuration centralisée du kernel Meshion depuis un fichier YAML.
 * Il définit les paramètres HTTP, la cadence du moteur d'actions et les bornes du
 * collecteur de diagnostics, avec fallback par défaut.
 *
 * FONCTIONNEMENT :
 * - Lecture de meshion.yaml (ou variable MESHION_KERNEL_CONFIG)
 * - Parsing YAML -> structures typées avec serde
 * - Fallback vers configuration par défaut si fichier absent/invalide
 *
 * EXEMPLE MESHION.YAML :
 * ```yaml
 * http:
 *   bind: "0.0.0.0"
 *   port: 8081
 * engine:
 *   tick_interval_ms: 2000
 * diag:
 *   timeout_ms: 10000
 *   max_age_ms: 30000
 *   retries: 3
 * ncp:
 *   socket: "/run/meshion/ncp.sock"
 * ```
 */

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Configuration principale du kernel Meshion
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KernelConfig {
    /// Section serveur HTTP (bind, port)
    pub http: Option<HttpConf>,
    /// Section boucle moteur (cadence du tick de la file d'actions)
    pub engine: Option<EngineConf>,
    /// Bornes par défaut du collecteur de diagnostics
    pub diag: Option<DiagConf>,
    /// Transport NCP (non câblé tant que le binding radio n'est pas livré)
    pub ncp: Option<NcpConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConf {
    /// Période du tick de la file d'actions, en millisecondes
    pub tick_interval_ms: u64,
}

/// Bornes du collecteur pour une découverte lancée via POST /api/devices
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiagConf {
    pub timeout_ms: u64,
    pub max_age_ms: u64,
    pub retries: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NcpConf {
    /// Socket du co-processeur Thread
    pub socket: String,
}

impl Default for KernelConfig {
    /// Configuration par défaut si aucun fichier meshion.yaml trouvé
    fn default() -> Self {
        Self {
            http: Some(HttpConf {
                bind: "0.0.0.0".into(),
                port: 8081,
            }),
            engine: Some(EngineConf {
                tick_interval_ms: 2000,
            }),
            diag: Some(DiagConf {
                timeout_ms: 10_000,
                max_age_ms: 30_000,
                retries: 3,
            }),
            ncp: None,
        }
    }
}

impl KernelConfig {
    pub fn tick_interval_ms(&self) -> u64 {
        self.engine.as_ref().map(|e| e.tick_interval_ms).unwrap_or(2000)
    }

    pub fn diag_conf(&self) -> DiagConf {
        self.diag.clone().unwrap_or(DiagConf {
            timeout_ms: 10_000,
            max_age_ms: 30_000,
            retries: 3,
        })
    }
}

/// Charge la configuration depuis le fichier YAML
/// Gère les erreurs gracieusement avec fallback vers config par défaut
pub async fn load_config() -> KernelConfig {
    // chemin configurable via variable d'environnement
    let path = std::env::var("MESHION_KERNEL_CONFIG").unwrap_or_else(|_| "meshion.yaml".into());

    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return KernelConfig::default();
        }

        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[config] YAML invalide dans {}: {}", path, e);
            eprintln!("[config] utilisation de la config par défaut");
            KernelConfig::default()
        })
    } else {
        eprintln!("[config] fichier {} non trouvé, config par défaut", path);
        KernelConfig::default()
    }
}
