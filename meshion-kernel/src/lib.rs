/**
 * MESHION KERNEL - Plan de contrôle d'un Thread Border Router
 *
 * Agent hôte qui possède le co-processeur Thread, expose le réseau aux
 * clients de gestion via une API REST json:api, et pilote les protocoles
 * de diagnostic et de commissioning du mesh.
 */

pub mod actions;
pub mod addr;
pub mod allowlist;
pub mod collection;
pub mod collector;
pub mod config;
pub mod devices;
pub mod diagnostics;
pub mod http;
pub mod models;
pub mod state;
pub mod thread;
