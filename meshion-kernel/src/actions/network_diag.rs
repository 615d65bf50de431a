/**
 * ACTIONS getNetworkDiagnosticTask / resetNetworkDiagCounterTask
 *
 * getNetworkDiagnosticTask délègue au collecteur : destination vide pour
 * une découverte de tous les routeurs, ou unicast vers un deviceId, un
 * ML-EID-IID (16 hex) ou un rloc16 (4 hex). Les résultats vont dans la
 * collection diagnostics et l'action reçoit la référence du dernier item.
 *
 * resetNetworkDiagCounterTask envoie un Diagnostic Reset en multicast
 * realm-local all-thread-nodes pour les compteurs demandés, succès
 * immédiat.
 */

use super::{Action, ActionStatus, Context, TaskResult};
use crate::addr::is_hex_string;
use crate::collector::{CollectorStep, RelationshipKind};
use crate::models::{tlv_type_from_name, TLV_MAC_COUNTERS, TLV_MLE_COUNTERS};
use crate::thread::ThreadError;
use serde_json::Value;
use std::time::Instant;

// bornes par défaut d'un cycle lancé par action, la configuration fine
// reste réservée à la découverte pilotée par l'API devices
const ACTION_DIAG_TIMEOUT_MS: u64 = 10_000;
const ACTION_DIAG_MAX_AGE_MS: u64 = 30_000;
const ACTION_DIAG_RETRIES: u8 = 1;

fn types_of(attributes: &Value) -> Vec<String> {
    attributes
        .get("types")
        .and_then(|t| t.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

pub fn validate(attributes: &Value) -> bool {
    if !attributes.get("timeout").map_or(false, |t| t.is_number()) {
        eprintln!("[net-diag] missing or bad timeout attribute");
        return false;
    }

    let Some(destination) = attributes.get("destination").and_then(|d| d.as_str()) else {
        eprintln!("[net-diag] missing destination attribute");
        return false;
    };
    let destination_ok = destination.is_empty()
        || (destination.len() == 16 && is_hex_string(destination))
        || (destination.len() == 4 && is_hex_string(destination));
    if !destination_ok {
        eprintln!("[net-diag] bad destination: {}", destination);
        return false;
    }

    let Some(types) = attributes.get("types").and_then(|t| t.as_array()) else {
        eprintln!("[net-diag] missing types attribute");
        return false;
    };
    for entry in types {
        let Some(name) = entry.as_str() else {
            eprintln!("[net-diag] non-string TLV type in types");
            return false;
        };
        if tlv_type_from_name(name).is_none() {
            eprintln!("[net-diag] unknown TLV type: {}", name);
            return false;
        }
    }

    true
}

pub fn process(action: &mut Action, ctx: &mut Context) -> TaskResult {
    let destination = action
        .attributes
        .get("destination")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();
    let types = types_of(&action.attributes);

    // un seul cycle de collecte à la fois
    if ctx
        .collector
        .configure(
            ACTION_DIAG_TIMEOUT_MS,
            ACTION_DIAG_MAX_AGE_MS,
            ACTION_DIAG_RETRIES,
            None,
        )
        .is_err()
    {
        return TaskResult::Retry;
    }

    let devices = ctx.devices.clone();
    let devices = devices.lock();
    match ctx.collector.start_action(
        &destination,
        &types,
        RelationshipKind::Diagnostics,
        action.id,
        &devices,
    ) {
        Ok(()) => TaskResult::Success,
        Err(ThreadError::InvalidState) => TaskResult::Retry,
        Err(e) => {
            eprintln!("[net-diag] cannot start collection: {}", e);
            TaskResult::Failure
        }
    }
}

pub fn evaluate(action: &mut Action, ctx: &mut Context) -> TaskResult {
    let devices = ctx.devices.clone();
    let diagnostics = ctx.diagnostics.clone();
    let mut devices = devices.lock();
    let mut diagnostics = diagnostics.lock();

    match ctx
        .collector
        .continue_request(Instant::now(), &mut devices, &mut diagnostics)
    {
        Ok(CollectorStep::Completed) => {
            action.relationship = ctx.collector.take_last_relationship();
            TaskResult::Success
        }
        Ok(CollectorStep::TimedOut) => TaskResult::Stopped,
        Ok(CollectorStep::Pending) => TaskResult::Pending,
        Err(e) => {
            eprintln!("[net-diag] collection failed: {}", e);
            // libère le collecteur pour le cycle suivant
            ctx.collector.cancel();
            TaskResult::Failure
        }
    }
}

pub fn clean(action: &mut Action, ctx: &mut Context) {
    if action.status == ActionStatus::Active {
        ctx.collector.cancel();
    }
}

// ------ resetNetworkDiagCounterTask ------

fn resettable_tlv(name: &str) -> Option<u8> {
    match name {
        "macCounter" => Some(TLV_MAC_COUNTERS),
        "mleCounter" => Some(TLV_MLE_COUNTERS),
        _ => None,
    }
}

pub fn validate_reset(attributes: &Value) -> bool {
    if !attributes.get("timeout").map_or(false, |t| t.is_number()) {
        eprintln!("[net-diag] missing or bad timeout attribute");
        return false;
    }

    // le reset unicast n'est pas implémenté, seule l'absence de
    // destination est acceptée
    if attributes
        .get("destination")
        .and_then(|d| d.as_str())
        .map_or(false, |d| !d.is_empty())
    {
        eprintln!("[net-diag] unicast counter reset not implemented");
        return false;
    }

    let Some(types) = attributes.get("types").and_then(|t| t.as_array()) else {
        eprintln!("[net-diag] missing types attribute");
        return false;
    };
    if types.is_empty() {
        return false;
    }
    for entry in types {
        let ok = entry.as_str().and_then(resettable_tlv).is_some();
        if !ok {
            eprintln!("[net-diag] non-resettable TLV type in types");
            return false;
        }
    }

    true
}

pub fn process_reset(action: &mut Action, ctx: &mut Context) -> TaskResult {
    let tlv_types: Vec<u8> = types_of(&action.attributes)
        .iter()
        .filter_map(|name| resettable_tlv(name))
        .collect();

    // remise à zéro chez tous les devices via multicast
    let destination = ctx.thread.realm_local_all_thread_nodes();
    match ctx.thread.send_diagnostic_reset(destination, &tlv_types) {
        Ok(()) => TaskResult::Success,
        Err(e) => {
            eprintln!("[net-diag] counter reset failed: {}", e);
            TaskResult::Failure
        }
    }
}

pub fn evaluate_reset(_action: &mut Action, _ctx: &mut Context) -> TaskResult {
    // le reset est parti en multicast, rien à attendre
    TaskResult::Success
}

pub fn clean_reset(_action: &mut Action, _ctx: &mut Context) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_destinations() {
        let ok = [
            json!({ "destination": "", "types": ["extAddress"], "timeout": 10 }),
            json!({ "destination": "0000000000000001", "types": ["extAddress"], "timeout": 10 }),
            json!({ "destination": "0800", "types": ["extAddress"], "timeout": 10 }),
        ];
        for attributes in ok {
            assert!(validate(&attributes));
        }

        let bad = [
            json!({ "destination": "080", "types": ["extAddress"], "timeout": 10 }),
            json!({ "destination": "00000000000000zz", "types": ["extAddress"], "timeout": 10 }),
            json!({ "types": ["extAddress"], "timeout": 10 }),
        ];
        for attributes in bad {
            assert!(!validate(&attributes));
        }
    }

    #[test]
    fn test_validate_tlv_names_case_sensitive() {
        assert!(validate(&json!({
            "destination": "",
            "types": ["extAddress", "children", "neighbors", "mleCounters"],
            "timeout": 10,
        })));
        assert!(!validate(&json!({
            "destination": "",
            "types": ["ExtAddress"],
            "timeout": 10,
        })));
    }

    #[test]
    fn test_validate_reset_types() {
        assert!(validate_reset(&json!({
            "types": ["macCounter", "mleCounter"],
            "timeout": 60,
        })));
        // la liste complète des TLV n'est pas resettable
        assert!(!validate_reset(&json!({
            "types": ["macCounters"],
            "timeout": 60,
        })));
        assert!(!validate_reset(&json!({ "types": [], "timeout": 60 })));
        // reset unicast refusé
        assert!(!validate_reset(&json!({
            "destination": "0000000000000001",
            "types": ["macCounter"],
            "timeout": 60,
        })));
    }
}
