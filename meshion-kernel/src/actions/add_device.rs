/**
 * ACTION addThreadDeviceTask - Enrôlement d'un joiner via le commissioner
 *
 * process : démarre le commissioner s'il ne l'est pas (l'action reste en
 * attente et sera retentée quand il devient actif), puis enregistre le
 * joiner dans l'allow-list et auprès du commissioner. Un joiner déjà en
 * cours pour le même eui64 voit son ancienne action stoppée.
 * evaluate : suit l'état de l'entrée d'allow-list.
 * clean : retire le joiner du commissioner et efface l'entrée.
 */

use super::{Action, ActionStatus, Context, TaskResult};
use crate::addr::{is_hex_string, parse_ext_addr};
use crate::allowlist::{verify_pskd, AllowList, EntryState, JoinStatus};
use crate::models::ExtAddr;
use crate::thread::{CommissionerState, ThreadError};
use serde_json::Value;

fn attr_str<'a>(attributes: &'a Value, key: &str) -> Option<&'a str> {
    attributes.get(key).and_then(|v| v.as_str())
}

fn eui_of(action: &Action) -> Option<ExtAddr> {
    attr_str(&action.attributes, "eui").and_then(|s| parse_ext_addr(s).ok())
}

pub fn validate(attributes: &Value) -> bool {
    if !attributes.get("timeout").map_or(false, |t| t.is_number()) {
        eprintln!("[add-device] missing or bad timeout attribute");
        return false;
    }

    let Some(eui) = attr_str(attributes, "eui") else {
        eprintln!("[add-device] missing eui attribute");
        return false;
    };
    if eui.len() != 16 || !is_hex_string(eui) || parse_ext_addr(eui).is_err() {
        eprintln!("[add-device] bad eui attribute: {}", eui);
        return false;
    }

    let Some(pskd) = attr_str(attributes, "pskd") else {
        eprintln!("[add-device] missing pskd attribute");
        return false;
    };
    if !verify_pskd(pskd) {
        eprintln!("[add-device] bad pskd format");
        return false;
    }

    true
}

fn add_joiner(action: &Action, ctx: &mut Context) -> Result<(), ThreadError> {
    let eui = eui_of(action).ok_or(ThreadError::InvalidArgs)?;
    let pskd = attr_str(&action.attributes, "pskd")
        .ok_or(ThreadError::InvalidArgs)?
        .to_string();
    let timeout_s = action
        .attributes
        .get("timeout")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as u32;

    // un enrôlement encore actif pour le même eui64 est remplacé,
    // l'action qui le portait est stoppée (même uuid que l'entrée)
    let previous = ctx
        .allow_list
        .find(&eui)
        .filter(|e| !e.state.is_terminal() && e.uuid != action.id)
        .map(|e| e.uuid);
    if let Some(old_action) = previous {
        eprintln!("[add-device] joiner {} resubmitted, stopping action {}", eui, old_action);
        ctx.request_stop(old_action);
    }

    ctx.allow_list.add_device(eui, timeout_s, &pskd, action.id);
    ctx.thread
        .commissioner_add_joiner(Some(eui), &pskd, timeout_s)?;

    if let Some(entry) = ctx.allow_list.find_mut(&eui) {
        entry.state = EntryState::PendingJoiner;
    }
    Ok(())
}

pub fn process(action: &mut Action, ctx: &mut Context) -> TaskResult {
    match ctx.thread.commissioner_state() {
        CommissionerState::Active => match add_joiner(action, ctx) {
            Ok(()) => TaskResult::Success,
            Err(ThreadError::InvalidState) | Err(ThreadError::Already) => TaskResult::Retry,
            Err(e) => {
                eprintln!("[add-device] cannot add joiner: {}", e);
                TaskResult::Failure
            }
        },
        // le commissioner n'est pas encore actif : pétition lancée,
        // l'action sera retraitée depuis le callback d'état
        _ => match ctx.thread.commissioner_start() {
            Ok(()) | Err(ThreadError::InvalidState) | Err(ThreadError::Already) => {
                TaskResult::Retry
            }
            Err(e) => {
                eprintln!("[add-device] cannot start commissioner: {}", e);
                TaskResult::Failure
            }
        },
    }
}

pub fn evaluate(action: &mut Action, ctx: &mut Context) -> TaskResult {
    let Some(eui) = eui_of(action) else {
        return TaskResult::Failure;
    };
    match ctx.allow_list.join_status(&eui) {
        JoinStatus::Joined => TaskResult::Success,
        JoinStatus::Failed => TaskResult::Failure,
        JoinStatus::Pending => TaskResult::Pending,
    }
}

pub fn clean(action: &mut Action, ctx: &mut Context) {
    let Some(eui) = eui_of(action) else {
        return;
    };
    if let Err(e) = ctx.thread.commissioner_remove_joiner(Some(eui)) {
        eprintln!("[add-device] remove joiner {} failed: {}", eui, e);
    }
    ctx.allow_list.erase(&eui);
}

/// Rendu json:api de l'action, le statut générique est remplacé par l'état
/// détaillé de l'entrée d'allow-list dès que l'action a quitté pending
pub fn jsonify(action: &Action, allow_list: &AllowList) -> Value {
    let mut json = action.to_json();

    if action.status != ActionStatus::Pending {
        if let Some(entry) = eui_of(action).and_then(|eui| allow_list.find(&eui)) {
            json["attributes"]["status"] = Value::String(entry.state.as_str().into());
        }
    }
    json
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_wellformed_attributes() {
        assert!(validate(&json!({
            "eui": "aabbccddeeff0011",
            "pskd": "J01NME",
            "timeout": 300,
        })));
    }

    #[test]
    fn test_validate_rejects_bad_eui() {
        let bad = [
            json!({ "eui": "aabbccddeeff00", "pskd": "J01NME", "timeout": 300 }),
            json!({ "eui": "zzbbccddeeff0011", "pskd": "J01NME", "timeout": 300 }),
            json!({ "pskd": "J01NME", "timeout": 300 }),
        ];
        for attributes in bad {
            assert!(!validate(&attributes));
        }
    }

    #[test]
    fn test_validate_rejects_bad_pskd_or_timeout() {
        assert!(!validate(&json!({
            "eui": "aabbccddeeff0011",
            "pskd": "j01nme",
            "timeout": 300,
        })));
        assert!(!validate(&json!({
            "eui": "aabbccddeeff0011",
            "pskd": "J01NME",
            "timeout": "soon",
        })));
    }
}
