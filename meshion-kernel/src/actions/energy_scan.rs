/**
 * ACTION getEnergyScanTask - Scan d'énergie commissionné
 *
 * L'API du commissioner ne supporte pas les scans concurrents, un seul
 * scan est donc actif à la fois et les soumissions concurrentes attendent
 * leur tour en pending. Les mesures arrivent par paquets de lignes RSSI
 * (une ligne = une mesure par canal du masque) et le scan est complet
 * quand le nombre de lignes atteint le `count` demandé.
 */

use super::{Action, ActionStatus, Context, TaskResult};
use crate::addr::{combine_prefix_and_iid, is_hex_string, parse_ext_addr};
use crate::diagnostics::{DiagnosticItem, DiagnosticsCollection, DIAG_COLLECTION_NAME};
use crate::models::{EnergyReport, EnergyScanReport, Relationship};
use crate::thread::{CommissionerState, ThreadError};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    SendReq,
    CallbackWait,
    HandleCb,
    Complete,
}

/// Etat du scan unique en cours, possédé par le contexte du moteur
pub struct EnergyScan {
    state: ScanState,
    action_id: Option<Uuid>,
    report: EnergyScanReport,
    received_total: u8,
    relationship: Option<Relationship>,
}

impl EnergyScan {
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
            action_id: None,
            report: EnergyScanReport::default(),
            received_total: 0,
            relationship: None,
        }
    }

    fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.action_id = None;
        self.received_total = 0;
    }

    /// Accumule un paquet de mesures. Les paquets reçus hors scan actif
    /// (scan annulé entre temps) sont ignorés.
    pub fn on_report(
        &mut self,
        channel_mask: u32,
        energy_list: &[i8],
        diagnostics: &mut DiagnosticsCollection,
    ) {
        if self.state != ScanState::CallbackWait {
            eprintln!("[energy-scan] report dropped, no scan waiting");
            return;
        }

        let channel_count = channel_mask.count_ones() as usize;
        if channel_count == 0 || energy_list.len() % channel_count != 0 {
            eprintln!("[energy-scan] report size does not match channel mask, dropped");
            return;
        }

        self.state = ScanState::HandleCb;
        for row in energy_list.chunks(channel_count) {
            for (i, rssi) in row.iter().enumerate() {
                if let Some(report) = self.report.report.get_mut(i) {
                    report.max_rssi.push(*rssi);
                }
            }
            self.received_total += 1;
        }

        if self.received_total >= self.report.count {
            let item = DiagnosticItem::energy_scan(self.report.clone());
            let id = item.uuid();
            diagnostics.add(item);
            self.relationship = Some(Relationship {
                type_name: DIAG_COLLECTION_NAME.into(),
                id,
            });
            self.state = ScanState::Complete;
            eprintln!("[energy-scan] scan complete, report stored");
        } else {
            eprintln!(
                "[energy-scan] received {} of {} measurements",
                self.received_total, self.report.count
            );
            self.state = ScanState::CallbackWait;
        }
    }
}

impl Default for EnergyScan {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate(attributes: &Value) -> bool {
    if !attributes.get("timeout").map_or(false, |t| t.is_number()) {
        eprintln!("[energy-scan] missing or bad timeout attribute");
        return false;
    }

    let Some(destination) = attributes.get("destination").and_then(|d| d.as_str()) else {
        eprintln!("[energy-scan] missing destination attribute");
        return false;
    };
    if destination.len() != 16 || !is_hex_string(destination) {
        eprintln!("[energy-scan] bad destination: {}", destination);
        return false;
    }

    let Some(mask) = attributes.get("channelMask").and_then(|m| m.as_array()) else {
        eprintln!("[energy-scan] missing channelMask attribute");
        return false;
    };
    if mask.is_empty() {
        return false;
    }
    for entry in mask {
        let ok = entry.as_u64().map_or(false, |ch| (11..=26).contains(&ch));
        if !ok {
            eprintln!("[energy-scan] channel out of the 11..26 range");
            return false;
        }
    }

    for key in ["count", "period", "scanDuration"] {
        if !attributes.get(key).map_or(false, |v| v.is_number()) {
            eprintln!("[energy-scan] missing or bad {} attribute", key);
            return false;
        }
    }

    true
}

fn start_scan(action: &Action, ctx: &mut Context) -> Result<(), ThreadError> {
    if ctx.energy_scan.state != ScanState::Idle {
        return Err(ThreadError::Busy);
    }

    let attributes = &action.attributes;
    let destination = attributes
        .get("destination")
        .and_then(|d| d.as_str())
        .ok_or(ThreadError::InvalidArgs)?;
    let channels: Vec<u8> = attributes
        .get("channelMask")
        .and_then(|m| m.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_u64().map(|c| c as u8)).collect())
        .unwrap_or_default();
    let count = attributes.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as u8;
    let period = attributes.get("period").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
    let duration = attributes
        .get("scanDuration")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u16;

    let mut bitmask: u32 = 0;
    for channel in &channels {
        bitmask |= 1u32 << *channel;
    }

    // destination : deviceId connu avec ML-EID-IID appris, sinon la chaîne
    // est prise comme IID littéral
    let iid = {
        let devices = ctx.devices.clone();
        let devices = devices.lock();
        devices
            .get(destination)
            .map(|item| item.info.ml_eid_iid)
            .filter(|iid| !iid.is_empty())
            .or_else(|| parse_ext_addr(destination).ok())
            .ok_or(ThreadError::InvalidArgs)?
    };
    let ip6 = combine_prefix_and_iid(&ctx.thread.mesh_local_prefix(), &iid);

    ctx.energy_scan.state = ScanState::SendReq;
    eprintln!(
        "[energy-scan] starting scan toward {} (mask 0x{:08x}, count {})",
        ip6, bitmask, count
    );

    if let Err(e) = ctx
        .thread
        .commissioner_energy_scan(bitmask, count, period, duration, ip6)
    {
        ctx.energy_scan.state = ScanState::Idle;
        // un commissioner déjà occupé par un autre scan se représente
        // comme Busy pour que l'action soit retentée
        return Err(match e {
            ThreadError::InvalidState => ThreadError::Busy,
            other => other,
        });
    }

    ctx.energy_scan.report = EnergyScanReport {
        origin: iid,
        count,
        report: channels
            .iter()
            .map(|channel| EnergyReport {
                channel: *channel,
                max_rssi: Vec::new(),
            })
            .collect(),
    };
    ctx.energy_scan.received_total = 0;
    ctx.energy_scan.relationship = None;
    ctx.energy_scan.action_id = Some(action.id);
    ctx.energy_scan.state = ScanState::CallbackWait;
    Ok(())
}

pub fn process(action: &mut Action, ctx: &mut Context) -> TaskResult {
    match ctx.thread.commissioner_state() {
        CommissionerState::Active => match start_scan(action, ctx) {
            Ok(()) => TaskResult::Success,
            Err(ThreadError::Busy) | Err(ThreadError::Already) | Err(ThreadError::InvalidState) => {
                TaskResult::Retry
            }
            Err(e) => {
                eprintln!("[energy-scan] cannot start scan: {}", e);
                TaskResult::Failure
            }
        },
        _ => match ctx.thread.commissioner_start() {
            Ok(()) | Err(ThreadError::InvalidState) | Err(ThreadError::Already) => {
                TaskResult::Retry
            }
            Err(e) => {
                eprintln!("[energy-scan] cannot start commissioner: {}", e);
                TaskResult::Failure
            }
        },
    }
}

pub fn evaluate(action: &mut Action, ctx: &mut Context) -> TaskResult {
    if ctx.energy_scan.state == ScanState::Complete
        && ctx.energy_scan.action_id == Some(action.id)
    {
        action.relationship = ctx.energy_scan.relationship.take();
        ctx.energy_scan.reset();
        TaskResult::Success
    } else {
        TaskResult::Pending
    }
}

pub fn clean(action: &mut Action, ctx: &mut Context) {
    // les lignes de mesure encore en vol seront ignorées après le reset
    if action.status == ActionStatus::Active && ctx.energy_scan.action_id == Some(action.id) {
        ctx.energy_scan.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wellformed() -> Value {
        json!({
            "destination": "0000000000000001",
            "channelMask": [11, 12, 13],
            "count": 4,
            "period": 200,
            "scanDuration": 100,
            "timeout": 60,
        })
    }

    #[test]
    fn test_validate_accepts_wellformed_attributes() {
        assert!(validate(&wellformed()));
    }

    #[test]
    fn test_validate_rejects_bad_channels() {
        let mut attributes = wellformed();
        attributes["channelMask"] = json!([10]);
        assert!(!validate(&attributes));
        attributes["channelMask"] = json!([27]);
        assert!(!validate(&attributes));
        attributes["channelMask"] = json!([]);
        assert!(!validate(&attributes));
        attributes["channelMask"] = json!(["11"]);
        assert!(!validate(&attributes));
    }

    #[test]
    fn test_validate_rejects_bad_destination() {
        let mut attributes = wellformed();
        attributes["destination"] = json!("0800");
        assert!(!validate(&attributes));
        attributes.as_object_mut().unwrap().remove("destination");
        assert!(!validate(&attributes));
    }
}
