/*!
Constructeurs de scénarios de test

Helpers pour fabriquer des corps de soumission d'actions et des jeux de
TLVs conformes au schéma de l'API, sans répéter du JSON dans chaque test.
*/

use meshion_kernel::models::{DiagTlv, ExtAddr};
use serde_json::{json, Value};
use std::net::Ipv6Addr;

/// Corps de POST /api/actions
pub fn actions_body(tasks: Vec<Value>) -> Value {
    json!({ "data": tasks })
}

pub fn add_device_task(eui: &str, pskd: &str, timeout: u64) -> Value {
    json!({
        "type": "addThreadDeviceTask",
        "attributes": {
            "eui": eui,
            "pskd": pskd,
            "timeout": timeout,
        }
    })
}

pub fn network_diag_task(destination: &str, types: &[&str], timeout: u64) -> Value {
    json!({
        "type": "getNetworkDiagnosticTask",
        "attributes": {
            "destination": destination,
            "types": types,
            "timeout": timeout,
        }
    })
}

pub fn reset_counters_task(types: &[&str], timeout: u64) -> Value {
    json!({
        "type": "resetNetworkDiagCounterTask",
        "attributes": {
            "types": types,
            "timeout": timeout,
        }
    })
}

pub fn energy_scan_task(
    destination: &str,
    channel_mask: &[u8],
    count: u8,
    period: u16,
    scan_duration: u16,
    timeout: u64,
) -> Value {
    json!({
        "type": "getEnergyScanTask",
        "attributes": {
            "destination": destination,
            "channelMask": channel_mask,
            "count": count,
            "period": period,
            "scanDuration": scan_duration,
            "timeout": timeout,
        }
    })
}

/// Jeu de TLVs minimal d'une réponse DiagGet d'un device
pub fn diag_response(ext_address: ExtAddr, rloc16: u16, addresses: Vec<Ipv6Addr>) -> Vec<DiagTlv> {
    vec![
        DiagTlv::ExtAddress(ext_address),
        DiagTlv::Rloc16(rloc16),
        DiagTlv::Ip6AddressList(addresses),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builders_shape() {
        let body = actions_body(vec![add_device_task("aabbccddeeff0011", "J01NME", 120)]);
        assert_eq!(body["data"][0]["type"], "addThreadDeviceTask");
        assert_eq!(body["data"][0]["attributes"]["eui"], "aabbccddeeff0011");

        let scan = energy_scan_task("0000000000000001", &[11, 12], 2, 200, 100, 60);
        assert_eq!(scan["attributes"]["channelMask"][1], 12);
    }
}
