/**
 * COLLECTION DIAGNOSTICS - Items api/diagnostics
 *
 * RÔLE : Définit les items de la collection `diagnostics` : un item
 * `networkDiagnostics` par device ayant répondu à un cycle de collecte
 * (TLVs bruts + extensions locales + résultats mesh-diag du routeur),
 * et un item `energyScanReport` par scan d'énergie terminé.
 *
 * L'id d'un item est un uuid généré à l'insertion.
 */

use crate::collection::{filter_attributes, Collection, CollectionItem, ItemMeta, KeySet};
use crate::models::{
    BrCounters, ChildEntry, DeviceIp6Addrs, DiagTlv, EnergyScanReport, RouterNeighborEntry,
    ServiceRoleFlags,
};
use serde_json::{json, Map, Value};

pub const MAX_DIAG_COLLECTION_ITEMS: usize = 200;
pub const DIAG_COLLECTION_NAME: &str = "diagnostics";
pub const NWK_DIAG_TYPE_NAME: &str = "networkDiagnostics";
pub const ENERGY_SCAN_TYPE_NAME: &str = "energyScanReport";

/// Résultat d'un DiagGet vers un device, enrichi des extensions locales
/// et des réponses mesh-diag quand le device est un routeur
#[derive(Debug, Clone, Default)]
pub struct NetworkDiagnostics {
    pub tlvs: Vec<DiagTlv>,
    pub service_flags: Option<ServiceRoleFlags>,
    /// Compteurs de routage de bordure, uniquement pour le noeud local
    pub br_counters: Option<BrCounters>,
    pub children: Vec<ChildEntry>,
    pub children_ip6: Vec<DeviceIp6Addrs>,
    pub neighbors: Vec<RouterNeighborEntry>,
}

#[derive(Debug, Clone)]
pub enum DiagnosticPayload {
    Network(NetworkDiagnostics),
    EnergyScan(EnergyScanReport),
}

pub struct DiagnosticItem {
    meta: ItemMeta,
    pub payload: DiagnosticPayload,
}

impl DiagnosticItem {
    pub fn network(diag: NetworkDiagnostics) -> Self {
        Self {
            meta: ItemMeta::new(),
            payload: DiagnosticPayload::Network(diag),
        }
    }

    pub fn energy_scan(report: EnergyScanReport) -> Self {
        Self {
            meta: ItemMeta::new(),
            payload: DiagnosticPayload::EnergyScan(report),
        }
    }

    pub fn uuid(&self) -> String {
        self.meta.uuid.to_string()
    }
}

impl CollectionItem for DiagnosticItem {
    fn item_id(&self) -> String {
        self.meta.uuid.to_string()
    }

    fn type_name(&self) -> &'static str {
        match &self.payload {
            DiagnosticPayload::Network(_) => NWK_DIAG_TYPE_NAME,
            DiagnosticPayload::EnergyScan(_) => ENERGY_SCAN_TYPE_NAME,
        }
    }

    fn attributes(&self, keys: &KeySet) -> Value {
        let mut attrs = Map::new();

        match &self.payload {
            DiagnosticPayload::Network(diag) => {
                // un attribut par TLV, nommé comme dans le schéma de l'API
                for tlv in &diag.tlvs {
                    attrs.insert(tlv.type_name().into(), tlv.json_value());
                }
                if let Some(flags) = &diag.service_flags {
                    attrs.insert("serviceRoleFlags".into(), json!(flags));
                }
                if let Some(counters) = &diag.br_counters {
                    attrs.insert("brCounters".into(), json!(counters));
                }
                if !diag.children.is_empty() {
                    attrs.insert("children".into(), json!(diag.children));
                }
                if !diag.children_ip6.is_empty() {
                    attrs.insert("childrenIp6".into(), json!(diag.children_ip6));
                }
                if !diag.neighbors.is_empty() {
                    attrs.insert("neighbors".into(), json!(diag.neighbors));
                }
            }
            DiagnosticPayload::EnergyScan(report) => {
                attrs.insert("origin".into(), json!(report.origin));
                attrs.insert("count".into(), json!(report.count));
                attrs.insert("report".into(), json!(report.report));
            }
        }

        filter_attributes(Value::Object(attrs), keys)
    }

    fn meta(&self) -> &ItemMeta {
        &self.meta
    }
}

pub type DiagnosticsCollection = Collection<DiagnosticItem>;

pub fn new_diagnostics_collection() -> DiagnosticsCollection {
    Collection::new(DIAG_COLLECTION_NAME, MAX_DIAG_COLLECTION_ITEMS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtAddr;

    #[test]
    fn test_network_diag_rendering() {
        let diag = NetworkDiagnostics {
            tlvs: vec![
                DiagTlv::ExtAddress(ExtAddr([0xaa; 8])),
                DiagTlv::Rloc16(0x0800),
            ],
            service_flags: Some(ServiceRoleFlags {
                is_leader: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let item = DiagnosticItem::network(diag);

        assert_eq!(item.type_name(), NWK_DIAG_TYPE_NAME);
        let attrs = item.attributes(&KeySet::new());
        assert_eq!(attrs["extAddress"], "aaaaaaaaaaaaaaaa");
        assert_eq!(attrs["rloc16"], "0x0800");
        assert_eq!(attrs["serviceRoleFlags"]["isLeader"], true);
        // vecteurs vides absents du rendu
        assert!(attrs.get("children").is_none());
        assert!(attrs.get("neighbors").is_none());
    }

    #[test]
    fn test_energy_scan_rendering() {
        let report = EnergyScanReport {
            origin: ExtAddr([1; 8]),
            count: 2,
            report: vec![crate::models::EnergyReport {
                channel: 11,
                max_rssi: vec![-60, -61],
            }],
        };
        let item = DiagnosticItem::energy_scan(report);

        assert_eq!(item.type_name(), ENERGY_SCAN_TYPE_NAME);
        let attrs = item.attributes(&KeySet::new());
        assert_eq!(attrs["count"], 2);
        assert_eq!(attrs["report"][0]["channel"], 11);
        assert_eq!(attrs["report"][0]["maxRssi"][0], -60);
    }

    #[test]
    fn test_item_id_is_uuid() {
        let item = DiagnosticItem::network(NetworkDiagnostics::default());
        assert_eq!(item.item_id(), item.uuid());
        assert_eq!(item.item_id().len(), 36);
    }
}
