/**
 * MODÈLES DE DONNÉES - Structures centrales du kernel Meshion
 *
 * RÔLE : Définit les structures de données partagées entre tous les modules.
 * Types principaux : ExtAddr (identifiant stable d'un device), DiagTlv (unités
 * de diagnostic réseau Thread), DeviceInfo/NodeInfo (attributs des devices),
 * EnergyScanReport (résultats de scan d'énergie).
 *
 * UTILITÉ : Cohérence des données, sérialisation JSON, typage fort.
 */

use serde::Serialize;
use std::fmt;
use std::net::Ipv6Addr;

/// Locator 16 bits attribué par le réseau Thread.
/// Les 9 bits de poids faible à zéro identifient un routeur.
pub type Rloc16 = u16;

pub const ROUTER_RLOC_MASK: u16 = 0x1ff;

pub fn is_router_rloc(rloc: Rloc16) -> bool {
    rloc & ROUTER_RLOC_MASK == 0
}

/// Adresse étendue 8 octets (MAC EUI-64 ou IID), en hexadécimal minuscule côté API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExtAddr(pub [u8; 8]);

impl ExtAddr {
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(16);
        for b in self.0.iter() {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl fmt::Display for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ExtAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Mode de liaison d'un device Thread (TLV Mode)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMode {
    pub rx_on_when_idle: bool,
    pub device_type_ftd: bool,
    pub full_network_data: bool,
}

impl LinkMode {
    pub fn router() -> Self {
        Self {
            rx_on_when_idle: true,
            device_type_ftd: true,
            full_network_data: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderData {
    pub partition_id: u32,
    pub weighting: u8,
    pub data_version: u8,
    pub stable_data_version: u8,
    pub leader_router_id: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    pub parent_priority: i8,
    pub link_quality_3: u8,
    pub link_quality_2: u8,
    pub link_quality_1: u8,
    pub leader_cost: u8,
    pub id_sequence: u8,
    pub active_routers: u8,
    pub sed_buffer_size: u16,
    pub sed_datagram_count: u8,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub router_id: u8,
    pub link_quality_out: u8,
    pub link_quality_in: u8,
    pub route_cost: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteData {
    pub id_sequence: u8,
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MacCounters {
    pub if_in_unknown_protos: u32,
    pub if_in_errors: u32,
    pub if_out_errors: u32,
    pub if_in_ucast_pkts: u32,
    pub if_in_broadcast_pkts: u32,
    pub if_in_discards: u32,
    pub if_out_ucast_pkts: u32,
    pub if_out_broadcast_pkts: u32,
    pub if_out_discards: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MleCounters {
    pub disabled_role: u16,
    pub detached_role: u16,
    pub child_role: u16,
    pub router_role: u16,
    pub leader_role: u16,
    pub attach_attempts: u16,
    pub partition_id_changes: u16,
    pub better_partition_attach_attempts: u16,
    pub parent_changes: u16,
}

/// Entrée d'une table d'enfants d'un routeur (TLV 16), rapportée dans un DiagGet
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildTableEntry {
    pub child_id: u16,
    pub timeout: u32,
    pub mode: LinkMode,
}

/// Entrée d'enfant rapportée par une requête mesh-diag (TLV 29)
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildEntry {
    pub rloc16: Rloc16,
    pub ext_address: ExtAddr,
    pub rx_on_when_idle: bool,
    pub device_type_ftd: bool,
    pub full_network_data: bool,
    pub version: u16,
    pub timeout: u32,
    pub age: u32,
    pub link_quality_in: u8,
    pub average_rssi: i8,
}

/// Liste d'adresses IPv6 d'un enfant, rapportée par mesh-diag (TLV 30)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIp6Addrs {
    pub rloc16: Rloc16,
    pub addresses: Vec<Ipv6Addr>,
}

/// Voisin routeur rapporté par mesh-diag (TLV 31)
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterNeighborEntry {
    pub rloc16: Rloc16,
    pub ext_address: ExtAddr,
    pub version: u16,
    pub link_quality_in: u8,
    pub average_rssi: i8,
    pub last_rssi: i8,
    pub frame_error_rate: u16,
    pub message_error_rate: u16,
}

// identifiants numériques des TLV de diagnostic réseau Thread
pub const TLV_EXT_ADDRESS: u8 = 0;
pub const TLV_RLOC16: u8 = 1;
pub const TLV_MODE: u8 = 2;
pub const TLV_TIMEOUT: u8 = 3;
pub const TLV_CONNECTIVITY: u8 = 4;
pub const TLV_ROUTE: u8 = 5;
pub const TLV_LEADER_DATA: u8 = 6;
pub const TLV_NETWORK_DATA: u8 = 7;
pub const TLV_IP6_ADDR_LIST: u8 = 8;
pub const TLV_MAC_COUNTERS: u8 = 9;
pub const TLV_BATTERY_LEVEL: u8 = 14;
pub const TLV_SUPPLY_VOLTAGE: u8 = 15;
pub const TLV_CHILD_TABLE: u8 = 16;
pub const TLV_CHANNEL_PAGES: u8 = 17;
pub const TLV_MAX_CHILD_TIMEOUT: u8 = 19;
pub const TLV_LDEVID: u8 = 20;
pub const TLV_IDEV: u8 = 21;
pub const TLV_EUI64: u8 = 23;
pub const TLV_VERSION: u8 = 24;
pub const TLV_VENDOR_NAME: u8 = 25;
pub const TLV_VENDOR_MODEL: u8 = 26;
pub const TLV_VENDOR_SW_VERSION: u8 = 27;
pub const TLV_THREAD_STACK_VERSION: u8 = 28;
pub const TLV_CHILD: u8 = 29;
pub const TLV_CHILD_IP6_ADDR_LIST: u8 = 30;
pub const TLV_ROUTER_NEIGHBOR: u8 = 31;
pub const TLV_MLE_COUNTERS: u8 = 34;

/// Traduit un nom d'attribut de l'API en identifiant numérique de TLV.
/// Les noms sont sensibles à la casse, comme dans le schéma openapi.
pub fn tlv_type_from_name(name: &str) -> Option<u8> {
    let t = match name {
        "extAddress" => TLV_EXT_ADDRESS,
        "rloc16" => TLV_RLOC16,
        "mode" => TLV_MODE,
        "timeout" => TLV_TIMEOUT,
        "connectivity" => TLV_CONNECTIVITY,
        "route" => TLV_ROUTE,
        "leaderData" => TLV_LEADER_DATA,
        "networkData" => TLV_NETWORK_DATA,
        "ip6AddressList" => TLV_IP6_ADDR_LIST,
        "macCounters" => TLV_MAC_COUNTERS,
        "batteryLevel" => TLV_BATTERY_LEVEL,
        "supplyVoltage" => TLV_SUPPLY_VOLTAGE,
        "childTable" => TLV_CHILD_TABLE,
        "channelPages" => TLV_CHANNEL_PAGES,
        "maxChildTimeout" => TLV_MAX_CHILD_TIMEOUT,
        "ldevid" => TLV_LDEVID,
        "idev" => TLV_IDEV,
        "eui64" => TLV_EUI64,
        "version" => TLV_VERSION,
        "vendorName" => TLV_VENDOR_NAME,
        "vendorModel" => TLV_VENDOR_MODEL,
        "vendorSwVersion" => TLV_VENDOR_SW_VERSION,
        "threadStackVersion" => TLV_THREAD_STACK_VERSION,
        "children" => TLV_CHILD,
        "childrenIp6" => TLV_CHILD_IP6_ADDR_LIST,
        "neighbors" => TLV_ROUTER_NEIGHBOR,
        "mleCounters" => TLV_MLE_COUNTERS,
        _ => return None,
    };
    Some(t)
}

/// Les TLV 29..=33 ne passent pas par un DiagGet mais par des requêtes mesh-diag
pub fn is_query_tlv(tlv_type: u8) -> bool {
    (29..=33).contains(&tlv_type)
}

/// Une unité type-valeur d'une réponse de diagnostic réseau.
/// Au plus un TLV de chaque type par device dans un jeu accumulé.
#[derive(Debug, Clone)]
pub enum DiagTlv {
    ExtAddress(ExtAddr),
    Rloc16(Rloc16),
    Mode(LinkMode),
    Timeout(u32),
    Connectivity(Connectivity),
    Route(RouteData),
    LeaderData(LeaderData),
    NetworkData(String),
    Ip6AddressList(Vec<Ipv6Addr>),
    MacCounters(MacCounters),
    BatteryLevel(u8),
    SupplyVoltage(u16),
    ChildTable(Vec<ChildTableEntry>),
    ChannelPages(Vec<u8>),
    MaxChildTimeout(u32),
    Ldevid(String),
    Idev(String),
    Eui64(ExtAddr),
    Version(u16),
    VendorName(String),
    VendorModel(String),
    VendorSwVersion(String),
    ThreadStackVersion(String),
    MleCounters(MleCounters),
}

impl DiagTlv {
    pub fn type_id(&self) -> u8 {
        match self {
            DiagTlv::ExtAddress(_) => TLV_EXT_ADDRESS,
            DiagTlv::Rloc16(_) => TLV_RLOC16,
            DiagTlv::Mode(_) => TLV_MODE,
            DiagTlv::Timeout(_) => TLV_TIMEOUT,
            DiagTlv::Connectivity(_) => TLV_CONNECTIVITY,
            DiagTlv::Route(_) => TLV_ROUTE,
            DiagTlv::LeaderData(_) => TLV_LEADER_DATA,
            DiagTlv::NetworkData(_) => TLV_NETWORK_DATA,
            DiagTlv::Ip6AddressList(_) => TLV_IP6_ADDR_LIST,
            DiagTlv::MacCounters(_) => TLV_MAC_COUNTERS,
            DiagTlv::BatteryLevel(_) => TLV_BATTERY_LEVEL,
            DiagTlv::SupplyVoltage(_) => TLV_SUPPLY_VOLTAGE,
            DiagTlv::ChildTable(_) => TLV_CHILD_TABLE,
            DiagTlv::ChannelPages(_) => TLV_CHANNEL_PAGES,
            DiagTlv::MaxChildTimeout(_) => TLV_MAX_CHILD_TIMEOUT,
            DiagTlv::Ldevid(_) => TLV_LDEVID,
            DiagTlv::Idev(_) => TLV_IDEV,
            DiagTlv::Eui64(_) => TLV_EUI64,
            DiagTlv::Version(_) => TLV_VERSION,
            DiagTlv::VendorName(_) => TLV_VENDOR_NAME,
            DiagTlv::VendorModel(_) => TLV_VENDOR_MODEL,
            DiagTlv::VendorSwVersion(_) => TLV_VENDOR_SW_VERSION,
            DiagTlv::ThreadStackVersion(_) => TLV_THREAD_STACK_VERSION,
            DiagTlv::MleCounters(_) => TLV_MLE_COUNTERS,
        }
    }

    /// Nom d'attribut API correspondant au TLV
    pub fn type_name(&self) -> &'static str {
        match self {
            DiagTlv::ExtAddress(_) => "extAddress",
            DiagTlv::Rloc16(_) => "rloc16",
            DiagTlv::Mode(_) => "mode",
            DiagTlv::Timeout(_) => "timeout",
            DiagTlv::Connectivity(_) => "connectivity",
            DiagTlv::Route(_) => "route",
            DiagTlv::LeaderData(_) => "leaderData",
            DiagTlv::NetworkData(_) => "networkData",
            DiagTlv::Ip6AddressList(_) => "ip6AddressList",
            DiagTlv::MacCounters(_) => "macCounters",
            DiagTlv::BatteryLevel(_) => "batteryLevel",
            DiagTlv::SupplyVoltage(_) => "supplyVoltage",
            DiagTlv::ChildTable(_) => "childTable",
            DiagTlv::ChannelPages(_) => "channelPages",
            DiagTlv::MaxChildTimeout(_) => "maxChildTimeout",
            DiagTlv::Ldevid(_) => "ldevid",
            DiagTlv::Idev(_) => "idev",
            DiagTlv::Eui64(_) => "eui64",
            DiagTlv::Version(_) => "version",
            DiagTlv::VendorName(_) => "vendorName",
            DiagTlv::VendorModel(_) => "vendorModel",
            DiagTlv::VendorSwVersion(_) => "vendorSwVersion",
            DiagTlv::ThreadStackVersion(_) => "threadStackVersion",
            DiagTlv::MleCounters(_) => "mleCounters",
        }
    }

    /// Valeur JSON du TLV pour la sérialisation des items de diagnostic
    pub fn json_value(&self) -> serde_json::Value {
        match self {
            DiagTlv::ExtAddress(v) => serde_json::json!(v),
            DiagTlv::Rloc16(v) => serde_json::json!(format!("0x{:04x}", v)),
            DiagTlv::Mode(v) => serde_json::json!(v),
            DiagTlv::Timeout(v) => serde_json::json!(v),
            DiagTlv::Connectivity(v) => serde_json::json!(v),
            DiagTlv::Route(v) => serde_json::json!(v),
            DiagTlv::LeaderData(v) => serde_json::json!(v),
            DiagTlv::NetworkData(v) => serde_json::json!(v),
            DiagTlv::Ip6AddressList(v) => serde_json::json!(v),
            DiagTlv::MacCounters(v) => serde_json::json!(v),
            DiagTlv::BatteryLevel(v) => serde_json::json!(v),
            DiagTlv::SupplyVoltage(v) => serde_json::json!(v),
            DiagTlv::ChildTable(v) => serde_json::json!(v),
            DiagTlv::ChannelPages(v) => serde_json::json!(v),
            DiagTlv::MaxChildTimeout(v) => serde_json::json!(v),
            DiagTlv::Ldevid(v) => serde_json::json!(v),
            DiagTlv::Idev(v) => serde_json::json!(v),
            DiagTlv::Eui64(v) => serde_json::json!(v),
            DiagTlv::Version(v) => serde_json::json!(v),
            DiagTlv::VendorName(v) => serde_json::json!(v),
            DiagTlv::VendorModel(v) => serde_json::json!(v),
            DiagTlv::VendorSwVersion(v) => serde_json::json!(v),
            DiagTlv::ThreadStackVersion(v) => serde_json::json!(v),
            DiagTlv::MleCounters(v) => serde_json::json!(v),
        }
    }
}

/// Attributs d'un device Thread appris par le collecteur.
/// `needs_update` reste vrai tant que mleidiid, eui64 ou l'adresse OMR manquent.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub ext_address: ExtAddr,
    pub ml_eid_iid: ExtAddr,
    pub eui64: ExtAddr,
    pub omr_ipv6: Option<Ipv6Addr>,
    pub hostname: String,
    pub role: String,
    pub mode: LinkMode,
    pub needs_update: bool,
}

impl DeviceInfo {
    /// Vrai quand tous les attributs utiles ont été appris
    pub fn is_complete(&self) -> bool {
        !self.role.is_empty()
            && !self.ml_eid_iid.is_empty()
            && !self.eui64.is_empty()
            && self.omr_ipv6.is_some()
    }
}

/// Informations propres au noeud local (l'item threadBorderRouter)
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub ba_id: String,
    pub ba_state: String,
    pub role: String,
    pub rloc16: Rloc16,
    pub rloc_address: Option<Ipv6Addr>,
    pub router_count: u8,
    pub leader_data: LeaderData,
    pub network_name: String,
    pub ext_pan_id: String,
}

/// Drapeaux de rôle de service dérivés des adresses ALOC d'un device
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRoleFlags {
    pub is_leader: bool,
    pub is_primary_bbr: bool,
    pub hosts_service: bool,
    pub is_border_router: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketsAndBytes {
    pub packets: u64,
    pub bytes: u64,
}

/// Compteurs de routage de bordure du noeud local
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrCounters {
    pub inbound_unicast: PacketsAndBytes,
    pub inbound_multicast: PacketsAndBytes,
    pub outbound_unicast: PacketsAndBytes,
    pub outbound_multicast: PacketsAndBytes,
    pub ra_rx: u32,
    pub ra_tx_success: u32,
    pub ra_tx_failure: u32,
    pub rs_rx: u32,
    pub rs_tx_success: u32,
    pub rs_tx_failure: u32,
}

/// Résultat agrégé d'un scan d'énergie commissionné
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyScanReport {
    pub origin: ExtAddr,
    pub count: u8,
    pub report: Vec<EnergyReport>,
}

/// Mesures RSSI collectées sur un canal
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyReport {
    pub channel: u8,
    pub max_rssi: Vec<i8>,
}

/// Référence au résultat produit par une action terminée
#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_addr_hex() {
        let a = ExtAddr([0xaa, 0xbb, 0x00, 0x01, 0x02, 0x03, 0x04, 0xff]);
        assert_eq!(a.to_hex(), "aabb0001020304ff");
        assert!(!a.is_empty());
        assert!(ExtAddr::default().is_empty());
    }

    #[test]
    fn test_tlv_name_map() {
        assert_eq!(tlv_type_from_name("extAddress"), Some(0));
        assert_eq!(tlv_type_from_name("mleCounters"), Some(34));
        assert_eq!(tlv_type_from_name("children"), Some(29));
        // sensible à la casse
        assert_eq!(tlv_type_from_name("ExtAddress"), None);
        assert_eq!(tlv_type_from_name("bogus"), None);
    }

    #[test]
    fn test_query_tlv_split() {
        assert!(is_query_tlv(29));
        assert!(is_query_tlv(31));
        assert!(!is_query_tlv(28));
        assert!(!is_query_tlv(34));
    }

    #[test]
    fn test_router_rloc_mask() {
        assert!(is_router_rloc(0x0800));
        assert!(!is_router_rloc(0x0801));
        assert!(is_router_rloc(0x0000));
    }
}
