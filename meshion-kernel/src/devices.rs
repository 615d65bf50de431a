/**
 * COLLECTION DEVICES - Items api/devices et leurs attributs
 *
 * RÔLE : Définit les items de la collection `devices` : un item générique
 * `threadDevice` par device du réseau, et un item `threadBorderRouter` pour
 * ce noeud qui porte en plus les informations locales (border agent, leader
 * data, nom du réseau).
 *
 * L'id d'un item est l'adresse étendue en hexadécimal minuscule. Le rendu
 * est creux : les attributs vides ou inconnus ne sont pas sérialisés.
 */

use crate::collection::{filter_attributes, Collection, CollectionItem, ItemMeta, KeySet};
use crate::models::{DeviceInfo, ExtAddr, LinkMode, NodeInfo};
use serde_json::{json, Map, Value};
use std::net::Ipv6Addr;

pub const MAX_DEVICES_COLLECTION_ITEMS: usize = 200;
pub const DEVICE_COLLECTION_NAME: &str = "devices";
pub const DEVICE_TYPE_NAME: &str = "threadDevice";
pub const DEVICE_BR_TYPE_NAME: &str = "threadBorderRouter";

/// Un device de la collection. `node` est renseigné uniquement pour
/// l'item qui représente ce border router.
pub struct DeviceItem {
    meta: ItemMeta,
    item_id: String,
    pub info: DeviceInfo,
    pub node: Option<NodeInfo>,
}

impl DeviceItem {
    pub fn new(ext_addr_hex: String, info: DeviceInfo) -> Self {
        Self {
            meta: ItemMeta::new(),
            item_id: ext_addr_hex,
            info,
            node: None,
        }
    }

    pub fn new_this_device(ext_addr_hex: String, info: DeviceInfo, node: NodeInfo) -> Self {
        Self {
            meta: ItemMeta::new(),
            item_id: ext_addr_hex,
            info,
            node: Some(node),
        }
    }

    pub fn set_eui64(&mut self, eui64: ExtAddr) {
        self.info.eui64 = eui64;
        self.meta.touch();
    }

    pub fn set_ml_eid_iid(&mut self, iid: ExtAddr) {
        self.info.ml_eid_iid = iid;
        self.meta.touch();
    }

    pub fn set_omr_ipv6(&mut self, addr: Ipv6Addr) {
        self.info.omr_ipv6 = Some(addr);
        self.meta.touch();
    }

    pub fn set_hostname(&mut self, hostname: String) {
        self.info.hostname = hostname;
        self.meta.touch();
    }

    pub fn set_role(&mut self, role: String) {
        self.info.role = role;
        self.meta.touch();
    }

    pub fn set_mode(&mut self, mode: LinkMode) {
        self.info.mode = mode;
        self.meta.touch();
    }

    pub fn set_needs_update(&mut self, needs_update: bool) {
        self.info.needs_update = needs_update;
        self.meta.touch();
    }
}

impl CollectionItem for DeviceItem {
    fn item_id(&self) -> String {
        self.item_id.clone()
    }

    fn type_name(&self) -> &'static str {
        if self.node.is_some() {
            DEVICE_BR_TYPE_NAME
        } else {
            DEVICE_TYPE_NAME
        }
    }

    fn attributes(&self, keys: &KeySet) -> Value {
        let mut attrs = Map::new();

        attrs.insert("extAddress".into(), json!(self.info.ext_address));
        if !self.info.ml_eid_iid.is_empty() {
            attrs.insert("mlEidIid".into(), json!(self.info.ml_eid_iid));
        }
        if !self.info.eui64.is_empty() {
            attrs.insert("eui64".into(), json!(self.info.eui64));
        }
        if let Some(addr) = self.info.omr_ipv6 {
            attrs.insert("omrIpv6Address".into(), json!(addr));
        }
        if !self.info.hostname.is_empty() {
            attrs.insert("hostName".into(), json!(self.info.hostname));
        }
        if !self.info.role.is_empty() {
            attrs.insert("role".into(), json!(self.info.role));
        }
        attrs.insert("mode".into(), json!(self.info.mode));
        attrs.insert("needsUpdate".into(), json!(self.info.needs_update));

        if let Some(node) = &self.node {
            attrs.insert("baId".into(), json!(node.ba_id));
            attrs.insert("baState".into(), json!(node.ba_state));
            attrs.insert("nodeRole".into(), json!(node.role));
            attrs.insert("rloc16".into(), json!(format!("0x{:04x}", node.rloc16)));
            if let Some(rloc) = node.rloc_address {
                attrs.insert("rlocAddress".into(), json!(rloc));
            }
            attrs.insert("routerCount".into(), json!(node.router_count));
            attrs.insert("leaderData".into(), json!(node.leader_data));
            attrs.insert("networkName".into(), json!(node.network_name));
            if !node.ext_pan_id.is_empty() {
                attrs.insert("extPanId".into(), json!(node.ext_pan_id));
            }
        }

        filter_attributes(Value::Object(attrs), keys)
    }

    fn meta(&self) -> &ItemMeta {
        &self.meta
    }
}

pub type DevicesCollection = Collection<DeviceItem>;

pub fn new_devices_collection() -> DevicesCollection {
    Collection::new(DEVICE_COLLECTION_NAME, MAX_DEVICES_COLLECTION_ITEMS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_info() -> DeviceInfo {
        DeviceInfo {
            ext_address: ExtAddr([0xaa; 8]),
            role: "router".into(),
            mode: LinkMode::router(),
            needs_update: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_sparse_rendering() {
        let item = DeviceItem::new("aaaaaaaaaaaaaaaa".into(), some_info());
        let attrs = item.attributes(&KeySet::new());

        assert_eq!(attrs["extAddress"], "aaaaaaaaaaaaaaaa");
        assert_eq!(attrs["role"], "router");
        assert_eq!(attrs["needsUpdate"], false);
        // attributs inconnus absents du rendu
        assert!(attrs.get("eui64").is_none());
        assert!(attrs.get("mlEidIid").is_none());
        assert!(attrs.get("hostName").is_none());
    }

    #[test]
    fn test_setters_touch_updated() {
        let mut item = DeviceItem::new("aaaaaaaaaaaaaaaa".into(), some_info());
        assert_eq!(item.meta().created, item.meta().updated);

        item.set_eui64(ExtAddr([1; 8]));
        assert!(item.meta().updated >= item.meta().created);
        let attrs = item.attributes(&KeySet::new());
        assert_eq!(attrs["eui64"], "0101010101010101");
    }

    #[test]
    fn test_this_device_type_name() {
        let item = DeviceItem::new("aaaaaaaaaaaaaaaa".into(), some_info());
        assert_eq!(item.type_name(), DEVICE_TYPE_NAME);

        let this = DeviceItem::new_this_device(
            "bbbbbbbbbbbbbbbb".into(),
            some_info(),
            NodeInfo {
                network_name: "meshion-test".into(),
                rloc16: 0x0800,
                ..Default::default()
            },
        );
        assert_eq!(this.type_name(), DEVICE_BR_TYPE_NAME);
        let attrs = this.attributes(&KeySet::new());
        assert_eq!(attrs["networkName"], "meshion-test");
        assert_eq!(attrs["rloc16"], "0x0800");
    }
}
