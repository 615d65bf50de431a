/*!
Mock Thread Client pour développement sans NCP

Permet de développer et tester le kernel sans co-processeur Thread réel.
Enregistre toutes les requêtes émises (DiagGet, mesh-diag, commissioner)
et permet de scripter l'état local du noeud ainsi que la simulation des
réponses asynchrones.
*/

use meshion_kernel::models::{BrCounters, ExtAddr, LeaderData, Rloc16};
use meshion_kernel::thread::{
    BorderAgentState, CommissionerState, DeviceRole, EventReceiver, EventSender, ExternalRoute,
    RouterInfo, SrpHost, ThreadApi, ThreadError, ThreadEvent,
};
use parking_lot::Mutex;
use std::net::Ipv6Addr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Requête de scan d'énergie enregistrée par le mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyScanRequest {
    pub channel_mask: u32,
    pub count: u8,
    pub period: u16,
    pub scan_duration: u16,
    pub dest: Ipv6Addr,
}

struct MockState {
    // état local scripté
    mesh_local_prefix: [u8; 8],
    rloc16: Rloc16,
    rloc_address: Ipv6Addr,
    ext_address: ExtAddr,
    device_role: DeviceRole,
    leader_data: LeaderData,
    network_name: String,
    ext_pan_id: String,
    border_agent_id: String,
    border_agent_state: BorderAgentState,
    br_counters: BrCounters,
    routers: Vec<RouterInfo>,
    srp_hosts: Vec<SrpHost>,
    external_routes: Vec<ExternalRoute>,
    realm_local_all_nodes: Ipv6Addr,
    commissioner_state: CommissionerState,

    // requêtes enregistrées pour les assertions de tests
    sent_diag_gets: Vec<(Ipv6Addr, Vec<u8>)>,
    sent_diag_resets: Vec<(Ipv6Addr, Vec<u8>)>,
    child_table_queries: Vec<Rloc16>,
    child_ip6_queries: Vec<Rloc16>,
    neighbor_queries: Vec<Rloc16>,
    added_joiners: Vec<(Option<ExtAddr>, String, u32)>,
    removed_joiners: Vec<Option<ExtAddr>>,
    energy_scans: Vec<EnergyScanRequest>,
    commissioner_starts: usize,
    commissioner_stops: usize,

    // injection d'erreurs
    diag_get_error: Option<ThreadError>,
    query_error: Option<ThreadError>,

    event_sender: Option<EventSender>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            mesh_local_prefix: [0; 8],
            rloc16: 0xfffe,
            rloc_address: Ipv6Addr::UNSPECIFIED,
            ext_address: ExtAddr::default(),
            device_role: DeviceRole::Disabled,
            leader_data: LeaderData::default(),
            network_name: String::new(),
            ext_pan_id: String::new(),
            border_agent_id: String::new(),
            border_agent_state: BorderAgentState::Stopped,
            br_counters: BrCounters::default(),
            routers: Vec::new(),
            srp_hosts: Vec::new(),
            external_routes: Vec::new(),
            realm_local_all_nodes: Ipv6Addr::UNSPECIFIED,
            commissioner_state: CommissionerState::Disabled,
            sent_diag_gets: Vec::new(),
            sent_diag_resets: Vec::new(),
            child_table_queries: Vec::new(),
            child_ip6_queries: Vec::new(),
            neighbor_queries: Vec::new(),
            added_joiners: Vec::new(),
            removed_joiners: Vec::new(),
            energy_scans: Vec::new(),
            commissioner_starts: 0,
            commissioner_stops: 0,
            diag_get_error: None,
            query_error: None,
            event_sender: None,
        }
    }
}

/// Pile Thread simulée, clonable et partageable entre le test et le kernel
#[derive(Clone)]
pub struct MockThreadClient {
    inner: Arc<Mutex<MockState>>,
}

impl MockThreadClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Configuration d'un channel pour pousser des événements simulés
    pub fn setup_receiver(&self) -> EventReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.lock().event_sender = Some(sender);
        receiver
    }

    /// Simule un événement asynchrone de la pile
    pub fn simulate_event(&self, event: ThreadEvent) {
        if let Some(sender) = self.inner.lock().event_sender.as_ref() {
            if sender.send(event).is_err() {
                log::warn!("[MOCK] event receiver dropped");
            }
        }
    }

    // ------ scripting de l'état local ------

    pub fn set_mesh_local_prefix(&self, prefix: [u8; 8]) {
        self.inner.lock().mesh_local_prefix = prefix;
    }

    pub fn set_rloc16(&self, rloc16: Rloc16) {
        self.inner.lock().rloc16 = rloc16;
    }

    pub fn set_rloc_address(&self, address: Ipv6Addr) {
        self.inner.lock().rloc_address = address;
    }

    pub fn set_ext_address(&self, ext_address: ExtAddr) {
        self.inner.lock().ext_address = ext_address;
    }

    pub fn set_device_role(&self, role: DeviceRole) {
        self.inner.lock().device_role = role;
    }

    pub fn set_network_name(&self, name: &str) {
        self.inner.lock().network_name = name.to_string();
    }

    pub fn set_realm_local_all_thread_nodes(&self, address: Ipv6Addr) {
        self.inner.lock().realm_local_all_nodes = address;
    }

    pub fn add_router(&self, router_id: u8, rloc16: Rloc16, ext_address: ExtAddr) {
        self.inner.lock().routers.push(RouterInfo {
            router_id,
            rloc16,
            ext_address,
        });
    }

    pub fn clear_routers(&self) {
        self.inner.lock().routers.clear();
    }

    pub fn add_srp_host(&self, full_name: &str, addresses: Vec<Ipv6Addr>) {
        self.inner.lock().srp_hosts.push(SrpHost {
            full_name: full_name.to_string(),
            deleted: false,
            addresses,
        });
    }

    pub fn add_external_route(&self, rloc16: Rloc16) {
        self.inner.lock().external_routes.push(ExternalRoute {
            rloc16,
            stable: true,
        });
    }

    pub fn set_commissioner_state(&self, state: CommissionerState) {
        self.inner.lock().commissioner_state = state;
    }

    pub fn set_diag_get_error(&self, error: Option<ThreadError>) {
        self.inner.lock().diag_get_error = error;
    }

    pub fn set_query_error(&self, error: Option<ThreadError>) {
        self.inner.lock().query_error = error;
    }

    // ------ assertions de tests ------

    pub fn sent_diag_gets(&self) -> Vec<(Ipv6Addr, Vec<u8>)> {
        self.inner.lock().sent_diag_gets.clone()
    }

    pub fn sent_diag_resets(&self) -> Vec<(Ipv6Addr, Vec<u8>)> {
        self.inner.lock().sent_diag_resets.clone()
    }

    pub fn sent_child_table_queries(&self) -> Vec<Rloc16> {
        self.inner.lock().child_table_queries.clone()
    }

    pub fn sent_child_ip6_queries(&self) -> Vec<Rloc16> {
        self.inner.lock().child_ip6_queries.clone()
    }

    pub fn sent_neighbor_queries(&self) -> Vec<Rloc16> {
        self.inner.lock().neighbor_queries.clone()
    }

    pub fn added_joiners(&self) -> Vec<(Option<ExtAddr>, String, u32)> {
        self.inner.lock().added_joiners.clone()
    }

    pub fn removed_joiners(&self) -> Vec<Option<ExtAddr>> {
        self.inner.lock().removed_joiners.clone()
    }

    pub fn energy_scans(&self) -> Vec<EnergyScanRequest> {
        self.inner.lock().energy_scans.clone()
    }

    pub fn commissioner_starts(&self) -> usize {
        self.inner.lock().commissioner_starts
    }

    pub fn commissioner_stops(&self) -> usize {
        self.inner.lock().commissioner_stops
    }

    /// Reset des requêtes enregistrées
    pub fn clear_recorded(&self) {
        let mut state = self.inner.lock();
        state.sent_diag_gets.clear();
        state.sent_diag_resets.clear();
        state.child_table_queries.clear();
        state.child_ip6_queries.clear();
        state.neighbor_queries.clear();
        state.added_joiners.clear();
        state.removed_joiners.clear();
        state.energy_scans.clear();
    }
}

impl Default for MockThreadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadApi for MockThreadClient {
    fn send_diagnostic_get(&self, dest: Ipv6Addr, tlv_types: &[u8]) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        if let Some(error) = state.diag_get_error.clone() {
            return Err(error);
        }
        log::info!("[MOCK] DiagGet to {} ({} TLVs)", dest, tlv_types.len());
        state.sent_diag_gets.push((dest, tlv_types.to_vec()));
        Ok(())
    }

    fn send_diagnostic_reset(&self, dest: Ipv6Addr, tlv_types: &[u8]) -> Result<(), ThreadError> {
        log::info!("[MOCK] DiagReset to {}", dest);
        self.inner
            .lock()
            .sent_diag_resets
            .push((dest, tlv_types.to_vec()));
        Ok(())
    }

    fn query_child_table(&self, rloc16: Rloc16) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        if let Some(error) = state.query_error.clone() {
            return Err(error);
        }
        state.child_table_queries.push(rloc16);
        Ok(())
    }

    fn query_child_ip6_addrs(&self, rloc16: Rloc16) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        if let Some(error) = state.query_error.clone() {
            return Err(error);
        }
        state.child_ip6_queries.push(rloc16);
        Ok(())
    }

    fn query_router_neighbors(&self, rloc16: Rloc16) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        if let Some(error) = state.query_error.clone() {
            return Err(error);
        }
        state.neighbor_queries.push(rloc16);
        Ok(())
    }

    fn router_info(&self, router_id: u8) -> Option<RouterInfo> {
        self.inner
            .lock()
            .routers
            .iter()
            .find(|r| r.router_id == router_id)
            .copied()
    }

    fn max_router_id(&self) -> u8 {
        62
    }

    fn mesh_local_prefix(&self) -> [u8; 8] {
        self.inner.lock().mesh_local_prefix
    }

    fn rloc16(&self) -> Rloc16 {
        self.inner.lock().rloc16
    }

    fn rloc_address(&self) -> Ipv6Addr {
        self.inner.lock().rloc_address
    }

    fn ext_address(&self) -> ExtAddr {
        self.inner.lock().ext_address
    }

    fn device_role(&self) -> DeviceRole {
        self.inner.lock().device_role
    }

    fn leader_data(&self) -> LeaderData {
        self.inner.lock().leader_data
    }

    fn network_name(&self) -> String {
        self.inner.lock().network_name.clone()
    }

    fn ext_pan_id(&self) -> String {
        self.inner.lock().ext_pan_id.clone()
    }

    fn border_agent_id(&self) -> String {
        self.inner.lock().border_agent_id.clone()
    }

    fn border_agent_state(&self) -> BorderAgentState {
        self.inner.lock().border_agent_state
    }

    fn border_routing_counters(&self) -> BrCounters {
        self.inner.lock().br_counters
    }

    fn external_routes(&self) -> Vec<ExternalRoute> {
        self.inner.lock().external_routes.clone()
    }

    fn srp_hosts(&self) -> Vec<SrpHost> {
        self.inner.lock().srp_hosts.clone()
    }

    fn realm_local_all_thread_nodes(&self) -> Ipv6Addr {
        self.inner.lock().realm_local_all_nodes
    }

    fn commissioner_state(&self) -> CommissionerState {
        self.inner.lock().commissioner_state
    }

    fn commissioner_start(&self) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        state.commissioner_starts += 1;
        if state.commissioner_state == CommissionerState::Disabled {
            state.commissioner_state = CommissionerState::Petition;
        }
        log::info!("[MOCK] commissioner start requested");
        Ok(())
    }

    fn commissioner_stop(&self) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        state.commissioner_stops += 1;
        state.commissioner_state = CommissionerState::Disabled;
        log::info!("[MOCK] commissioner stopped");
        Ok(())
    }

    fn commissioner_add_joiner(
        &self,
        eui64: Option<ExtAddr>,
        pskd: &str,
        timeout_s: u32,
    ) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        if state.commissioner_state != CommissionerState::Active {
            return Err(ThreadError::InvalidState);
        }
        state
            .added_joiners
            .push((eui64, pskd.to_string(), timeout_s));
        Ok(())
    }

    fn commissioner_remove_joiner(&self, eui64: Option<ExtAddr>) -> Result<(), ThreadError> {
        self.inner.lock().removed_joiners.push(eui64);
        Ok(())
    }

    fn commissioner_energy_scan(
        &self,
        channel_mask: u32,
        count: u8,
        period: u16,
        scan_duration: u16,
        dest: Ipv6Addr,
    ) -> Result<(), ThreadError> {
        let mut state = self.inner.lock();
        if state.commissioner_state != CommissionerState::Active {
            return Err(ThreadError::InvalidState);
        }
        state.energy_scans.push(EnergyScanRequest {
            channel_mask,
            count,
            period,
            scan_duration,
            dest,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_diag_gets() {
        let client = MockThreadClient::new();
        let dest: Ipv6Addr = "fd00::1".parse().unwrap();

        client.send_diagnostic_get(dest, &[0, 1, 8]).unwrap();
        let sent = client.sent_diag_gets();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, dest);
        assert_eq!(sent[0].1, vec![0, 1, 8]);
    }

    #[test]
    fn test_mock_diag_get_error_injection() {
        let client = MockThreadClient::new();
        client.set_diag_get_error(Some(ThreadError::NoBufs));

        let result = client.send_diagnostic_get("fd00::1".parse().unwrap(), &[0]);
        assert_eq!(result, Err(ThreadError::NoBufs));
        assert!(client.sent_diag_gets().is_empty());
    }

    #[test]
    fn test_mock_commissioner_lifecycle() {
        let client = MockThreadClient::new();
        assert_eq!(client.commissioner_state(), CommissionerState::Disabled);

        // l'ajout d'un joiner exige un commissioner actif
        assert_eq!(
            client.commissioner_add_joiner(None, "J01NME", 60),
            Err(ThreadError::InvalidState)
        );

        client.commissioner_start().unwrap();
        assert_eq!(client.commissioner_state(), CommissionerState::Petition);
        client.set_commissioner_state(CommissionerState::Active);
        client
            .commissioner_add_joiner(Some(ExtAddr([1; 8])), "J01NME", 60)
            .unwrap();
        assert_eq!(client.added_joiners().len(), 1);

        client.commissioner_stop().unwrap();
        assert_eq!(client.commissioner_state(), CommissionerState::Disabled);
        assert_eq!(client.commissioner_stops(), 1);
    }

    #[test]
    fn test_mock_router_table() {
        let client = MockThreadClient::new();
        client.add_router(2, 0x0800, ExtAddr([0xbb; 8]));

        assert!(client.router_info(2).is_some());
        assert!(client.router_info(3).is_none());
        assert_eq!(client.router_info(2).unwrap().rloc16, 0x0800);
    }
}
