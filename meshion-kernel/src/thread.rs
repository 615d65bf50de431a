/**
 * THREAD API ADAPTER - Façade synchrone vers la pile Thread (NCP)
 *
 * RÔLE :
 * Ce module définit la frontière entre le kernel et le co-processeur réseau.
 * Les envois (DiagGet, mesh-diag, commissioner) retournent immédiatement et
 * les réponses reviennent plus tard sous forme de ThreadEvent sur la boucle
 * moteur, via un channel mpsc.
 *
 * FONCTIONNEMENT :
 * - trait ThreadApi = contrat d'interface, un seul appelant (la boucle)
 * - ThreadEvent = callbacks transformés en messages
 * - StubThreadClient = implémentation de repli tant que le binding NCP
 *   n'est pas livré (les envois échouent proprement)
 *
 * Les tests utilisent le MockThreadClient du devkit.
 */

use crate::models::{
    BrCounters, ChildEntry, DeviceIp6Addrs, DiagTlv, ExtAddr, LeaderData, Rloc16,
    RouterNeighborEntry,
};
use serde::Serialize;
use std::net::Ipv6Addr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Erreurs remontées par la pile Thread
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreadError {
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("invalid state")]
    InvalidState,
    #[error("busy")]
    Busy,
    #[error("no message buffers available")]
    NoBufs,
    #[error("not found")]
    NotFound,
    #[error("already in requested state")]
    Already,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("response timeout")]
    ResponseTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceRole {
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Disabled => "disabled",
            DeviceRole::Detached => "detached",
            DeviceRole::Child => "child",
            DeviceRole::Router => "router",
            DeviceRole::Leader => "leader",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionerState {
    Disabled,
    Petition,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderAgentState {
    Stopped,
    Started,
    Active,
}

impl BorderAgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorderAgentState::Stopped => "stopped",
            BorderAgentState::Started => "started",
            BorderAgentState::Active => "active",
        }
    }
}

/// Evénements joiner relayés par le commissioner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerEventKind {
    Start,
    Connected,
    Finalize,
    End,
    Removed,
}

/// Entrée de la table des routeurs locale
#[derive(Debug, Clone, Copy)]
pub struct RouterInfo {
    pub router_id: u8,
    pub rloc16: Rloc16,
    pub ext_address: ExtAddr,
}

/// Host enregistré auprès du serveur SRP local
#[derive(Debug, Clone)]
pub struct SrpHost {
    pub full_name: String,
    pub deleted: bool,
    pub addresses: Vec<Ipv6Addr>,
}

/// Origine de route publiée dans la network data locale
#[derive(Debug, Clone, Copy)]
pub struct ExternalRoute {
    pub rloc16: Rloc16,
    pub stable: bool,
}

/// Réponses asynchrones de la pile, consommées par la boucle moteur.
/// Un événement arrivé après annulation d'un cycle est simplement ignoré
/// (le collecteur vérifie sa phase et le rloc de la requête courante).
#[derive(Debug, Clone)]
pub enum ThreadEvent {
    DiagGetResponse { tlvs: Vec<DiagTlv> },
    DiagGetFailed { error: ThreadError },
    ChildTableEntry { parent: Rloc16, entry: ChildEntry },
    ChildTableDone { parent: Rloc16, timed_out: bool },
    ChildIp6Addrs { parent: Rloc16, child: DeviceIp6Addrs },
    ChildIp6Done { parent: Rloc16, timed_out: bool },
    NeighborEntry { parent: Rloc16, entry: RouterNeighborEntry },
    NeighborDone { parent: Rloc16, timed_out: bool },
    CommissionerState(CommissionerState),
    Joiner { event: JoinerEventKind, eui64: ExtAddr },
    EnergyReport { channel_mask: u32, energy_list: Vec<i8> },
}

pub type EventSender = mpsc::UnboundedSender<ThreadEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ThreadEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Façade synchrone vers la pile Thread. Un singleton par agent,
/// appelé uniquement depuis la boucle moteur.
pub trait ThreadApi: Send + Sync {
    // requêtes de diagnostic
    fn send_diagnostic_get(&self, dest: Ipv6Addr, tlv_types: &[u8]) -> Result<(), ThreadError>;
    fn send_diagnostic_reset(&self, dest: Ipv6Addr, tlv_types: &[u8]) -> Result<(), ThreadError>;

    // requêtes mesh-diag, résultats en flux d'événements
    fn query_child_table(&self, rloc16: Rloc16) -> Result<(), ThreadError>;
    fn query_child_ip6_addrs(&self, rloc16: Rloc16) -> Result<(), ThreadError>;
    fn query_router_neighbors(&self, rloc16: Rloc16) -> Result<(), ThreadError>;

    // état local du noeud
    fn router_info(&self, router_id: u8) -> Option<RouterInfo>;
    fn max_router_id(&self) -> u8;
    fn mesh_local_prefix(&self) -> [u8; 8];
    fn rloc16(&self) -> Rloc16;
    fn rloc_address(&self) -> Ipv6Addr;
    fn ext_address(&self) -> ExtAddr;
    fn device_role(&self) -> DeviceRole;
    fn leader_data(&self) -> LeaderData;
    fn network_name(&self) -> String;
    fn ext_pan_id(&self) -> String;
    fn border_agent_id(&self) -> String;
    fn border_agent_state(&self) -> BorderAgentState;
    fn border_routing_counters(&self) -> BrCounters;
    fn external_routes(&self) -> Vec<ExternalRoute>;
    fn srp_hosts(&self) -> Vec<SrpHost>;
    fn realm_local_all_thread_nodes(&self) -> Ipv6Addr;

    // commissioner
    fn commissioner_state(&self) -> CommissionerState;
    fn commissioner_start(&self) -> Result<(), ThreadError>;
    fn commissioner_stop(&self) -> Result<(), ThreadError>;
    fn commissioner_add_joiner(
        &self,
        eui64: Option<ExtAddr>,
        pskd: &str,
        timeout_s: u32,
    ) -> Result<(), ThreadError>;
    fn commissioner_remove_joiner(&self, eui64: Option<ExtAddr>) -> Result<(), ThreadError>;
    fn commissioner_energy_scan(
        &self,
        channel_mask: u32,
        count: u8,
        period: u16,
        scan_duration: u16,
        dest: Ipv6Addr,
    ) -> Result<(), ThreadError>;
}

pub type SharedThreadApi = Arc<dyn ThreadApi>;

/// Client de repli quand aucun transport NCP n'est configuré.
/// Les getters retournent des valeurs vides et tous les envois échouent,
/// l'agent démarre quand même et sert ses collections.
pub struct StubThreadClient;

impl StubThreadClient {
    pub fn new() -> Self {
        eprintln!("[thread] no NCP transport configured, using stub client");
        Self
    }

    fn unavailable(&self) -> Result<(), ThreadError> {
        Err(ThreadError::Transport("NCP transport not configured".into()))
    }
}

impl Default for StubThreadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadApi for StubThreadClient {
    fn send_diagnostic_get(&self, _dest: Ipv6Addr, _tlv_types: &[u8]) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn send_diagnostic_reset(&self, _dest: Ipv6Addr, _tlv_types: &[u8]) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn query_child_table(&self, _rloc16: Rloc16) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn query_child_ip6_addrs(&self, _rloc16: Rloc16) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn query_router_neighbors(&self, _rloc16: Rloc16) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn router_info(&self, _router_id: u8) -> Option<RouterInfo> {
        None
    }

    fn max_router_id(&self) -> u8 {
        62
    }

    fn mesh_local_prefix(&self) -> [u8; 8] {
        [0; 8]
    }

    fn rloc16(&self) -> Rloc16 {
        0xfffe
    }

    fn rloc_address(&self) -> Ipv6Addr {
        Ipv6Addr::UNSPECIFIED
    }

    fn ext_address(&self) -> ExtAddr {
        ExtAddr::default()
    }

    fn device_role(&self) -> DeviceRole {
        DeviceRole::Disabled
    }

    fn leader_data(&self) -> LeaderData {
        LeaderData::default()
    }

    fn network_name(&self) -> String {
        String::new()
    }

    fn ext_pan_id(&self) -> String {
        String::new()
    }

    fn border_agent_id(&self) -> String {
        String::new()
    }

    fn border_agent_state(&self) -> BorderAgentState {
        BorderAgentState::Stopped
    }

    fn border_routing_counters(&self) -> BrCounters {
        BrCounters::default()
    }

    fn external_routes(&self) -> Vec<ExternalRoute> {
        Vec::new()
    }

    fn srp_hosts(&self) -> Vec<SrpHost> {
        Vec::new()
    }

    fn realm_local_all_thread_nodes(&self) -> Ipv6Addr {
        // ff33:40:<mesh-local-prefix>::1, inconnue sans NCP
        Ipv6Addr::UNSPECIFIED
    }

    fn commissioner_state(&self) -> CommissionerState {
        CommissionerState::Disabled
    }

    fn commissioner_start(&self) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn commissioner_stop(&self) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn commissioner_add_joiner(
        &self,
        _eui64: Option<ExtAddr>,
        _pskd: &str,
        _timeout_s: u32,
    ) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn commissioner_remove_joiner(&self, _eui64: Option<ExtAddr>) -> Result<(), ThreadError> {
        self.unavailable()
    }

    fn commissioner_energy_scan(
        &self,
        _channel_mask: u32,
        _count: u8,
        _period: u16,
        _scan_duration: u16,
        _dest: Ipv6Addr,
    ) -> Result<(), ThreadError> {
        self.unavailable()
    }
}
