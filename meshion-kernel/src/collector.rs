/**
 * COLLECTEUR DE DIAGNOSTICS - Machine à états des collectes mesh
 *
 * RÔLE :
 * Ce module pilote les cycles de collecte de diagnostics réseau : découverte
 * de tous les routeurs (et de leurs enfants FTD trouvés en cours de route)
 * ou requête unicast vers un seul device. Il accumule les réponses DiagGet
 * par rloc16, pilote les sous-requêtes mesh-diag (table des enfants,
 * adresses des enfants, voisins routeurs), applique retries et péremption,
 * puis verse le résultat dans la collection devices ou diagnostics.
 *
 * FONCTIONNEMENT :
 * - un seul cycle actif à la fois, configure() refuse sinon
 * - configure -> start -> continue_request (sur tick et sur chaque réponse)
 *   -> finalisation (succès ou péremption, les résultats partiels sont
 *   toujours conservés)
 * - les réponses arrivées après annulation sont ignorées : la phase et le
 *   rloc de la requête courante servent de garde
 */

use crate::addr::{
    classify_device_ip6, combine_prefix_and_iid, parse_ext_addr, parse_rloc16, rloc_address_for,
    service_role_flags,
};
use crate::devices::{DeviceItem, DevicesCollection, DEVICE_COLLECTION_NAME};
use crate::diagnostics::{
    DiagnosticItem, DiagnosticsCollection, NetworkDiagnostics, DIAG_COLLECTION_NAME,
};
use crate::models::{
    is_query_tlv, is_router_rloc, tlv_type_from_name, ChildEntry, DeviceInfo, DeviceIp6Addrs,
    DiagTlv, LinkMode, NodeInfo, Relationship, Rloc16, RouterNeighborEntry, ROUTER_RLOC_MASK,
    TLV_CHILD, TLV_CHILD_IP6_ADDR_LIST, TLV_EXT_ADDRESS, TLV_IP6_ADDR_LIST, TLV_RLOC16,
    TLV_ROUTER_NEIGHBOR,
};
use crate::thread::{SharedThreadApi, ThreadError};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

// péremption (en ms) des réponses de diagnostic déjà collectées
const DIAG_MAX_AGE_MS: u64 = 30_000;
const DIAG_MAX_AGE_UPPER_MS: u64 = 10 * DIAG_MAX_AGE_MS;

// budget (en ms) d'un cycle de collecte
const DIAG_COLLECT_TIMEOUT_MS: u64 = 10_000;
const DIAG_COLLECT_TIMEOUT_UPPER_MS: u64 = 10 * DIAG_COLLECT_TIMEOUT_MS;

// délai entre deux renvois d'un DiagReq vers un FTD
const DIAG_RETRY_DELAY_FTD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Waiting,
    Pending,
    Done,
}

/// Réponses DiagGet accumulées pour un rloc16.
/// `start_time` vaut None tant qu'aucune réponse n'est arrivée.
#[derive(Debug, Default)]
struct DiagInfo {
    start_time: Option<Instant>,
    tlvs: Vec<DiagTlv>,
}

/// Etat d'une sous-requête mesh-diag vers un routeur
#[derive(Debug)]
struct QueryState<T> {
    update_time: Option<Instant>,
    state: Phase,
    entries: Vec<T>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            update_time: None,
            state: Phase::Idle,
            entries: Vec::new(),
        }
    }
}

/// Collection cible d'un cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    Devices,
    Diagnostics,
}

/// Progression rapportée par continue_request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStep {
    /// Résultats encore attendus, rappeler plus tard
    Pending,
    Completed,
    /// Budget ou retries épuisés, résultats partiels conservés
    TimedOut,
}

/// Issue d'un cycle, envoyée au demandeur d'une découverte en long-poll
#[derive(Debug, Clone, Copy)]
pub struct CollectorOutcome {
    pub completed: bool,
}

enum QueryAttempt {
    /// Résultats en cache encore valides, ou requête abandonnée
    Settled,
    /// Requête émise, résultats attendus
    Issued(Rloc16),
    /// Pile occupée, retenter au prochain tick
    Retry,
    /// Résultats de la requête courante toujours en vol
    InFlight,
}

pub struct Collector {
    thread: SharedThreadApi,

    phase: Phase,
    query_phase: Phase,

    timeout_at: Instant,
    max_age: Instant,
    max_retries: u8,
    retries: u8,
    last_attempt: Option<Instant>,

    /// destination d'une requête unicast, gardée pour les renvois
    dest_ip6: Option<std::net::Ipv6Addr>,
    req_tlvs: Vec<u8>,
    query_tlvs: Vec<u8>,

    diag_set: HashMap<Rloc16, DiagInfo>,
    child_tables: HashMap<Rloc16, QueryState<ChildEntry>>,
    child_ip6s: HashMap<Rloc16, QueryState<DeviceIp6Addrs>>,
    router_neighbors: HashMap<Rloc16, QueryState<RouterNeighborEntry>>,

    /// destination de la sous-requête mesh-diag en vol
    query_rloc: Rloc16,

    relationship: Option<RelationshipKind>,
    action_id: Option<Uuid>,
    last_item: Option<Relationship>,
    done_tx: Option<oneshot::Sender<CollectorOutcome>>,
}

impl Collector {
    pub fn new(thread: SharedThreadApi) -> Self {
        let now = Instant::now();
        Self {
            thread,
            phase: Phase::Idle,
            query_phase: Phase::Idle,
            timeout_at: now,
            max_age: now,
            max_retries: 0,
            retries: 0,
            last_attempt: None,
            dest_ip6: None,
            req_tlvs: Vec::new(),
            query_tlvs: Vec::new(),
            diag_set: HashMap::new(),
            child_tables: HashMap::new(),
            child_ip6s: HashMap::new(),
            router_neighbors: HashMap::new(),
            query_rloc: 0xfffe,
            relationship: None,
            action_id: None,
            last_item: None,
            done_tx: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Cycle lancé sans action (POST /api/devices)
    pub fn is_standalone(&self) -> bool {
        self.phase != Phase::Idle && self.action_id.is_none()
    }

    pub fn action_id(&self) -> Option<Uuid> {
        self.action_id
    }

    pub fn take_last_relationship(&mut self) -> Option<Relationship> {
        self.last_item.take()
    }

    /// Fixe les bornes du prochain cycle. Refusé tant qu'un cycle est actif.
    pub fn configure(
        &mut self,
        timeout_ms: u64,
        max_age_ms: u64,
        retries: u8,
        done: Option<oneshot::Sender<CollectorOutcome>>,
    ) -> Result<(), ThreadError> {
        if self.phase != Phase::Idle {
            return Err(ThreadError::InvalidState);
        }

        let now = Instant::now();
        let timeout = timeout_ms.clamp(DIAG_COLLECT_TIMEOUT_MS, DIAG_COLLECT_TIMEOUT_UPPER_MS);
        let max_age = max_age_ms.clamp(DIAG_MAX_AGE_MS, DIAG_MAX_AGE_UPPER_MS);

        self.timeout_at = now + Duration::from_millis(timeout);
        self.max_age = now
            .checked_sub(Duration::from_millis(max_age))
            .unwrap_or(now);
        self.max_retries = retries;
        self.retries = 0;
        self.last_attempt = None;
        self.done_tx = done;
        Ok(())
    }

    /// Annule le cycle en cours. Idempotent, les callbacks tardifs
    /// seront ignorés.
    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
        self.query_phase = Phase::Idle;
        self.action_id = None;
        self.relationship = None;
        self.done_tx = None;
    }

    /// Vide les buffers internes
    pub fn clear(&mut self) {
        self.diag_set.clear();
        self.child_tables.clear();
        self.child_ip6s.clear();
        self.router_neighbors.clear();
    }

    /// Lance une découverte du réseau à destination de la collection devices
    pub fn start_discovery(&mut self) -> Result<(), ThreadError> {
        if self.phase != Phase::Idle {
            return Err(ThreadError::InvalidState);
        }
        self.phase = Phase::Waiting;
        self.relationship = Some(RelationshipKind::Devices);
        self.action_id = None;
        self.set_default_tlvs();
        eprintln!("[collector] starting network discovery");

        let result = self.start_discovery_inner();
        if result.is_err() {
            self.phase = Phase::Idle;
            self.query_phase = Phase::Idle;
        }
        result
    }

    /// Lance le cycle d'une action getNetworkDiagnosticTask : unicast vers
    /// une destination résolue, ou découverte si la destination est vide
    pub fn start_action(
        &mut self,
        destination: &str,
        types: &[String],
        kind: RelationshipKind,
        action_id: Uuid,
        devices: &DevicesCollection,
    ) -> Result<(), ThreadError> {
        if self.phase != Phase::Idle {
            return Err(ThreadError::InvalidState);
        }
        self.phase = Phase::Waiting;
        self.relationship = Some(kind);
        self.action_id = Some(action_id);

        let result = self.start_action_inner(destination, types, devices);
        if result.is_err() {
            self.phase = Phase::Idle;
            self.query_phase = Phase::Idle;
            self.action_id = None;
        }
        result
    }

    fn start_action_inner(
        &mut self,
        destination: &str,
        types: &[String],
        devices: &DevicesCollection,
    ) -> Result<(), ThreadError> {
        self.extract_tlv_set(types)?;

        if destination.is_empty() {
            return self.start_discovery_inner();
        }

        // unicast : purge de toutes les réponses précédentes
        self.reset_router_diag(false);
        self.reset_child_diag(Instant::now());
        Self::reset_query_map(&self.thread, &mut self.child_tables, false);
        Self::reset_query_map(&self.thread, &mut self.child_ip6s, false);
        Self::reset_query_map(&self.thread, &mut self.router_neighbors, false);

        let dest = self.lookup_destination(destination, devices)?;
        self.dest_ip6 = Some(dest);
        self.retries = 0;
        self.last_attempt = Some(Instant::now());
        self.query_phase = Phase::Waiting;

        eprintln!("[collector] send DiagReq to {}", dest);
        self.thread.send_diagnostic_get(dest, &self.req_tlvs)?;
        Ok(())
    }

    fn start_discovery_inner(&mut self) -> Result<(), ThreadError> {
        if self.query_phase != Phase::Idle {
            return Ok(());
        }

        // apprend les rloc16 des routeurs et purge les entrées périmées
        self.reset_router_diag(true);
        let max_age = self.max_age;
        self.reset_child_diag(max_age);

        let base = self.thread.rloc_address();
        let rlocs: Vec<Rloc16> = self.diag_set.keys().copied().collect();
        for rloc in rlocs {
            let dest = rloc_address_for(base, rloc);
            eprintln!("[collector] send DiagReq to 0x{:04x}", rloc);
            self.thread.send_diagnostic_get(dest, &self.req_tlvs)?;
        }

        Self::reset_query_map(&self.thread, &mut self.child_tables, true);
        Self::reset_query_map(&self.thread, &mut self.child_ip6s, true);
        Self::reset_query_map(&self.thread, &mut self.router_neighbors, true);

        // les rloc16 des routeurs sont déjà connus, pas besoin d'attendre
        // les réponses DiagReq pour lancer les sous-requêtes
        self.query_phase = Phase::Pending;
        Ok(())
    }

    /// Avance le cycle en cours : renvois, sous-requêtes, détection de fin.
    /// Appelée sur tick périodique et après chaque réponse.
    pub fn continue_request(
        &mut self,
        now: Instant,
        devices: &mut DevicesCollection,
        diags: &mut DiagnosticsCollection,
    ) -> Result<CollectorStep, ThreadError> {
        if self.phase == Phase::Idle {
            return Ok(CollectorStep::Pending);
        }

        let mut complete = true;
        let mut timed_out = false;

        if self.timeout_at <= now {
            timed_out = true;
        } else {
            match self.query_phase {
                Phase::Idle => {}
                Phase::Waiting => {
                    // unicast : le rloc16 du répondant est encore inconnu,
                    // on attend la première réponse
                    complete = false;
                    if self.retry_elapsed(now) {
                        if self.retries >= self.max_retries {
                            timed_out = true;
                        } else {
                            self.retries += 1;
                            self.last_attempt = Some(now);
                            if let Some(dest) = self.dest_ip6 {
                                eprintln!("[collector] retry DiagReq to {}", dest);
                                self.thread.send_diagnostic_get(dest, &self.req_tlvs)?;
                            }
                        }
                    }
                }
                Phase::Pending | Phase::Done => {
                    if self.query_phase == Phase::Pending {
                        if self.handle_next_query() {
                            self.query_phase = Phase::Done;
                        } else {
                            complete = false;
                        }
                    }

                    if self.query_phase == Phase::Done {
                        // les enfants FTD (REED) découverts dans les tables
                        // d'enfants sont interrogés à leur tour
                        if self.relationship == Some(RelationshipKind::Devices) {
                            let mut reeds: Vec<Rloc16> = Vec::new();
                            for table in self.child_tables.values() {
                                for child in &table.entries {
                                    if child.device_type_ftd
                                        && !self.diag_set.contains_key(&child.rloc16)
                                    {
                                        reeds.push(child.rloc16);
                                    }
                                }
                            }
                            for rloc in reeds {
                                eprintln!("[collector] found REED 0x{:04x}", rloc);
                                self.diag_set.insert(rloc, DiagInfo::default());
                                self.retries = 0;
                                complete = false;
                            }
                        }

                        // renvois vers les entrées encore sans réponse
                        if self.retry_elapsed(now) {
                            if self.retries >= self.max_retries {
                                timed_out = true;
                            } else {
                                self.retries += 1;
                                self.last_attempt = Some(now);
                                let base = self.thread.rloc_address();
                                let empties: Vec<Rloc16> = self
                                    .diag_set
                                    .iter()
                                    .filter(|(_, info)| info.tlvs.is_empty())
                                    .map(|(rloc, _)| *rloc)
                                    .collect();
                                for rloc in empties {
                                    complete = false;
                                    let dest = rloc_address_for(base, rloc);
                                    eprintln!("[collector] retry DiagReq to 0x{:04x}", rloc);
                                    self.thread.send_diagnostic_get(dest, &self.req_tlvs)?;
                                }
                            }
                        }

                        if complete {
                            for info in self.diag_set.values() {
                                if info.tlvs.is_empty() {
                                    complete = false;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        if !timed_out && !complete {
            return Ok(CollectorStep::Pending);
        }

        // finalisation : les résultats partiels sont conservés aussi sur
        // péremption, la collection devices converge malgré les pertes
        if self.phase != Phase::Idle {
            self.last_item = match self.relationship {
                Some(RelationshipKind::Devices) => self.fill_device_collection(devices),
                Some(RelationshipKind::Diagnostics) => self.fill_diagnostic_collection(diags),
                None => None,
            };
            self.phase = Phase::Idle;
            self.query_phase = Phase::Idle;
            self.relationship = None;
            self.action_id = None;

            if let Some(tx) = self.done_tx.take() {
                let _ = tx.send(CollectorOutcome {
                    completed: !timed_out,
                });
            }
        }

        if timed_out {
            eprintln!("[collector] cycle timed out, partial results kept");
            Ok(CollectorStep::TimedOut)
        } else {
            Ok(CollectorStep::Completed)
        }
    }

    fn retry_elapsed(&self, now: Instant) -> bool {
        self.last_attempt
            .map_or(true, |t| t + DIAG_RETRY_DELAY_FTD < now)
    }

    // ------ réponses asynchrones de la pile ------

    /// Réponse à un DiagGet. Les réponses hors cycle sont ignorées.
    pub fn on_diag_response(&mut self, tlvs: Vec<DiagTlv>) {
        if self.phase == Phase::Idle {
            return;
        }

        let Some(key) = tlvs.iter().find_map(|t| match t {
            DiagTlv::Rloc16(r) => Some(*r),
            _ => None,
        }) else {
            eprintln!("[collector] diag response without rloc16, dropped");
            return;
        };

        self.update_diag(key, tlvs);

        if self.query_phase == Phase::Waiting {
            self.query_phase = Phase::Pending;
        }
    }

    pub fn on_child_table_entry(&mut self, parent: Rloc16, entry: ChildEntry) {
        if parent != self.query_rloc {
            return;
        }
        if let Some(st) = self.child_tables.get_mut(&parent) {
            if st.state == Phase::Pending {
                st.entries.push(entry);
            }
        }
    }

    pub fn on_child_table_done(&mut self, parent: Rloc16) {
        if let Some(st) = self.child_tables.get_mut(&parent) {
            if st.state == Phase::Pending {
                st.update_time = Some(Instant::now());
                st.state = Phase::Done;
            }
        }
    }

    pub fn on_child_ip6_addrs(&mut self, parent: Rloc16, child: DeviceIp6Addrs) {
        if parent != self.query_rloc || child.rloc16 == 0xfffe {
            return;
        }
        if let Some(st) = self.child_ip6s.get_mut(&parent) {
            if st.state == Phase::Pending {
                st.entries.push(child);
            }
        }
    }

    pub fn on_child_ip6_done(&mut self, parent: Rloc16) {
        if let Some(st) = self.child_ip6s.get_mut(&parent) {
            if st.state == Phase::Pending {
                st.update_time = Some(Instant::now());
                st.state = Phase::Done;
            }
        }
    }

    pub fn on_neighbor_entry(&mut self, parent: Rloc16, entry: RouterNeighborEntry) {
        if parent != self.query_rloc {
            return;
        }
        if let Some(st) = self.router_neighbors.get_mut(&parent) {
            if st.state == Phase::Pending {
                st.entries.push(entry);
            }
        }
    }

    pub fn on_neighbor_done(&mut self, parent: Rloc16) {
        if let Some(st) = self.router_neighbors.get_mut(&parent) {
            if st.state == Phase::Pending {
                st.update_time = Some(Instant::now());
                st.state = Phase::Done;
            }
        }
    }

    // ------ gestion des buffers ------

    /// Fusionne une réponse dans le jeu accumulé d'un rloc16 : un TLV
    /// entrant remplace l'ancien de même type, les autres sont conservés,
    /// le reste est ajouté. La réponse la plus récente gagne.
    fn update_diag(&mut self, key: Rloc16, mut incoming: Vec<DiagTlv>) {
        let existed = self.diag_set.contains_key(&key);
        let mut merged: Vec<DiagTlv> = Vec::new();

        if let Some(info) = self.diag_set.get(&key) {
            for existing in &info.tlvs {
                if let Some(pos) = incoming
                    .iter()
                    .position(|t| t.type_id() == existing.type_id())
                {
                    merged.push(incoming.remove(pos));
                } else {
                    merged.push(existing.clone());
                }
            }
        }
        merged.extend(incoming);

        if !existed {
            // requête unicast vers un device inconnu : préparer les
            // sous-requêtes mesh-diag si c'est un routeur
            self.add_single_rloc_lookup(key);
        }

        self.diag_set.insert(
            key,
            DiagInfo {
                start_time: Some(Instant::now()),
                tlvs: merged,
            },
        );
    }

    fn add_single_rloc_lookup(&mut self, rloc: Rloc16) {
        if is_router_rloc(rloc) {
            self.child_tables.insert(rloc, QueryState::default());
            self.child_ip6s.insert(rloc, QueryState::default());
            self.router_neighbors.insert(rloc, QueryState::default());
        }
    }

    /// Réinitialise les entrées routeur de diag_set depuis la table des
    /// routeurs locale ; `learn` vide purge toutes les entrées routeur.
    fn reset_router_diag(&mut self, learn: bool) {
        for id in 0..=self.thread.max_router_id() {
            let rloc = (id as u16) << 10;
            if self.thread.router_info(id).is_some() && learn {
                self.diag_set.entry(rloc).or_default();
            } else if self.diag_set.remove(&rloc).is_some() {
                eprintln!("[collector] deleted outdated router diag from 0x{:04x}", rloc);
            }
        }
    }

    /// Purge les entrées enfant vides ou plus vieilles que max_age
    fn reset_child_diag(&mut self, max_age: Instant) {
        self.diag_set.retain(|rloc, info| {
            if rloc & ROUTER_RLOC_MASK == 0 {
                return true;
            }
            match info.start_time {
                Some(t) if t >= max_age => true,
                _ => {
                    eprintln!("[collector] deleted outdated child diag from 0x{:04x}", rloc);
                    false
                }
            }
        });
    }

    fn reset_query_map<T>(
        thread: &SharedThreadApi,
        map: &mut HashMap<Rloc16, QueryState<T>>,
        learn: bool,
    ) {
        for id in 0..=thread.max_router_id() {
            let rloc = (id as u16) << 10;
            if thread.router_info(id).is_some() && learn {
                map.entry(rloc)
                    .and_modify(|st| st.entries.clear())
                    .or_default();
            } else {
                map.remove(&rloc);
            }
        }
    }

    /// TLVs minimaux d'une découverte pour remplir la collection devices
    fn set_default_tlvs(&mut self) {
        self.req_tlvs = vec![TLV_EXT_ADDRESS, TLV_RLOC16, TLV_IP6_ADDR_LIST];
        self.query_tlvs = vec![TLV_CHILD, TLV_CHILD_IP6_ADDR_LIST];
    }

    /// Sépare les noms de TLV demandés en TLVs de requête DiagGet et TLVs
    /// de sous-requête mesh-diag. Le rloc16 est toujours demandé, il sert
    /// de clé de corrélation.
    fn extract_tlv_set(&mut self, types: &[String]) -> Result<(), ThreadError> {
        self.req_tlvs.clear();
        self.query_tlvs.clear();
        let mut rloc_requested = false;

        for name in types {
            let tlv_type = tlv_type_from_name(name).ok_or(ThreadError::InvalidArgs)?;
            if !is_query_tlv(tlv_type) {
                if tlv_type == TLV_RLOC16 {
                    rloc_requested = true;
                }
                self.req_tlvs.push(tlv_type);
            } else {
                match tlv_type {
                    TLV_CHILD | TLV_CHILD_IP6_ADDR_LIST | TLV_ROUTER_NEIGHBOR => {
                        self.query_tlvs.push(tlv_type)
                    }
                    _ => return Err(ThreadError::InvalidArgs),
                }
            }
        }

        if !rloc_requested {
            self.req_tlvs.push(TLV_RLOC16);
        }
        Ok(())
    }

    /// Résout une destination : deviceId connu, ML-EID-IID (16 hex) ou
    /// rloc16 (4 hex)
    fn lookup_destination(
        &self,
        destination: &str,
        devices: &DevicesCollection,
    ) -> Result<std::net::Ipv6Addr, ThreadError> {
        let prefix = self.thread.mesh_local_prefix();

        if let Some(item) = devices.get(destination) {
            if item.info.ml_eid_iid.is_empty() {
                return Err(ThreadError::InvalidArgs);
            }
            return Ok(combine_prefix_and_iid(&prefix, &item.info.ml_eid_iid));
        }

        match destination.len() {
            16 => {
                let iid = parse_ext_addr(destination).map_err(|_| ThreadError::InvalidArgs)?;
                Ok(combine_prefix_and_iid(&prefix, &iid))
            }
            4 => {
                let rloc = parse_rloc16(destination).map_err(|_| ThreadError::InvalidArgs)?;
                Ok(rloc_address_for(self.thread.rloc_address(), rloc))
            }
            _ => Err(ThreadError::InvalidArgs),
        }
    }

    // ------ sous-requêtes mesh-diag ------

    /// Parcourt les TLVs de sous-requête configurés et émet la prochaine
    /// requête dont les résultats sont périmés. Retourne vrai quand tout
    /// est à jour.
    fn handle_next_query(&mut self) -> bool {
        let query_tlvs = self.query_tlvs.clone();
        for tlv_type in query_tlvs {
            let rlocs: Vec<Rloc16> = match tlv_type {
                TLV_CHILD => self.child_tables.keys().copied().collect(),
                TLV_CHILD_IP6_ADDR_LIST => self.child_ip6s.keys().copied().collect(),
                TLV_ROUTER_NEIGHBOR => self.router_neighbors.keys().copied().collect(),
                _ => continue,
            };

            for rloc in rlocs {
                let thread = self.thread.clone();
                let max_age = self.max_age;
                let attempt = match tlv_type {
                    TLV_CHILD => self.child_tables.get_mut(&rloc).map(|st| {
                        Self::drive_query(st, rloc, max_age, || thread.query_child_table(rloc))
                    }),
                    TLV_CHILD_IP6_ADDR_LIST => self.child_ip6s.get_mut(&rloc).map(|st| {
                        Self::drive_query(st, rloc, max_age, || thread.query_child_ip6_addrs(rloc))
                    }),
                    TLV_ROUTER_NEIGHBOR => self.router_neighbors.get_mut(&rloc).map(|st| {
                        Self::drive_query(st, rloc, max_age, || {
                            thread.query_router_neighbors(rloc)
                        })
                    }),
                    _ => None,
                };

                match attempt {
                    Some(QueryAttempt::Settled) | None => continue,
                    Some(QueryAttempt::Issued(query_rloc)) => {
                        self.query_rloc = query_rloc;
                        return false;
                    }
                    Some(QueryAttempt::Retry) | Some(QueryAttempt::InFlight) => return false,
                }
            }
        }
        true
    }

    /// Avance l'état d'une sous-requête : cache valide, émission, ou
    /// nouvel essai au prochain tick quand la pile est occupée
    fn drive_query<T>(
        st: &mut QueryState<T>,
        rloc: Rloc16,
        max_age: Instant,
        send: impl FnOnce() -> Result<(), ThreadError>,
    ) -> QueryAttempt {
        match st.state {
            Phase::Pending => return QueryAttempt::InFlight,
            Phase::Idle | Phase::Done => {
                if st.update_time.map_or(false, |t| t > max_age) {
                    return QueryAttempt::Settled;
                }
                st.state = Phase::Waiting;
            }
            Phase::Waiting => {}
        }

        match send() {
            Ok(()) => {
                st.state = Phase::Pending;
                QueryAttempt::Issued(rloc)
            }
            Err(ThreadError::Busy) | Err(ThreadError::NoBufs) | Err(ThreadError::InvalidArgs) => {
                eprintln!("[collector] mesh-diag query to 0x{:04x} deferred", rloc);
                QueryAttempt::Retry
            }
            Err(e) => {
                eprintln!("[collector] mesh-diag query to 0x{:04x} failed: {}", rloc, e);
                st.state = Phase::Done;
                QueryAttempt::Settled
            }
        }
    }

    // ------ transfert des buffers vers les collections ------

    fn local_node_info(&self) -> NodeInfo {
        let mut router_count = 0u8;
        for id in 0..=self.thread.max_router_id() {
            if self.thread.router_info(id).is_some() {
                router_count += 1;
            }
        }

        NodeInfo {
            ba_id: self.thread.border_agent_id(),
            ba_state: self.thread.border_agent_state().as_str().into(),
            role: self.thread.device_role().as_str().into(),
            rloc16: self.thread.rloc16(),
            rloc_address: Some(self.thread.rloc_address()),
            router_count,
            leader_data: self.thread.leader_data(),
            network_name: self.thread.network_name(),
            ext_pan_id: self.thread.ext_pan_id(),
        }
    }

    /// Cherche le hostname SRP enregistré pour l'adresse OMR du device
    fn lookup_hostname(&self, info: &DeviceInfo) -> String {
        let Some(omr) = info.omr_ipv6 else {
            return String::new();
        };
        for host in self.thread.srp_hosts() {
            if host.deleted {
                continue;
            }
            if host.addresses.iter().any(|a| *a == omr) {
                return host
                    .full_name
                    .split('.')
                    .next()
                    .unwrap_or_default()
                    .to_string();
            }
        }
        String::new()
    }

    /// Insère ou met à jour un item de la collection devices. A la mise à
    /// jour seuls les champs appris (non vides) écrasent l'existant.
    fn set_device_item_attributes(
        &self,
        ext_hex: String,
        mut info: DeviceInfo,
        devices: &mut DevicesCollection,
    ) -> Option<String> {
        let this_hex = self.thread.ext_address().to_hex();

        if let Some(item) = devices.get_mut(&ext_hex) {
            if !info.eui64.is_empty() {
                item.set_eui64(info.eui64);
            }
            if let Some(omr) = info.omr_ipv6 {
                item.set_omr_ipv6(omr);
            }
            if !info.ml_eid_iid.is_empty() {
                item.set_ml_eid_iid(info.ml_eid_iid);
            }
            if !info.hostname.is_empty() {
                item.set_hostname(info.hostname);
            }
            if !info.role.is_empty() {
                item.set_role(info.role);
            }
            if info.mode != item.info.mode {
                item.set_mode(info.mode);
            }
            if item.info.needs_update && item.info.is_complete() {
                item.set_needs_update(false);
            }
            return Some(ext_hex);
        }

        // à l'insertion, un device encore incomplet reste marqué à mettre
        // à jour ; un routeur est considéré à jour d'office
        if info.needs_update {
            info.needs_update = !info.is_complete();
            if info.needs_update {
                eprintln!("[collector] lacking some attributes for device {}", ext_hex);
            }
        }

        if ext_hex == this_hex {
            let node = self.local_node_info();
            devices.add(DeviceItem::new_this_device(ext_hex.clone(), info, node));
        } else {
            devices.add(DeviceItem::new(ext_hex.clone(), info));
        }
        Some(ext_hex)
    }

    /// Emet les enfants d'un routeur depuis les buffers mesh-diag
    fn emit_children(&self, parent: Rloc16, devices: &mut DevicesCollection) -> Option<String> {
        let table = self.child_tables.get(&parent)?;
        let ip6_lists = self.child_ip6s.get(&parent);
        let prefix = self.thread.mesh_local_prefix();
        let mut last = None;

        for child in &table.entries {
            if child.ext_address.is_empty() {
                eprintln!("[collector] child of 0x{:04x} without extAddress", parent);
                continue;
            }

            let mut info = DeviceInfo {
                ext_address: child.ext_address,
                role: "child".into(),
                mode: LinkMode {
                    rx_on_when_idle: child.rx_on_when_idle,
                    device_type_ftd: child.device_type_ftd,
                    full_network_data: child.full_network_data,
                },
                needs_update: true,
                ..Default::default()
            };

            if let Some(lists) = ip6_lists {
                if let Some(dev) = lists.entries.iter().find(|d| d.rloc16 == child.rloc16) {
                    for addr in &dev.addresses {
                        classify_device_ip6(&mut info, addr, &prefix);
                    }
                    info.hostname = self.lookup_hostname(&info);
                }
            }

            let ext_hex = child.ext_address.to_hex();
            if let Some(id) = self.set_device_item_attributes(ext_hex, info, devices) {
                last = Some(id);
            }
        }
        last
    }

    /// Verse les buffers dans la collection devices
    fn fill_device_collection(&self, devices: &mut DevicesCollection) -> Option<Relationship> {
        let prefix = self.thread.mesh_local_prefix();
        let mut last: Option<String> = None;

        for (rloc, diag) in &self.diag_set {
            if diag.tlvs.is_empty() {
                eprintln!("[collector] no response from 0x{:04x}", rloc);
                continue;
            }

            let mut info = DeviceInfo {
                needs_update: true,
                ..Default::default()
            };
            let mut ext_hex = String::new();
            let mut router_rloc: Option<Rloc16> = None;

            for tlv in &diag.tlvs {
                match tlv {
                    DiagTlv::ExtAddress(a) => {
                        ext_hex = a.to_hex();
                        info.ext_address = *a;
                    }
                    DiagTlv::Rloc16(r) => {
                        if r & ROUTER_RLOC_MASK > 0 {
                            info.role = "child".into();
                        } else {
                            info.role = "router".into();
                            info.mode = LinkMode::router();
                            info.needs_update = false;
                            router_rloc = Some(*r);
                        }
                    }
                    DiagTlv::Eui64(e) => info.eui64 = *e,
                    DiagTlv::Ip6AddressList(list) => {
                        for addr in list {
                            classify_device_ip6(&mut info, addr, &prefix);
                        }
                        info.hostname = self.lookup_hostname(&info);
                    }
                    _ => {}
                }
            }

            if let Some(parent) = router_rloc {
                if let Some(id) = self.emit_children(parent, devices) {
                    last = Some(id);
                }
            }

            if ext_hex.is_empty() {
                eprintln!("[collector] missing extAddress in response from 0x{:04x}", rloc);
                continue;
            }
            if let Some(id) = self.set_device_item_attributes(ext_hex, info, devices) {
                last = Some(id);
            }
        }

        last.map(|id| Relationship {
            type_name: DEVICE_COLLECTION_NAME.into(),
            id,
        })
    }

    /// Verse les buffers dans la collection diagnostics, un item par
    /// rloc16 ayant répondu
    fn fill_diagnostic_collection(
        &self,
        diags: &mut DiagnosticsCollection,
    ) -> Option<Relationship> {
        let this_ext = self.thread.ext_address();
        let routes = self.thread.external_routes();
        let mut last = None;

        for (rloc, diag) in &self.diag_set {
            if diag.tlvs.is_empty() {
                eprintln!("[collector] no response from 0x{:04x}", rloc);
                continue;
            }

            let mut item = NetworkDiagnostics {
                tlvs: diag.tlvs.clone(),
                ..Default::default()
            };

            for tlv in &diag.tlvs {
                match tlv {
                    DiagTlv::ExtAddress(a) if *a == this_ext && !this_ext.is_empty() => {
                        item.br_counters = Some(self.thread.border_routing_counters());
                    }
                    DiagTlv::Rloc16(r) if is_router_rloc(*r) => {
                        if let Some(t) = self.child_tables.get(r) {
                            item.children = t.entries.clone();
                        }
                        if let Some(t) = self.child_ip6s.get(r) {
                            item.children_ip6 = t.entries.clone();
                        }
                        if let Some(t) = self.router_neighbors.get(r) {
                            item.neighbors = t.entries.clone();
                        }
                    }
                    DiagTlv::Ip6AddressList(list) => {
                        let is_br = routes.iter().any(|route| route.rloc16 == *rloc);
                        item.service_flags = Some(service_role_flags(list, is_br));
                    }
                    _ => {}
                }
            }

            let entry = DiagnosticItem::network(item);
            let id = entry.uuid();
            diags.add(entry);
            last = Some(Relationship {
                type_name: DIAG_COLLECTION_NAME.into(),
                id,
            });
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::new_devices_collection;
    use crate::diagnostics::new_diagnostics_collection;
    use crate::models::ExtAddr;
    use devkit::thread_stub::MockThreadClient;
    use std::net::Ipv6Addr;
    use std::sync::Arc;
    use std::thread::sleep;

    const ML_PREFIX: [u8; 8] = [0xfd, 0x11, 0x22, 0x00, 0x00, 0x00, 0x00, 0x01];

    fn setup() -> (MockThreadClient, Collector) {
        let mock = MockThreadClient::new();
        mock.set_mesh_local_prefix(ML_PREFIX);
        mock.set_rloc_address("fd11:2200:0:1:0:ff:fe00:1c00".parse().unwrap());
        mock.set_rloc16(0x1c00);
        mock.set_ext_address(ExtAddr([0xee; 8]));
        let collector = Collector::new(Arc::new(mock.clone()));
        (mock, collector)
    }

    fn unicast_response() -> Vec<DiagTlv> {
        vec![
            DiagTlv::ExtAddress(ExtAddr([0xaa; 8])),
            DiagTlv::Rloc16(0x0800),
            DiagTlv::Ip6AddressList(vec![
                "fd00::1".parse().unwrap(),
                "fe80::2".parse().unwrap(),
                "ff02::1".parse().unwrap(),
            ]),
        ]
    }

    #[test]
    fn test_unicast_diagnostic_completes() {
        let (mock, mut collector) = setup();
        let mut devices = new_devices_collection();
        let mut diags = new_diagnostics_collection();
        let action = Uuid::new_v4();

        collector.configure(10_000, 30_000, 1, None).unwrap();
        collector
            .start_action(
                "0000000000000001",
                &[
                    "extAddress".to_string(),
                    "rloc16".to_string(),
                    "ip6AddressList".to_string(),
                ],
                RelationshipKind::Diagnostics,
                action,
                &devices,
            )
            .unwrap();

        let sent = mock.sent_diag_gets();
        assert_eq!(sent.len(), 1);
        // destination = préfixe mesh-local + IID littéral
        assert_eq!(sent[0].0.octets()[..8], ML_PREFIX);
        assert_eq!(sent[0].0.octets()[15], 0x01);
        // les trois TLVs demandés, rloc16 inclus
        assert_eq!(sent[0].1, vec![0, 1, 8]);

        collector.on_diag_response(unicast_response());
        let step = collector
            .continue_request(Instant::now(), &mut devices, &mut diags)
            .unwrap();
        assert_eq!(step, CollectorStep::Completed);

        assert_eq!(diags.len(), 1);
        let rel = collector.take_last_relationship().unwrap();
        assert_eq!(rel.type_name, "diagnostics");
        let item = diags.to_json_api_item(&rel.id, &Default::default()).unwrap();
        let attrs = &item["data"]["attributes"];
        assert_eq!(attrs["extAddress"], "aaaaaaaaaaaaaaaa");
        assert_eq!(attrs["rloc16"], "0x0800");
        assert_eq!(attrs["ip6AddressList"][0], "fd00::1");
        // collecteur de nouveau disponible
        assert!(collector.is_idle());
    }

    #[test]
    fn test_retries_then_timeout_without_response() {
        let (mock, mut collector) = setup();
        let mut devices = new_devices_collection();
        let mut diags = new_diagnostics_collection();

        collector.configure(200, 30_000, 2, None).unwrap();
        collector
            .start_action(
                "0000000000000001",
                &["extAddress".to_string()],
                RelationshipKind::Diagnostics,
                Uuid::new_v4(),
                &devices,
            )
            .unwrap();

        // aucune réponse : renvois espacés de 100 ms puis abandon
        let mut step = CollectorStep::Pending;
        for _ in 0..6 {
            sleep(Duration::from_millis(110));
            step = collector
                .continue_request(Instant::now(), &mut devices, &mut diags)
                .unwrap();
            if step != CollectorStep::Pending {
                break;
            }
        }

        assert_eq!(step, CollectorStep::TimedOut);
        // envoi initial plus deux renvois
        assert!(mock.sent_diag_gets().len() >= 3);
        assert_eq!(diags.len(), 0);
        assert!(collector.take_last_relationship().is_none());
        assert!(collector.is_idle());
    }

    #[test]
    fn test_discovery_learns_router_and_ftd_child() {
        let (mock, mut collector) = setup();
        let mut devices = new_devices_collection();
        let mut diags = new_diagnostics_collection();

        // device déjà connu, il doit survivre à la découverte
        devices.add(DeviceItem::new(
            "cccccccccccccccc".into(),
            DeviceInfo::default(),
        ));

        // un routeur présent dans la table locale : id 2 -> rloc 0x0800
        mock.add_router(2, 0x0800, ExtAddr([0xbb; 8]));

        collector.configure(10_000, 30_000, 3, None).unwrap();
        collector.start_discovery().unwrap();

        // DiagReq envoyé au routeur connu
        let sent = mock.sent_diag_gets();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.octets()[14], 0x08);

        // réponse du routeur
        collector.on_diag_response(vec![
            DiagTlv::ExtAddress(ExtAddr([0xbb; 8])),
            DiagTlv::Rloc16(0x0800),
            DiagTlv::Ip6AddressList(vec!["fd11:2200:0:1::b".parse().unwrap()]),
        ]);
        let step = collector
            .continue_request(Instant::now(), &mut devices, &mut diags)
            .unwrap();
        assert_eq!(step, CollectorStep::Pending);

        // la table des enfants est interrogée
        assert_eq!(mock.sent_child_table_queries(), vec![0x0800]);
        collector.on_child_table_entry(
            0x0800,
            ChildEntry {
                rloc16: 0x0801,
                ext_address: ExtAddr([0xdd; 8]),
                rx_on_when_idle: true,
                device_type_ftd: true,
                full_network_data: true,
                version: 4,
                timeout: 240,
                age: 1,
                link_quality_in: 3,
                average_rssi: -40,
            },
        );
        collector.on_child_table_done(0x0800);
        let step = collector
            .continue_request(Instant::now(), &mut devices, &mut diags)
            .unwrap();
        assert_eq!(step, CollectorStep::Pending);

        // puis les adresses des enfants
        assert_eq!(mock.sent_child_ip6_queries(), vec![0x0800]);
        collector.on_child_ip6_addrs(
            0x0800,
            DeviceIp6Addrs {
                rloc16: 0x0801,
                addresses: vec![
                    "fd11:2200:0:1::77".parse::<Ipv6Addr>().unwrap(),
                    "fe80::77".parse().unwrap(),
                ],
            },
        );
        collector.on_child_ip6_done(0x0800);

        // l'enfant FTD est découvert et interrogé à son tour
        let step = collector
            .continue_request(Instant::now(), &mut devices, &mut diags)
            .unwrap();
        assert_eq!(step, CollectorStep::Pending);
        let sent = mock.sent_diag_gets();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0.octets()[14], 0x08);
        assert_eq!(sent[1].0.octets()[15], 0x01);

        collector.on_diag_response(vec![
            DiagTlv::ExtAddress(ExtAddr([0xdd; 8])),
            DiagTlv::Rloc16(0x0801),
        ]);
        let step = collector
            .continue_request(Instant::now(), &mut devices, &mut diags)
            .unwrap();
        assert_eq!(step, CollectorStep::Completed);

        // routeur appris, device préexistant conservé
        assert!(devices.contains("cccccccccccccccc"));
        let router = devices.get("bbbbbbbbbbbbbbbb").unwrap();
        assert_eq!(router.info.role, "router");
        assert!(!router.info.needs_update);

        // enfant appris via la table : MLEID-IID extrait, pas d'OMR
        let child = devices.get("dddddddddddddddd").unwrap();
        assert_eq!(child.info.role, "child");
        assert_eq!(child.info.ml_eid_iid.to_hex(), "0000000000000077");
        assert!(child.info.omr_ipv6.is_none());
    }

    #[test]
    fn test_configure_rejected_while_active() {
        let (_mock, mut collector) = setup();
        let devices = new_devices_collection();

        collector.configure(10_000, 30_000, 1, None).unwrap();
        collector
            .start_action(
                "0000000000000001",
                &["extAddress".to_string()],
                RelationshipKind::Diagnostics,
                Uuid::new_v4(),
                &devices,
            )
            .unwrap();

        assert_eq!(
            collector.configure(10_000, 30_000, 1, None),
            Err(ThreadError::InvalidState)
        );
    }

    #[test]
    fn test_cancel_is_idempotent_and_drops_late_responses() {
        let (mock, mut collector) = setup();
        let devices = new_devices_collection();

        collector.configure(10_000, 30_000, 1, None).unwrap();
        collector
            .start_action(
                "0000000000000001",
                &["extAddress".to_string()],
                RelationshipKind::Diagnostics,
                Uuid::new_v4(),
                &devices,
            )
            .unwrap();

        collector.cancel();
        assert!(collector.is_idle());
        collector.cancel();
        assert!(collector.is_idle());

        // réponse tardive ignorée : aucune entrée créée
        collector.on_diag_response(unicast_response());
        assert!(collector.diag_set.is_empty());
        let _ = mock;
    }

    #[test]
    fn test_bad_destination_rejected() {
        let (_mock, mut collector) = setup();
        let devices = new_devices_collection();

        collector.configure(10_000, 30_000, 1, None).unwrap();
        let err = collector
            .start_action(
                "123",
                &["extAddress".to_string()],
                RelationshipKind::Diagnostics,
                Uuid::new_v4(),
                &devices,
            )
            .unwrap_err();
        assert_eq!(err, ThreadError::InvalidArgs);
        // l'échec libère le collecteur
        assert!(collector.is_idle());
    }

    #[test]
    fn test_update_diag_prefers_latest_tlv() {
        let (_mock, mut collector) = setup();

        collector.update_diag(
            0x0800,
            vec![
                DiagTlv::ExtAddress(ExtAddr([0xaa; 8])),
                DiagTlv::Rloc16(0x0800),
            ],
        );
        collector.update_diag(
            0x0800,
            vec![
                DiagTlv::ExtAddress(ExtAddr([0xbb; 8])),
                DiagTlv::Version(4),
            ],
        );

        let info = collector.diag_set.get(&0x0800).unwrap();
        // un seul TLV par type, le plus récent gagne, l'ancien rloc16 reste
        assert_eq!(info.tlvs.len(), 3);
        let ext = info
            .tlvs
            .iter()
            .find_map(|t| match t {
                DiagTlv::ExtAddress(a) => Some(a.to_hex()),
                _ => None,
            })
            .unwrap();
        assert_eq!(ext, "bbbbbbbbbbbbbbbb");
        assert!(info.tlvs.iter().any(|t| matches!(t, DiagTlv::Rloc16(0x0800))));
        assert!(info.tlvs.iter().any(|t| matches!(t, DiagTlv::Version(4))));
    }
}
