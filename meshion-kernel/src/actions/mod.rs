/**
 * FILE D'ACTIONS - File FIFO typée et boucle moteur du kernel
 *
 * RÔLE :
 * Ce module gère le cycle de vie complet des actions soumises par les
 * clients : validation, mise en file, avancement périodique, timeout,
 * annulation et éviction des entrées terminées.
 *
 * FONCTIONNEMENT :
 * - chaque type d'action fournit validate/process/evaluate/clean/jsonify,
 *   le dispatch se fait sur l'enum ActionTypeId
 * - statuts : pending -> active -> {completed, stopped, failed},
 *   jamais de retour en arrière
 * - file bornée à TASK_QUEUE_MAX, une soumission à file pleine n'est
 *   acceptée que si une entrée terminale peut être évincée
 * - le tick tourne sur période fixe, immédiatement après une soumission,
 *   et après chaque événement de la pile Thread
 */

pub mod add_device;
pub mod energy_scan;
pub mod network_diag;

use crate::allowlist::AllowList;
use crate::collection::json_meta_collection;
use crate::collector::Collector;
use crate::devices::DevicesCollection;
use crate::diagnostics::DiagnosticsCollection;
use crate::models::Relationship;
use crate::state::Shared;
use crate::thread::{EventReceiver, SharedThreadApi, ThreadEvent};
use energy_scan::EnergyScan;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use uuid::Uuid;

pub const TASK_QUEUE_MAX: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Active,
    Completed,
    Stopped,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Active => "active",
            ActionStatus::Completed => "completed",
            ActionStatus::Stopped => "stopped",
            ActionStatus::Failed => "failed",
        }
    }
}

/// Résultat d'un process/evaluate, traduit en statut par le tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    Pending,
    Retry,
    Failure,
    Stopped,
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTypeId {
    AddThreadDevice,
    NetworkDiagnostic,
    NetworkDiagnosticReset,
    EnergyScan,
}

impl ActionTypeId {
    pub fn name(&self) -> &'static str {
        match self {
            ActionTypeId::AddThreadDevice => "addThreadDeviceTask",
            ActionTypeId::NetworkDiagnostic => "getNetworkDiagnosticTask",
            ActionTypeId::NetworkDiagnosticReset => "resetNetworkDiagCounterTask",
            ActionTypeId::EnergyScan => "getEnergyScanTask",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "addThreadDeviceTask" => Some(ActionTypeId::AddThreadDevice),
            "getNetworkDiagnosticTask" => Some(ActionTypeId::NetworkDiagnostic),
            "resetNetworkDiagCounterTask" => Some(ActionTypeId::NetworkDiagnosticReset),
            "getEnergyScanTask" => Some(ActionTypeId::EnergyScan),
            _ => None,
        }
    }
}

/// Une action en file, avec les attributs JSON fournis par le client
#[derive(Debug, Clone)]
pub struct Action {
    pub id: Uuid,
    pub type_id: ActionTypeId,
    pub attributes: Value,
    pub status: ActionStatus,
    pub created: OffsetDateTime,
    pub timeout_at: Option<OffsetDateTime>,
    pub last_evaluated: Option<OffsetDateTime>,
    pub delete_flag: bool,
    /// référence au résultat, renseignée seulement à la complétion
    pub relationship: Option<Relationship>,
}

impl Action {
    fn new(type_id: ActionTypeId, attributes: Value) -> Self {
        let created = OffsetDateTime::now_utc();
        let timeout_at = attributes
            .get("timeout")
            .and_then(|t| t.as_i64())
            .map(|secs| created + time::Duration::seconds(secs));

        let action = Self {
            id: Uuid::new_v4(),
            type_id,
            attributes,
            status: ActionStatus::Pending,
            created,
            timeout_at,
            last_evaluated: None,
            delete_flag: false,
            relationship: None,
        };
        eprintln!("[actions] created {} {}", action.type_id.name(), action.id);
        action
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ActionStatus::Completed | ActionStatus::Stopped | ActionStatus::Failed
        )
    }

    /// Représentation json:api de l'action
    pub fn to_json(&self) -> Value {
        let mut attributes = self.attributes.clone();
        if let Some(obj) = attributes.as_object_mut() {
            obj.insert("status".into(), json!(self.status.as_str()));
        }

        let mut out = json!({
            "type": self.type_id.name(),
            "id": self.id.to_string(),
            "attributes": attributes,
        });

        if self.status == ActionStatus::Completed {
            if let Some(rel) = &self.relationship {
                out["relationships"] = json!({ "result": { "data": rel } });
            }
        }
        out
    }
}

/// Ressources partagées par tous les handlers d'actions
pub struct Context {
    pub thread: SharedThreadApi,
    pub collector: Collector,
    pub allow_list: AllowList,
    pub energy_scan: EnergyScan,
    pub devices: Shared<DevicesCollection>,
    pub diagnostics: Shared<DiagnosticsCollection>,
    /// uuids d'actions à stopper, demandés par un handler pendant le tick
    stop_requests: Vec<Uuid>,
}

impl Context {
    pub fn new(
        thread: SharedThreadApi,
        devices: Shared<DevicesCollection>,
        diagnostics: Shared<DiagnosticsCollection>,
    ) -> Self {
        Self {
            collector: Collector::new(thread.clone()),
            thread,
            allow_list: AllowList::new(),
            energy_scan: EnergyScan::new(),
            devices,
            diagnostics,
            stop_requests: Vec::new(),
        }
    }

    /// Demande l'arrêt d'une autre action (joiner remplacé par exemple)
    pub fn request_stop(&mut self, id: Uuid) {
        self.stop_requests.push(id);
    }

    fn take_stop_requests(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.stop_requests)
    }
}

// dispatch statique par type d'action

fn validate(type_id: ActionTypeId, attributes: &Value) -> bool {
    match type_id {
        ActionTypeId::AddThreadDevice => add_device::validate(attributes),
        ActionTypeId::NetworkDiagnostic => network_diag::validate(attributes),
        ActionTypeId::NetworkDiagnosticReset => network_diag::validate_reset(attributes),
        ActionTypeId::EnergyScan => energy_scan::validate(attributes),
    }
}

fn process(action: &mut Action, ctx: &mut Context) -> TaskResult {
    match action.type_id {
        ActionTypeId::AddThreadDevice => add_device::process(action, ctx),
        ActionTypeId::NetworkDiagnostic => network_diag::process(action, ctx),
        ActionTypeId::NetworkDiagnosticReset => network_diag::process_reset(action, ctx),
        ActionTypeId::EnergyScan => energy_scan::process(action, ctx),
    }
}

fn evaluate(action: &mut Action, ctx: &mut Context) -> TaskResult {
    match action.type_id {
        ActionTypeId::AddThreadDevice => add_device::evaluate(action, ctx),
        ActionTypeId::NetworkDiagnostic => network_diag::evaluate(action, ctx),
        ActionTypeId::NetworkDiagnosticReset => network_diag::evaluate_reset(action, ctx),
        ActionTypeId::EnergyScan => energy_scan::evaluate(action, ctx),
    }
}

fn clean(action: &mut Action, ctx: &mut Context) {
    match action.type_id {
        ActionTypeId::AddThreadDevice => add_device::clean(action, ctx),
        ActionTypeId::NetworkDiagnostic => network_diag::clean(action, ctx),
        ActionTypeId::NetworkDiagnosticReset => network_diag::clean_reset(action, ctx),
        ActionTypeId::EnergyScan => energy_scan::clean(action, ctx),
    }
}

fn jsonify(action: &Action, allow_list: &AllowList) -> Value {
    match action.type_id {
        ActionTypeId::AddThreadDevice => add_device::jsonify(action, allow_list),
        _ => action.to_json(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid action in submission")]
    Invalid,
    #[error("action queue is full")]
    Overflow,
}

/// La file d'actions proprement dite, ordre de soumission conservé
#[derive(Default)]
pub struct ActionQueue {
    nodes: Vec<Action>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, id: &Uuid) -> Option<&Action> {
        self.nodes.iter().find(|a| a.id == *id)
    }

    fn find_mut(&mut self, id: &Uuid) -> Option<&mut Action> {
        self.nodes.iter_mut().find(|a| a.id == *id)
    }

    /// Nombre d'actions arrivées à un statut terminal, donc évincables
    pub fn evictable_count(&self) -> usize {
        self.nodes.iter().filter(|a| a.is_terminal()).count()
    }

    /// Nombre d'actions pas encore terminées
    pub fn pending_count(&self) -> usize {
        self.nodes.len() - self.evictable_count()
    }

    fn evict_oldest_terminal(&mut self, ctx: &mut Context) -> bool {
        let oldest = self
            .nodes
            .iter()
            .filter(|a| a.is_terminal())
            .min_by_key(|a| a.created)
            .map(|a| a.id);

        match oldest {
            Some(id) => {
                if let Some(action) = self.find_mut(&id) {
                    clean(action, ctx);
                }
                self.nodes.retain(|a| a.id != id);
                eprintln!("[actions] evicted terminal action {}", id);
                true
            }
            None => false,
        }
    }

    /// Soumet un lot `{"data":[...]}`. Tout le lot est validé avant la mise
    /// en file, le moindre refus rejette l'ensemble.
    pub fn submit(&mut self, body: &Value, ctx: &mut Context) -> Result<Vec<Uuid>, SubmitError> {
        let Some(entries) = body.get("data").and_then(|d| d.as_array()) else {
            return Err(SubmitError::Invalid);
        };

        let mut accepted: Vec<(ActionTypeId, Value)> = Vec::new();
        for entry in entries {
            let Some(type_name) = entry.get("type").and_then(|t| t.as_str()) else {
                eprintln!("[actions] submission entry without type field");
                return Err(SubmitError::Invalid);
            };
            let Some(type_id) = ActionTypeId::from_name(type_name) else {
                eprintln!("[actions] unknown action type {}", type_name);
                return Err(SubmitError::Invalid);
            };
            let Some(attributes) = entry.get("attributes").filter(|a| a.is_object()) else {
                eprintln!("[actions] submission entry without attributes object");
                return Err(SubmitError::Invalid);
            };
            if !validate(type_id, attributes) {
                return Err(SubmitError::Invalid);
            }
            accepted.push((type_id, attributes.clone()));
        }

        // refus si la place restante ne suffit pas, même en évinçant tout
        // ce qui est terminal
        if self.pending_count() + accepted.len() > TASK_QUEUE_MAX {
            eprintln!("[actions] queue full, submission rejected");
            return Err(SubmitError::Overflow);
        }

        let mut ids = Vec::with_capacity(accepted.len());
        for (type_id, attributes) in accepted {
            while self.nodes.len() >= TASK_QUEUE_MAX {
                if !self.evict_oldest_terminal(ctx) {
                    return Err(SubmitError::Overflow);
                }
            }
            let action = Action::new(type_id, attributes);
            ids.push(action.id);
            self.nodes.push(action);
        }
        Ok(ids)
    }

    /// Marque toutes les actions pour suppression, le prochain tick les
    /// nettoie et les retire de la file
    pub fn mark_all_for_delete(&mut self) {
        for action in &mut self.nodes {
            action.delete_flag = true;
        }
    }

    /// Le tick : avance chaque action selon son statut.
    /// 1. les actions marquées pour suppression sont nettoyées puis retirées
    /// 2. une action pending ou active en timeout est nettoyée puis stoppée
    /// 3. pending -> process(), active -> evaluate()
    pub fn handle(&mut self, ctx: &mut Context) {
        let now = OffsetDateTime::now_utc();
        let mut to_remove: Vec<Uuid> = Vec::new();

        for i in 0..self.nodes.len() {
            let action = &mut self.nodes[i];

            if action.delete_flag {
                clean(action, ctx);
                if action.status != ActionStatus::Stopped {
                    action.status = ActionStatus::Stopped;
                }
                eprintln!("[actions] deleting action {}", action.id);
                to_remove.push(action.id);
                continue;
            }

            if !matches!(action.status, ActionStatus::Pending | ActionStatus::Active) {
                continue;
            }

            if action.timeout_at.map_or(false, |t| t < now) {
                eprintln!("[actions] action {} timed out", action.id);
                clean(action, ctx);
                action.status = ActionStatus::Stopped;
                action.last_evaluated = Some(now);
                continue;
            }

            if action.status == ActionStatus::Pending {
                match process(action, ctx) {
                    TaskResult::Failure => action.status = ActionStatus::Failed,
                    TaskResult::Pending | TaskResult::Success => {
                        action.status = ActionStatus::Active
                    }
                    TaskResult::Stopped => action.status = ActionStatus::Stopped,
                    TaskResult::Retry | TaskResult::NoChange => {}
                }
            } else {
                match evaluate(action, ctx) {
                    TaskResult::Success => action.status = ActionStatus::Completed,
                    TaskResult::Failure => action.status = ActionStatus::Failed,
                    TaskResult::Stopped => action.status = ActionStatus::Stopped,
                    _ => {}
                }
            }
            action.last_evaluated = Some(now);
        }

        // arrêts demandés par les handlers pendant ce tick
        for id in ctx.take_stop_requests() {
            if let Some(action) = self.find_mut(&id) {
                if !action.is_terminal() {
                    eprintln!("[actions] action {} stopped on request", id);
                    action.status = ActionStatus::Stopped;
                }
            }
        }

        if !to_remove.is_empty() {
            self.nodes.retain(|a| !to_remove.contains(&a.id));
        }
    }

    fn meta(&self) -> Value {
        let mut meta = json_meta_collection(0, TASK_QUEUE_MAX, self.nodes.len());
        meta["collection"]["pending"] = json!(self.pending_count());
        meta
    }

    /// Toutes les actions au format json:api
    pub fn to_json_all(&self, allow_list: &AllowList) -> Value {
        let data: Vec<Value> = self.nodes.iter().map(|a| jsonify(a, allow_list)).collect();
        json!({ "data": data, "meta": self.meta() })
    }

    /// Un sous-ensemble d'actions (réponse d'une soumission)
    pub fn to_json_subset(&self, ids: &[Uuid], allow_list: &AllowList) -> Value {
        let data: Vec<Value> = ids
            .iter()
            .filter_map(|id| self.find(id))
            .map(|a| jsonify(a, allow_list))
            .collect();
        json!({ "data": data, "meta": self.meta() })
    }

    pub fn to_json_one(&self, id: &Uuid, allow_list: &AllowList) -> Option<Value> {
        self.find(id).map(|a| json!({ "data": jsonify(a, allow_list) }))
    }
}

/// La boucle moteur : file d'actions + ressources partagées.
/// Tout tourne sous un seul verrou, les handlers ne bloquent jamais.
pub struct Engine {
    pub queue: ActionQueue,
    pub ctx: Context,
}

impl Engine {
    pub fn new(ctx: Context) -> Self {
        Self {
            queue: ActionQueue::new(),
            ctx,
        }
    }

    pub fn tick(&mut self) {
        self.queue.handle(&mut self.ctx);
        self.drive_standalone_collector();
    }

    /// Une découverte lancée hors file (POST /api/devices) n'a pas
    /// d'action à évaluer, le moteur la fait avancer lui-même
    fn drive_standalone_collector(&mut self) {
        if !self.ctx.collector.is_standalone() {
            return;
        }
        let devices = self.ctx.devices.clone();
        let diagnostics = self.ctx.diagnostics.clone();
        let mut devices = devices.lock();
        let mut diagnostics = diagnostics.lock();
        let _ = self
            .ctx
            .collector
            .continue_request(Instant::now(), &mut devices, &mut diagnostics);
    }

    /// Distribue un événement de la pile Thread puis relance un tick
    pub fn on_thread_event(&mut self, event: ThreadEvent) {
        match event {
            ThreadEvent::DiagGetResponse { tlvs } => self.ctx.collector.on_diag_response(tlvs),
            ThreadEvent::DiagGetFailed { error } => {
                eprintln!("[engine] diagnostic request failed: {}", error);
            }
            ThreadEvent::ChildTableEntry { parent, entry } => {
                self.ctx.collector.on_child_table_entry(parent, entry)
            }
            ThreadEvent::ChildTableDone { parent, .. } => {
                self.ctx.collector.on_child_table_done(parent)
            }
            ThreadEvent::ChildIp6Addrs { parent, child } => {
                self.ctx.collector.on_child_ip6_addrs(parent, child)
            }
            ThreadEvent::ChildIp6Done { parent, .. } => {
                self.ctx.collector.on_child_ip6_done(parent)
            }
            ThreadEvent::NeighborEntry { parent, entry } => {
                self.ctx.collector.on_neighbor_entry(parent, entry)
            }
            ThreadEvent::NeighborDone { parent, .. } => {
                self.ctx.collector.on_neighbor_done(parent)
            }
            ThreadEvent::CommissionerState(state) => {
                // le tick qui suit relance les actions en attente du
                // commissioner
                eprintln!("[engine] commissioner state: {:?}", state);
            }
            ThreadEvent::Joiner { event, eui64 } => {
                let stop = self.ctx.allow_list.on_joiner_event(event, &eui64);
                if stop {
                    eprintln!("[engine] no pending joiner left, stopping commissioner");
                    if let Err(e) = self.ctx.thread.commissioner_stop() {
                        eprintln!("[engine] commissioner stop failed: {}", e);
                    }
                }
            }
            ThreadEvent::EnergyReport {
                channel_mask,
                energy_list,
            } => {
                let diagnostics = self.ctx.diagnostics.clone();
                let mut diagnostics = diagnostics.lock();
                self.ctx
                    .energy_scan
                    .on_report(channel_mask, &energy_list, &mut diagnostics);
            }
        }
        self.tick();
    }
}

/// Démarre la boucle moteur : tick périodique de la file, poll rapproché
/// quand un cycle de collecte est actif, et drainage des événements Thread
pub fn spawn_engine(engine: Shared<Engine>, mut events: EventReceiver, tick_interval_ms: u64) {
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(Duration::from_millis(tick_interval_ms.max(100)));
        let mut fast_poll = tokio::time::interval(Duration::from_millis(250));

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    engine.lock().tick();
                }
                _ = fast_poll.tick() => {
                    let mut engine = engine.lock();
                    if !engine.ctx.collector.is_idle() {
                        engine.tick();
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => engine.lock().on_thread_event(event),
                        None => break,
                    }
                }
            }
        }
        eprintln!("[engine] event channel closed, engine task exiting");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::new_devices_collection;
    use crate::diagnostics::new_diagnostics_collection;
    use crate::models::ExtAddr;
    use crate::state::new_state;
    use crate::thread::{CommissionerState, JoinerEventKind};
    use devkit::scenario;
    use devkit::thread_stub::MockThreadClient;
    use std::sync::Arc;

    fn setup() -> (MockThreadClient, Engine) {
        let mock = MockThreadClient::new();
        mock.set_realm_local_all_thread_nodes("ff33:40:fd11:2200:0:1::1".parse().unwrap());
        let ctx = Context::new(
            Arc::new(mock.clone()),
            new_state(new_devices_collection()),
            new_state(new_diagnostics_collection()),
        );
        (mock, Engine::new(ctx))
    }

    fn submit_one(engine: &mut Engine, task: serde_json::Value) -> Uuid {
        let body = scenario::actions_body(vec![task]);
        let ids = engine.queue.submit(&body, &mut engine.ctx).unwrap();
        ids[0]
    }

    #[test]
    fn test_submission_rejects_whole_batch_on_one_invalid() {
        let (_mock, mut engine) = setup();
        let body = scenario::actions_body(vec![
            scenario::add_device_task("aabbccddeeff0011", "J01NME", 120),
            // pskd trop court
            scenario::add_device_task("aabbccddeeff0022", "ABC", 120),
        ]);

        assert_eq!(
            engine.queue.submit(&body, &mut engine.ctx),
            Err(SubmitError::Invalid)
        );
        assert!(engine.queue.is_empty());
    }

    #[test]
    fn test_queue_overflow_rejected_when_nothing_evictable() {
        let (_mock, mut engine) = setup();

        // 100 actions non terminales (le commissioner ne démarre jamais
        // avec le mock par défaut, process retourne retry)
        let tasks: Vec<serde_json::Value> = (0..TASK_QUEUE_MAX)
            .map(|i| {
                scenario::add_device_task(&format!("aabbccddeeff{:04x}", i), "J01NME", 3600)
            })
            .collect();
        let body = scenario::actions_body(tasks);
        engine.queue.submit(&body, &mut engine.ctx).unwrap();
        engine.tick();
        assert_eq!(engine.queue.len(), TASK_QUEUE_MAX);
        assert_eq!(engine.queue.pending_count(), TASK_QUEUE_MAX);

        let body =
            scenario::actions_body(vec![scenario::add_device_task("0011223344556677", "J01NME", 60)]);
        assert_eq!(
            engine.queue.submit(&body, &mut engine.ctx),
            Err(SubmitError::Overflow)
        );
        assert_eq!(engine.queue.len(), TASK_QUEUE_MAX);
    }

    #[test]
    fn test_terminal_actions_are_evicted_for_new_submissions() {
        let (_mock, mut engine) = setup();

        // remplit la file d'actions immédiatement terminées
        let tasks: Vec<serde_json::Value> = (0..TASK_QUEUE_MAX)
            .map(|_| scenario::reset_counters_task(&["macCounter"], 60))
            .collect();
        let body = scenario::actions_body(tasks);
        engine.queue.submit(&body, &mut engine.ctx).unwrap();
        engine.tick(); // process -> active
        engine.tick(); // evaluate -> completed
        assert_eq!(engine.queue.evictable_count(), TASK_QUEUE_MAX);

        // une nouvelle soumission évince la plus ancienne entrée terminale
        let id = submit_one(
            &mut engine,
            scenario::reset_counters_task(&["mleCounter"], 60),
        );
        assert_eq!(engine.queue.len(), TASK_QUEUE_MAX);
        assert!(engine.queue.find(&id).is_some());
    }

    #[test]
    fn test_reset_counters_task_completes_immediately() {
        let (mock, mut engine) = setup();

        let id = submit_one(
            &mut engine,
            scenario::reset_counters_task(&["macCounter", "mleCounter"], 60),
        );
        engine.tick();
        assert_eq!(engine.queue.find(&id).unwrap().status, ActionStatus::Active);
        engine.tick();
        assert_eq!(
            engine.queue.find(&id).unwrap().status,
            ActionStatus::Completed
        );

        let resets = mock.sent_diag_resets();
        assert_eq!(resets.len(), 1);
        // multicast realm-local all-thread-nodes, TLVs macCounters puis mleCounters
        assert_eq!(resets[0].0, "ff33:40:fd11:2200:0:1::1".parse::<std::net::Ipv6Addr>().unwrap());
        assert_eq!(resets[0].1, vec![9, 34]);
    }

    #[test]
    fn test_status_never_reverts_and_delete_clears_queue() {
        let (_mock, mut engine) = setup();

        let id = submit_one(&mut engine, scenario::reset_counters_task(&["macCounter"], 60));
        engine.tick();
        engine.tick();
        assert_eq!(
            engine.queue.find(&id).unwrap().status,
            ActionStatus::Completed
        );

        // un tick de plus ne change plus rien
        engine.tick();
        assert_eq!(
            engine.queue.find(&id).unwrap().status,
            ActionStatus::Completed
        );

        engine.queue.mark_all_for_delete();
        engine.tick();
        assert!(engine.queue.is_empty());
    }

    #[test]
    fn test_add_device_waits_for_commissioner_then_joins() {
        let (mock, mut engine) = setup();
        let eui = ExtAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);

        let id = submit_one(
            &mut engine,
            scenario::add_device_task("aabbccddeeff0011", "J01NME", 3600),
        );

        // commissioner inactif : le process démarre le commissioner et
        // l'action reste pending
        engine.tick();
        assert_eq!(engine.queue.find(&id).unwrap().status, ActionStatus::Pending);
        assert_eq!(mock.commissioner_starts(), 1);

        // le commissioner devient actif, le joiner est enregistré
        mock.set_commissioner_state(CommissionerState::Active);
        engine.on_thread_event(ThreadEvent::CommissionerState(CommissionerState::Active));
        assert_eq!(engine.queue.find(&id).unwrap().status, ActionStatus::Active);
        let joiners = mock.added_joiners();
        assert_eq!(joiners.len(), 1);
        assert_eq!(joiners[0].0, Some(eui));
        assert_eq!(joiners[0].1, "J01NME");

        // événements joiner : tentative puis jonction
        engine.on_thread_event(ThreadEvent::Joiner {
            event: JoinerEventKind::Start,
            eui64: eui,
        });
        assert_eq!(engine.queue.find(&id).unwrap().status, ActionStatus::Active);
        engine.on_thread_event(ThreadEvent::Joiner {
            event: JoinerEventKind::Finalize,
            eui64: eui,
        });
        assert_eq!(
            engine.queue.find(&id).unwrap().status,
            ActionStatus::Completed
        );
    }

    #[test]
    fn test_add_device_same_eui_stops_previous_action() {
        let (mock, mut engine) = setup();
        mock.set_commissioner_state(CommissionerState::Active);
        let eui = ExtAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);

        let first = submit_one(
            &mut engine,
            scenario::add_device_task("aabbccddeeff0011", "J01NME", 3600),
        );
        engine.tick();
        assert_eq!(
            engine.queue.find(&first).unwrap().status,
            ActionStatus::Active
        );

        let second = submit_one(
            &mut engine,
            scenario::add_device_task("aabbccddeeff0011", "NEWPSK", 3600),
        );
        engine.tick();

        // l'ancienne action du même joiner est stoppée, la nouvelle prend
        // le relais avec le nouveau pskd
        assert_eq!(
            engine.queue.find(&first).unwrap().status,
            ActionStatus::Stopped
        );
        assert_eq!(
            engine.queue.find(&second).unwrap().status,
            ActionStatus::Active
        );
        assert_eq!(engine.ctx.allow_list.find(&eui).unwrap().pskd, "NEWPSK");
    }

    #[test]
    fn test_last_joiner_removal_stops_commissioner() {
        let (mock, mut engine) = setup();
        mock.set_commissioner_state(CommissionerState::Active);
        let eui = ExtAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);

        let id = submit_one(
            &mut engine,
            scenario::add_device_task("aabbccddeeff0011", "J01NME", 3600),
        );
        engine.tick();

        engine.on_thread_event(ThreadEvent::Joiner {
            event: JoinerEventKind::Removed,
            eui64: eui,
        });
        // joiner expiré sans tentative : action en échec, commissioner arrêté
        assert_eq!(engine.queue.find(&id).unwrap().status, ActionStatus::Failed);
        assert_eq!(mock.commissioner_stops(), 1);
    }

    #[test]
    fn test_energy_scan_single_flight_with_retry() {
        let (mock, mut engine) = setup();
        mock.set_commissioner_state(CommissionerState::Active);
        mock.set_mesh_local_prefix([0xfd, 0x11, 0x22, 0, 0, 0, 0, 1]);

        let first = submit_one(
            &mut engine,
            scenario::energy_scan_task("0000000000000001", &[11, 12], 2, 200, 100, 600),
        );
        let second = submit_one(
            &mut engine,
            scenario::energy_scan_task("0000000000000002", &[11], 1, 200, 100, 600),
        );

        engine.tick();
        // un seul scan à la fois : le second attend
        assert_eq!(
            engine.queue.find(&first).unwrap().status,
            ActionStatus::Active
        );
        assert_eq!(
            engine.queue.find(&second).unwrap().status,
            ActionStatus::Pending
        );
        assert_eq!(mock.energy_scans().len(), 1);

        // résultats du premier scan : 2 mesures sur 2 canaux
        engine.on_thread_event(ThreadEvent::EnergyReport {
            channel_mask: (1 << 11) | (1 << 12),
            energy_list: vec![-60, -70, -61, -71],
        });
        assert_eq!(
            engine.queue.find(&first).unwrap().status,
            ActionStatus::Completed
        );
        let rel = engine.queue.find(&first).unwrap().relationship.clone().unwrap();
        assert_eq!(rel.type_name, "diagnostics");

        // le second scan démarre au tick suivant
        engine.tick();
        assert_eq!(
            engine.queue.find(&second).unwrap().status,
            ActionStatus::Active
        );
        assert_eq!(mock.energy_scans().len(), 2);

        engine.on_thread_event(ThreadEvent::EnergyReport {
            channel_mask: 1 << 11,
            energy_list: vec![-55],
        });
        assert_eq!(
            engine.queue.find(&second).unwrap().status,
            ActionStatus::Completed
        );
        assert_eq!(engine.ctx.diagnostics.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_engine_loop_processes_queue_and_events() {
        devkit::init_test_logging();
        let (mock, engine) = setup();
        let engine = new_state(engine);
        let events = mock.setup_receiver();
        spawn_engine(engine.clone(), events, 50);

        let id = {
            let mut engine = engine.lock();
            submit_one(
                &mut engine,
                scenario::reset_counters_task(&["macCounter"], 60),
            )
        };
        // un événement de la pile déclenche aussi un tick
        mock.simulate_event(ThreadEvent::CommissionerState(CommissionerState::Active));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let engine = engine.lock();
        assert_eq!(
            engine.queue.find(&id).unwrap().status,
            ActionStatus::Completed
        );
        assert_eq!(mock.sent_diag_resets().len(), 1);
    }

    #[test]
    fn test_action_timeout_stops_and_cleans() {
        let (_mock, mut engine) = setup();

        // timeout de 0 seconde : expirée dès le premier tick
        let id = submit_one(
            &mut engine,
            scenario::add_device_task("aabbccddeeff0011", "J01NME", 0),
        );
        std::thread::sleep(std::time::Duration::from_millis(1100));
        engine.tick();
        assert_eq!(engine.queue.find(&id).unwrap().status, ActionStatus::Stopped);
    }
}
