/**
 * ALLOW-LIST COMMISSIONER - Joiners autorisés et cycle de vie du commissioner
 *
 * RÔLE :
 * Ce module possède la liste des joiners en cours d'enrôlement (eui64, pskd,
 * uuid de l'action qui les a soumis) et traduit les événements joiner du
 * commissioner en transitions d'état. C'est le seul endroit qui démarre et
 * arrête le commissioner.
 *
 * FONCTIONNEMENT :
 * - séquence possédée, insertion en queue, recherche linéaire (cardinalité
 *   faible, au plus le nombre de joiners d'un réseau)
 * - Start -> JoinAttempted, Finalize -> Joined,
 *   Removed en PendingJoiner -> Expired, Removed sinon -> JoinFailed
 * - quand plus aucune entrée n'est non-terminale, arrêt du commissioner
 */

use crate::models::ExtAddr;
use crate::thread::JoinerEventKind;
use uuid::Uuid;

pub const PSKD_LENGTH_MIN: usize = 6;
pub const PSKD_LENGTH_MAX: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    New,
    PendingJoiner,
    JoinAttempted,
    Joined,
    JoinFailed,
    Expired,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::New => "new",
            EntryState::PendingJoiner => "pendingJoiner",
            EntryState::JoinAttempted => "joinAttempted",
            EntryState::Joined => "joined",
            EntryState::JoinFailed => "joinFailed",
            EntryState::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryState::Joined | EntryState::JoinFailed | EntryState::Expired
        )
    }
}

#[derive(Debug, Clone)]
pub struct AllowListEntry {
    pub eui64: ExtAddr,
    /// uuid de l'action addThreadDeviceTask qui a soumis ce joiner
    pub uuid: Uuid,
    pub timeout_s: u32,
    pub pskd: String,
    pub state: EntryState,
}

/// Etat du joiner vu par l'évaluation d'une action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    Joined,
    Failed,
    Pending,
}

#[derive(Default)]
pub struct AllowList {
    entries: Vec<AllowListEntry>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, eui64: &ExtAddr) -> Option<&AllowListEntry> {
        self.entries.iter().find(|e| e.eui64 == *eui64)
    }

    pub fn find_mut(&mut self, eui64: &ExtAddr) -> Option<&mut AllowListEntry> {
        self.entries.iter_mut().find(|e| e.eui64 == *eui64)
    }

    /// Ajoute ou rafraîchit l'entrée d'un joiner
    pub fn add_device(&mut self, eui64: ExtAddr, timeout_s: u32, pskd: &str, uuid: Uuid) {
        if let Some(entry) = self.find_mut(&eui64) {
            entry.pskd = pskd.to_string();
            entry.timeout_s = timeout_s;
            entry.uuid = uuid;
            entry.state = EntryState::New;
        } else {
            self.entries.push(AllowListEntry {
                eui64,
                uuid,
                timeout_s,
                pskd: pskd.to_string(),
                state: EntryState::New,
            });
        }
    }

    pub fn erase(&mut self, eui64: &ExtAddr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.eui64 != *eui64);
        self.entries.len() != before
    }

    pub fn erase_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nombre de joiners pas encore arrivés à un état terminal
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.state.is_terminal()).count()
    }

    pub fn join_status(&self, eui64: &ExtAddr) -> JoinStatus {
        match self.find(eui64) {
            None => JoinStatus::Failed,
            Some(entry) => match entry.state {
                EntryState::Joined => JoinStatus::Joined,
                EntryState::JoinFailed | EntryState::Expired => JoinStatus::Failed,
                _ => JoinStatus::Pending,
            },
        }
    }

    /// Applique un événement joiner du commissioner.
    /// Retourne vrai quand le commissioner peut être arrêté (plus aucun
    /// joiner en attente).
    pub fn on_joiner_event(&mut self, event: JoinerEventKind, eui64: &ExtAddr) -> bool {
        if let Some(entry) = self.find_mut(eui64) {
            match event {
                JoinerEventKind::Start => {
                    entry.state = EntryState::JoinAttempted;
                    eprintln!("[allowlist] joiner {} attempting to join", entry.eui64);
                }
                JoinerEventKind::Finalize => {
                    entry.state = EntryState::Joined;
                    eprintln!("[allowlist] joiner {} joined", entry.eui64);
                }
                JoinerEventKind::Removed => {
                    if entry.state == EntryState::PendingJoiner {
                        entry.state = EntryState::Expired;
                        eprintln!("[allowlist] joiner {} expired", entry.eui64);
                    } else if entry.state != EntryState::Joined {
                        entry.state = EntryState::JoinFailed;
                        eprintln!("[allowlist] joiner {} failed to join", entry.eui64);
                    }
                }
                JoinerEventKind::Connected | JoinerEventKind::End => {}
            }
        } else {
            eprintln!("[allowlist] event for unknown joiner {}", eui64);
        }

        matches!(event, JoinerEventKind::Removed) && self.pending_count() == 0
    }
}

/// Vérifie un PSK-d de joiner : longueur 6..=32, alphanumérique majuscule,
/// sans les caractères I, O, Q, Z
pub fn verify_pskd(pskd: &str) -> bool {
    if pskd.len() < PSKD_LENGTH_MIN || pskd.len() > PSKD_LENGTH_MAX {
        return false;
    }
    pskd.chars().all(|c| {
        c.is_ascii_alphanumeric()
            && !c.is_ascii_lowercase()
            && !matches!(c, 'I' | 'O' | 'Q' | 'Z')
    })
}
