use parking_lot::Mutex;
use std::sync::Arc;

/// Etat partagé du kernel. La boucle moteur (tick de la file d'actions,
/// événements de la pile Thread) et les handlers axum accèdent au même
/// moteur et aux mêmes collections devices/diagnostics derrière ce verrou.
/// Les sections critiques restent courtes et aucun verrou n'est tenu à
/// travers un await, le long-poll de découverte attend sur un oneshot
/// après avoir relâché le moteur.
pub type Shared<T> = Arc<Mutex<T>>;

/// Enrobe une valeur pour le partage entre la boucle moteur et le
/// serveur HTTP
pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
