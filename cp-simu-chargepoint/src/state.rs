use parking_lot::Mutex;
use std::sync::Arc;

/// État partagé entre la boucle de contrôle et les tâches de fond (MQTT, compteurs)
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Un emplacement par connecteur : le connecteur `n` (1-based) vit à l'index `n - 1`
pub fn per_connector<T: Default>(count: usize) -> Shared<Vec<T>> {
    new_state((0..count).map(|_| T::default()).collect())
}

/// Traduit un numéro de connecteur (1-based) en index, `None` hors bornes
pub fn connector_index(connector_id: u32, count: usize) -> Option<usize> {
    let id = connector_id as usize;
    (id >= 1 && id <= count).then(|| id - 1)
}
