/*!
Devkit Meshion

Outillage de développement et de test pour le kernel :
- MockThreadClient : pile Thread simulée, sans radio ni NCP
- scenario : constructeurs de corps d'actions et de TLVs pour les tests
*/

pub mod scenario;
pub mod thread_stub;

/// Init logging pour tests, sans paniquer si déjà initialisé
pub fn init_test_logging() {
    let _ = env_logger::try_init();
    log::debug!("devkit logging ready");
}
