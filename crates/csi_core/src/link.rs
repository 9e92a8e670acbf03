//! Colaborador de link (associação Wi-Fi).
//!
//! O core só precisa saber se o link está de pé; conectar e desconectar são
//! responsabilidade do orquestrador.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::error::CsiError;
use crate::pacing::Clock;

/// Predicado "link de pé", consultado antes de cada envio.
pub trait LinkStatus {
    fn is_link_up(&self) -> bool;
}

/// Link completo, controlado pelo orquestrador.
pub trait Link: LinkStatus {
    /// Bloqueia até o link subir ou o orçamento de tentativas acabar.
    fn connect(&mut self, network: &NetworkConfig) -> Result<(), CsiError>;

    fn disconnect(&mut self);
}

/// Espera o link subir, consultando a cada `poll` até `max_polls` vezes.
///
/// Retorna `true` assim que o link estiver de pé.
pub fn wait_for_link<L, C>(link: &L, clock: &C, poll: Duration, max_polls: u32) -> bool
where
    L: LinkStatus + ?Sized,
    C: Clock + ?Sized,
{
    if link.is_link_up() {
        return true;
    }
    for attempt in 1..=max_polls {
        warn!(attempt, max_polls, "Link fora do ar, aguardando...");
        clock.sleep(poll);
        if link.is_link_up() {
            info!("Conexão com o link estabelecida");
            return true;
        }
    }
    false
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
