//! Link do host: a associação Wi-Fi é do sistema operacional.
//!
//! "Conectar" aqui é confirmar que existe rota para o destino dos datagramas;
//! o link é considerado de pé enquanto essa rota existir.

use std::time::Duration;

use csi_core::config::NetworkConfig;
use csi_core::error::CsiError;
use csi_core::link::{Link, LinkStatus};
use csi_core::pacing::Clock;
use csi_core::transmitter::{bind_for, resolve};
use tracing::{debug, info, warn};

pub struct HostLink<C: Clock> {
    /// `ip:porta` usado para checar a rota
    route_endpoint: String,
    /// IP local para bind (vazio = auto), o mesmo do transmissor
    bind_ip: String,
    retries: u32,
    retry_wait: Duration,
    clock: C,
    connected: Option<String>,
}

impl<C: Clock> HostLink<C> {
    pub fn new(
        route_endpoint: String,
        bind_ip: String,
        retries: u32,
        retry_wait: Duration,
        clock: C,
    ) -> Self {
        Self {
            route_endpoint,
            bind_ip,
            retries,
            retry_wait,
            clock,
            connected: None,
        }
    }

    fn route_available(&self) -> bool {
        // connect() em UDP só consulta a tabela de rotas, nada vai para o fio
        let route = resolve(&self.route_endpoint)
            .and_then(|dest| bind_for(dest, &self.bind_ip).and_then(|s| s.connect(dest)));
        match route {
            Ok(()) => true,
            Err(e) => {
                debug!("Sem rota para {}: {e}", self.route_endpoint);
                false
            }
        }
    }
}

impl<C: Clock> LinkStatus for HostLink<C> {
    fn is_link_up(&self) -> bool {
        self.connected.is_some() && self.route_available()
    }
}

impl<C: Clock> Link for HostLink<C> {
    fn connect(&mut self, network: &NetworkConfig) -> Result<(), CsiError> {
        let attempts = self.retries.max(1);
        for attempt in 1..=attempts {
            if self.route_available() {
                info!(ssid = %network.ssid, "Conectado (rede gerenciada pelo host)");
                self.connected = Some(network.ssid.clone());
                return Ok(());
            }
            if attempt < attempts {
                warn!(ssid = %network.ssid, attempt, attempts, "Reconectando ao AP");
                self.clock.sleep(self.retry_wait);
            }
        }

        self.connected = None;
        Err(CsiError::ConnectFailed {
            network: network.ssid.clone(),
            attempts,
        })
    }

    fn disconnect(&mut self) {
        if let Some(ssid) = self.connected.take() {
            debug!(%ssid, "Desconectado");
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use csi_core::pacing::ManualClock;

    fn link(endpoint: &str, bind_ip: &str, retries: u32) -> HostLink<ManualClock> {
        HostLink::new(
            endpoint.into(),
            bind_ip.into(),
            retries,
            Duration::from_secs(1),
            ManualClock::new(),
        )
    }

    #[test]
    fn loopback_link_connects_and_disconnects() {
        let mut link = link("127.0.0.1:2223", "", 1);
        assert!(!link.is_link_up());

        link.connect(&NetworkConfig::new("AP1", "12345678")).unwrap();
        assert!(link.is_link_up());

        link.disconnect();
        assert!(!link.is_link_up());
    }

    #[test]
    fn route_check_honours_bind_ip() {
        let mut link = link("127.0.0.1:2223", "127.0.0.1", 1);
        link.connect(&NetworkConfig::new("AP1", "x")).unwrap();
        assert!(link.is_link_up());
    }

    #[test]
    fn invalid_route_endpoint_fails_without_trailing_wait() {
        let mut link = link("sem-porta", "", 3);
        let err = link.connect(&NetworkConfig::new("AP1", "x")).unwrap_err();
        assert!(matches!(err, CsiError::ConnectFailed { attempts: 3, .. }));
        // Espera só entre tentativas, nunca depois da última
        assert_eq!(link.clock.sleeps(), vec![Duration::from_secs(1); 2]);
    }
}
