//! Transmissor UDP com controle de taxa.
//!
//! Fluxo de um lote:
//! 1. confere o link antes de cada envio (caiu → [`CsiError::LinkDown`])
//! 2. envia um datagrama; escrita parcial espera um tick e reenvia o mesmo
//!    payload, até o limite configurado
//! 3. mede a latência do envio e espera o restante do intervalo ([`pace`])

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::TransmitterConfig;
use crate::error::CsiError;
use crate::link::LinkStatus;
use crate::pacing::{Clock, pace};

// ──────────────────────────────────────────────
// Transporte
// ──────────────────────────────────────────────

/// Handle de saída sem conexão, com destino fixo.
pub trait Transport {
    /// Envia um datagrama e retorna quantos bytes saíram.
    fn send(&mut self, payload: &[u8]) -> io::Result<usize>;

    /// Destino, para logs e erros.
    fn endpoint(&self) -> &str;
}

/// Abre transportes para um endpoint.
pub trait Connector {
    type Transport: Transport;

    fn open(&mut self, endpoint: &str) -> Result<Self::Transport, CsiError>;
}

/// Socket UDP "conectado" a um destino fixo.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    endpoint: String,
}

/// Primeiro endereço de `endpoint` (`ip:porta` ou `host:porta`).
pub fn resolve(endpoint: &str) -> io::Result<SocketAddr> {
    endpoint.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "endpoint sem endereço")
    })
}

/// Socket local para falar com `dest`: em `bind_ip` quando definido, senão no
/// endereço "qualquer" da mesma família de `dest`.
pub fn bind_for(dest: SocketAddr, bind_ip: &str) -> io::Result<UdpSocket> {
    let bind_addr = match (bind_ip.is_empty(), dest) {
        (false, _) => format!("{bind_ip}:0"),
        (true, SocketAddr::V4(_)) => "0.0.0.0:0".to_string(),
        (true, SocketAddr::V6(_)) => "[::]:0".to_string(),
    };
    UdpSocket::bind(bind_addr)
}

impl UdpTransport {
    /// Resolve o endpoint, cria o socket e fixa o destino.
    pub fn open(endpoint: &str, bind_ip: &str) -> Result<Self, CsiError> {
        let transport_err = |source| CsiError::Transport {
            endpoint: endpoint.to_owned(),
            source,
        };

        let addr = resolve(endpoint).map_err(transport_err)?;
        let socket = bind_for(addr, bind_ip).map_err(transport_err)?;
        if let SocketAddr::V4(v4) = addr {
            if v4.ip().is_broadcast() {
                socket.set_broadcast(true).map_err(transport_err)?;
                info!("Modo BROADCAST ativado");
            }
        }
        socket.connect(addr).map_err(transport_err)?;

        match socket.local_addr() {
            Ok(local) => debug!("Socket UDP {local} → {addr}"),
            Err(_) => debug!("Socket UDP → {addr}"),
        }
        Ok(Self {
            socket,
            endpoint: endpoint.to_owned(),
        })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// [`Connector`] que abre [`UdpTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct UdpConnector {
    pub bind_ip: String,
}

impl Connector for UdpConnector {
    type Transport = UdpTransport;

    fn open(&mut self, endpoint: &str) -> Result<UdpTransport, CsiError> {
        UdpTransport::open(endpoint, &self.bind_ip)
    }
}

/// Abre o transporte com tentativas limitadas e espera fixa entre elas.
pub fn open_with_retry<K, C>(
    connector: &mut K,
    endpoint: &str,
    attempts: u32,
    wait: Duration,
    clock: &C,
) -> Result<K::Transport, CsiError>
where
    K: Connector + ?Sized,
    C: Clock + ?Sized,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match connector.open(endpoint) {
            Ok(transport) => return Ok(transport),
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, "{e}. Tentando novamente em {wait:?}...");
                clock.sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ──────────────────────────────────────────────
// Transmissor
// ──────────────────────────────────────────────

/// Resumo de um lote enviado.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchReport {
    /// Datagramas enviados por inteiro
    pub sent: u32,
    /// Escritas parciais reenviadas
    pub short_writes: u32,
    /// Latência medida do último envio (ms)
    pub last_lag_ms: f64,
}

/// Envia lotes com ritmo controlado.
#[derive(Debug, Clone)]
pub struct Transmitter {
    target_rate_hz: Option<f64>,
    max_short_write_retries: u32,
    tick: Duration,
    lag_ms: f64,
}

impl Transmitter {
    pub fn new(target_rate_hz: Option<f64>, max_short_write_retries: u32, tick: Duration) -> Self {
        Self {
            target_rate_hz,
            max_short_write_retries,
            tick,
            lag_ms: 0.0,
        }
    }

    pub fn from_config(config: &TransmitterConfig) -> Self {
        Self::new(
            config.packet_rate_hz,
            config.max_short_write_retries,
            config.tick(),
        )
    }

    /// Latência medida do envio mais recente (ms).
    pub fn lag_ms(&self) -> f64 {
        self.lag_ms
    }

    /// Um datagrama. Envio parcial vira [`CsiError::ShortWrite`].
    pub fn send<T>(&self, transport: &mut T, payload: &[u8]) -> Result<usize, CsiError>
    where
        T: Transport + ?Sized,
    {
        let sent = transport.send(payload).map_err(|source| CsiError::Transport {
            endpoint: transport.endpoint().to_owned(),
            source,
        })?;
        if sent != payload.len() {
            return Err(CsiError::ShortWrite {
                sent,
                expected: payload.len(),
            });
        }
        Ok(sent)
    }

    /// Envia `count` cópias de `payload`, com ritmo e verificação de link.
    ///
    /// Link fora do ar aborta o lote sem reenfileirar; o erro carrega quantos
    /// pacotes já saíram para o chamador retomar o restante após reconectar.
    pub fn send_batch<T, L, C>(
        &mut self,
        transport: &mut T,
        link: &L,
        clock: &C,
        payload: &[u8],
        count: u32,
    ) -> Result<BatchReport, CsiError>
    where
        T: Transport + ?Sized,
        L: LinkStatus + ?Sized,
        C: Clock + ?Sized,
    {
        let mut report = BatchReport::default();
        let mut consecutive_short = 0u32;

        while report.sent < count {
            if !link.is_link_up() {
                warn!(sent = report.sent, "Link fora do ar, abortando lote");
                return Err(CsiError::LinkDown { sent: report.sent });
            }

            let start = clock.now_ms();
            match self.send(transport, payload) {
                Ok(bytes) => {
                    consecutive_short = 0;
                    report.sent += 1;
                    debug!("→ {bytes} bytes para {}", transport.endpoint());
                }
                Err(CsiError::ShortWrite { sent, expected }) => {
                    consecutive_short += 1;
                    report.short_writes += 1;
                    if consecutive_short > self.max_short_write_retries {
                        warn!(
                            attempts = consecutive_short,
                            "Escritas parciais demais para {}",
                            transport.endpoint()
                        );
                        return Err(CsiError::TransportDegraded {
                            attempts: consecutive_short,
                        });
                    }
                    debug!(sent, expected, "Escrita parcial, reenviando após um tick");
                    clock.sleep(self.tick);
                    continue;
                }
                Err(e) => return Err(e),
            }

            self.lag_ms = clock.now_ms() - start;
            report.last_lag_ms = self.lag_ms;
            clock.sleep(pace(self.target_rate_hz, self.lag_ms));
        }

        Ok(report)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::{DEFAULT_DELAY, ManualClock};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Transporte com respostas roteirizadas; sem roteiro, envia tudo.
    #[derive(Debug)]
    struct ScriptedTransport {
        script: VecDeque<io::Result<usize>>,
        sent: Vec<Vec<u8>>,
        clock: Option<Arc<ManualClock>>,
        latency_ms: f64,
    }

    impl ScriptedTransport {
        fn new(script: Vec<io::Result<usize>>) -> Self {
            Self {
                script: script.into(),
                sent: Vec::new(),
                clock: None,
                latency_ms: 0.0,
            }
        }

        fn with_latency(mut self, clock: Arc<ManualClock>, latency_ms: f64) -> Self {
            self.clock = Some(clock);
            self.latency_ms = latency_ms;
            self
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
            if let Some(clock) = &self.clock {
                clock.advance(self.latency_ms);
            }
            let result = self.script.pop_front().unwrap_or(Ok(payload.len()));
            if let Ok(n) = result {
                if n == payload.len() {
                    self.sent.push(payload.to_vec());
                }
            }
            result
        }

        fn endpoint(&self) -> &str {
            "test:0"
        }
    }

    /// Cai depois de `up_checks` consultas.
    struct FlakyLink {
        up_checks: Cell<u32>,
    }

    impl FlakyLink {
        fn always_up() -> Self {
            Self { up_checks: Cell::new(u32::MAX) }
        }
    }

    impl LinkStatus for FlakyLink {
        fn is_link_up(&self) -> bool {
            let left = self.up_checks.get();
            if left == 0 {
                return false;
            }
            self.up_checks.set(left - 1);
            true
        }
    }

    #[test]
    fn batch_sends_requested_count_with_default_delay() {
        let clock = ManualClock::new();
        let mut tx = Transmitter::new(None, 3, Duration::from_millis(1));
        let mut transport = ScriptedTransport::new(vec![]);

        let report = tx
            .send_batch(&mut transport, &FlakyLink::always_up(), &clock, b"1\n", 3)
            .unwrap();

        assert_eq!(report.sent, 3);
        assert_eq!(transport.sent, vec![b"1\n".to_vec(); 3]);
        assert_eq!(clock.sleeps(), vec![DEFAULT_DELAY; 3]);
    }

    #[test]
    fn pacing_compensates_measured_send_latency() {
        let clock = Arc::new(ManualClock::new());
        let mut tx = Transmitter::new(Some(10.0), 3, Duration::from_millis(1));
        let mut transport = ScriptedTransport::new(vec![]).with_latency(Arc::clone(&clock), 30.0);

        let report = tx
            .send_batch(&mut transport, &FlakyLink::always_up(), clock.as_ref(), b"x", 2)
            .unwrap();

        assert_eq!(report.last_lag_ms, 30.0);
        assert_eq!(tx.lag_ms(), 30.0);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(70); 2]);
        // 2 envios a 10 Hz ocupam 200 ms no total
        assert_eq!(clock.now_ms(), 200.0);
    }

    #[test]
    fn short_write_is_retried_after_one_tick() {
        let clock = ManualClock::new();
        let mut tx = Transmitter::new(None, 3, Duration::from_millis(1));
        let mut transport = ScriptedTransport::new(vec![Ok(1)]);

        let report = tx
            .send_batch(&mut transport, &FlakyLink::always_up(), &clock, b"1\n", 1)
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.short_writes, 1);
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1), DEFAULT_DELAY]);
    }

    #[test]
    fn repeated_short_writes_surface_degraded_transport() {
        let clock = ManualClock::new();
        let mut tx = Transmitter::new(None, 2, Duration::from_millis(1));
        let mut transport = ScriptedTransport::new(vec![Ok(0), Ok(1), Ok(1), Ok(1)]);

        let err = tx
            .send_batch(&mut transport, &FlakyLink::always_up(), &clock, b"1\n", 1)
            .unwrap_err();

        assert!(matches!(err, CsiError::TransportDegraded { attempts: 3 }));
        assert!(transport.sent.is_empty());
        // Só as duas primeiras parciais esperaram um tick
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn link_loss_aborts_batch_with_progress() {
        let clock = ManualClock::new();
        let mut tx = Transmitter::new(None, 3, Duration::from_millis(1));
        let mut transport = ScriptedTransport::new(vec![]);
        let link = FlakyLink { up_checks: Cell::new(2) };

        let err = tx
            .send_batch(&mut transport, &link, &clock, b"1\n", 5)
            .unwrap_err();

        assert!(matches!(err, CsiError::LinkDown { sent: 2 }));
        assert_eq!(transport.sent.len(), 2);
    }

    #[test]
    fn io_error_is_transport_error() {
        let clock = ManualClock::new();
        let mut tx = Transmitter::new(None, 3, Duration::from_millis(1));
        let mut transport = ScriptedTransport::new(vec![Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "recusado",
        ))]);

        let err = tx
            .send_batch(&mut transport, &FlakyLink::always_up(), &clock, b"1\n", 1)
            .unwrap_err();
        assert!(matches!(err, CsiError::Transport { ref endpoint, .. } if endpoint == "test:0"));
    }

    struct FailingConnector {
        failures: u32,
        opened: u32,
    }

    impl Connector for FailingConnector {
        type Transport = ScriptedTransport;

        fn open(&mut self, endpoint: &str) -> Result<ScriptedTransport, CsiError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(CsiError::Transport {
                    endpoint: endpoint.to_owned(),
                    source: io::Error::new(io::ErrorKind::AddrNotAvailable, "sem rota"),
                });
            }
            self.opened += 1;
            Ok(ScriptedTransport::new(vec![]))
        }
    }

    #[test]
    fn open_retries_with_fixed_wait() {
        let clock = ManualClock::new();
        let mut connector = FailingConnector { failures: 2, opened: 0 };
        let wait = Duration::from_millis(1000);

        assert!(open_with_retry(&mut connector, "x:1", 5, wait, &clock).is_ok());
        assert_eq!(connector.opened, 1);
        assert_eq!(clock.sleeps(), vec![wait, wait]);
    }

    #[test]
    fn open_gives_up_after_attempts() {
        let clock = ManualClock::new();
        let mut connector = FailingConnector { failures: 10, opened: 0 };

        let err = open_with_retry(&mut connector, "x:1", 3, Duration::from_millis(5), &clock)
            .unwrap_err();
        assert!(matches!(err, CsiError::Transport { .. }));
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(connector.failures, 7);
    }

    #[test]
    fn udp_transport_delivers_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let endpoint = receiver.local_addr().unwrap().to_string();

        let mut connector = UdpConnector::default();
        let mut transport = connector.open(&endpoint).unwrap();
        assert_eq!(transport.endpoint(), endpoint);

        let tx = Transmitter::new(None, 3, Duration::from_millis(1));
        assert_eq!(tx.send(&mut transport, b"1\n").unwrap(), 2);

        let mut buf = [0u8; 64];
        let (n, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"1\n");
        assert!(from.ip().is_loopback());
    }

    #[test]
    fn bind_follows_destination_family() {
        let v4 = bind_for(resolve("127.0.0.1:2223").unwrap(), "").unwrap();
        assert!(v4.local_addr().unwrap().is_ipv4());

        let pinned = bind_for(resolve("127.0.0.1:2223").unwrap(), "127.0.0.1").unwrap();
        assert!(pinned.local_addr().unwrap().ip().is_loopback());
    }

    #[test]
    fn unresolvable_endpoint_is_transport_error() {
        let err = UdpTransport::open("not-an-endpoint", "").unwrap_err();
        assert!(matches!(err, CsiError::Transport { .. }));
    }
}
