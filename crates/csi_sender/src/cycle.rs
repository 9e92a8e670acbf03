//! Orquestrador do ciclo de varredura.
//!
//! Para cada AP configurado:
//!
//! ```text
//! mark_ap_changed → connect → enable_capture → transmit(visita) → dwell
//!   → disable_capture → append_current → [último AP: aggregate + relay] → disconnect
//! ```
//!
//! Falhas numa visita (conexão, transporte) são logadas e o ciclo segue: o AP
//! simplesmente não contribui para o registro agregado.

use std::sync::Arc;
use std::time::Duration;

use csi_core::aggregator::ScanAggregator;
use csi_core::capture::CaptureBuffer;
use csi_core::config::{AppConfig, NetworkConfig};
use csi_core::error::CsiError;
use csi_core::link::{Link, wait_for_link};
use csi_core::pacing::Clock;
use csi_core::protocol::PayloadEncoder;
use csi_core::transmitter::{Connector, Transmitter, open_with_retry};
use tracing::{debug, error, info, info_span, warn};

use crate::radio::Radio;

/// Resultado de um ciclo de varredura.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Número do ciclo (a partir de 1)
    pub cycle: u32,
    pub visited: usize,
    /// Visitas que contribuíram com leitura
    pub captured: usize,
    /// Registro agregado do ciclo
    pub record: Vec<i32>,
    /// Datagramas enviados (visitas + relay)
    pub datagrams_sent: u32,
    /// Registro agregado retransmitido
    pub relayed: bool,
    pub failures: u32,
}

pub struct ScanOrchestrator<L, R, C, K>
where
    L: Link,
    R: Radio,
    C: Clock,
    K: Connector,
{
    config: AppConfig,
    buffer: Arc<CaptureBuffer>,
    aggregator: ScanAggregator,
    transmitter: Transmitter,
    visit_payload: Vec<u8>,
    aggregate_encoder: Option<Box<dyn PayloadEncoder>>,
    link: L,
    radio: R,
    clock: C,
    connector: K,
    cycles_done: u32,
}

impl<L, R, C, K> ScanOrchestrator<L, R, C, K>
where
    L: Link,
    R: Radio,
    C: Clock,
    K: Connector,
{
    pub fn new(
        config: &AppConfig,
        buffer: Arc<CaptureBuffer>,
        link: L,
        radio: R,
        clock: C,
        connector: K,
    ) -> Result<Self, CsiError> {
        let tx = &config.transmitter;
        let visit_encoder = tx.visit_payload.build_encoder();
        let visit_payload = visit_encoder.encode(&[])?;
        let aggregate_encoder = tx
            .relay_aggregate
            .then(|| tx.aggregate_payload.build_encoder());

        info!(
            visit = visit_encoder.name(),
            aggregate = aggregate_encoder.as_ref().map_or("desligado", |e| e.name()),
            encoding = %config.capture.encoding,
            "Orquestrador pronto"
        );

        Ok(Self {
            aggregator: ScanAggregator::new(config.capture.encoding, config.scan.networks.len()),
            transmitter: Transmitter::from_config(tx),
            config: config.clone(),
            buffer,
            visit_payload,
            aggregate_encoder,
            link,
            radio,
            clock,
            connector,
            cycles_done: 0,
        })
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn buffer(&self) -> &Arc<CaptureBuffer> {
        &self.buffer
    }

    /// Executa `cycles` ciclos completos.
    pub fn run(&mut self, cycles: u32) -> Vec<CycleReport> {
        (0..cycles).map(|_| self.run_cycle()).collect()
    }

    /// Uma passada completa pelos APs configurados.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycles_done += 1;
        let mut report = CycleReport {
            cycle: self.cycles_done,
            ..CycleReport::default()
        };
        let _cycle = info_span!("cycle", n = self.cycles_done).entered();

        self.buffer.begin_cycle();
        let networks = self.config.scan.networks.clone();
        let last = networks.len().saturating_sub(1);
        let mut aggregated = false;

        for (i, network) in networks.iter().enumerate() {
            let _visit = info_span!("visit", ap = %network.ssid).entered();
            report.visited += 1;

            self.buffer.mark_ap_changed(&network.ssid);
            if let Err(e) = self.link.connect(network) {
                error!("{e}");
                report.failures += 1;
                continue;
            }

            self.visit(network, &mut report);

            if i == last {
                self.finish_cycle(Some(network), &mut report);
                aggregated = true;
            }
            self.link.disconnect();
        }

        // Último AP sem conexão: agrega mesmo assim, sem relay
        if !aggregated {
            self.finish_cycle(None, &mut report);
        }
        self.buffer.reset_readiness();

        info!(
            captured = report.captured,
            visited = report.visited,
            values = report.record.len(),
            sent = report.datagrams_sent,
            "Ciclo {} concluído ---------------------------------------->",
            report.cycle
        );
        report
    }

    fn visit(&mut self, network: &NetworkConfig, report: &mut CycleReport) {
        self.radio.enable_capture(Arc::clone(&self.buffer));

        let payload = self.visit_payload.clone();
        let count = self.config.transmitter.packets_per_visit;
        match self.transmit(network, &payload, count) {
            Ok(sent) => report.datagrams_sent += sent,
            Err(e) => {
                warn!("Falha ao transmitir na visita: {e}");
                report.failures += 1;
            }
        }

        self.clock
            .sleep(Duration::from_millis(self.config.capture.dwell_ms));
        self.radio.disable_capture();

        if self.aggregator.append_current(self.buffer.take_current()) {
            report.captured += 1;
        } else {
            warn!("Nenhuma leitura CSI capturada nesta visita");
        }
    }

    /// Fecha o ciclo: agrega e, com link disponível, retransmite o registro.
    fn finish_cycle(&mut self, network: Option<&NetworkConfig>, report: &mut CycleReport) {
        self.aggregator.mark_cycle_complete();
        debug!(aps = ?self.aggregator.collected_aps(), "Fechando ciclo");
        let record = self.aggregator.aggregate();

        let relay = match (network, &self.aggregate_encoder) {
            (_, None) => None,
            (_, Some(_)) if record.is_empty() => {
                debug!("Registro vazio, nada a retransmitir");
                None
            }
            (None, Some(_)) => {
                warn!("Sem link no fim do ciclo, registro não retransmitido");
                None
            }
            (Some(network), Some(encoder)) => match encoder.encode(&record) {
                Ok(bytes) => Some((network, bytes)),
                Err(e) => {
                    error!("Erro ao codificar registro: {e}");
                    report.failures += 1;
                    None
                }
            },
        };

        // Registro agregado sai uma única vez por ciclo
        if let Some((network, bytes)) = relay {
            match self.transmit(network, &bytes, 1) {
                Ok(sent) => {
                    info!("→ Registro agregado ({} bytes) retransmitido", bytes.len());
                    report.datagrams_sent += sent;
                    report.relayed = true;
                }
                Err(e) => {
                    warn!("Falha ao retransmitir registro: {e}");
                    report.failures += 1;
                }
            }
        }

        report.record = record;
    }

    /// Envia `count` cópias de `payload`, reconectando se o link cair no meio
    /// do lote.
    fn transmit(
        &mut self,
        network: &NetworkConfig,
        payload: &[u8],
        count: u32,
    ) -> Result<u32, CsiError> {
        let tx = &self.config.transmitter;
        let endpoint = tx.endpoint();
        let poll = Duration::from_millis(self.config.scan.link_poll_ms);
        let max_polls = self.config.scan.link_wait_polls;
        let open_attempts = tx.open_attempts;
        let open_wait = tx.open_retry_wait();
        let max_reconnects = self.config.scan.reconnect_attempts;

        let mut remaining = count;
        let mut total = 0;
        let mut reconnects = 0;

        loop {
            if !wait_for_link(&self.link, &self.clock, poll, max_polls) {
                return Err(CsiError::LinkDown { sent: total });
            }

            let mut transport =
                open_with_retry(&mut self.connector, &endpoint, open_attempts, open_wait, &self.clock)?;
            debug!("Enviando frames para {endpoint}");

            match self.transmitter.send_batch(
                &mut transport,
                &self.link,
                &self.clock,
                payload,
                remaining,
            ) {
                Ok(batch) => {
                    total += batch.sent;
                    return Ok(total);
                }
                Err(CsiError::LinkDown { sent }) if reconnects < max_reconnects => {
                    total += sent;
                    remaining -= sent;
                    reconnects += 1;
                    warn!(reconnects, remaining, "Link caiu no meio do lote, reconectando");
                    self.link.connect(network)?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use csi_core::config::{CaptureConfig, ScanConfig, TransmitterConfig};
    use csi_core::link::LinkStatus;
    use csi_core::pacing::ManualClock;
    use csi_core::protocol::decode_raw_f32;
    use csi_core::transmitter::Transport;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;

    const LEN: usize = 8;

    fn ramp(start: i8) -> Vec<i8> {
        (0..LEN as i8).map(|i| start + i).collect()
    }

    // ── Colaboradores falsos ──

    #[derive(Default)]
    struct MockLink {
        up: Cell<bool>,
        /// Consultas até o link cair (uma vez)
        checks_until_drop: Cell<Option<u32>>,
        unreachable: Vec<String>,
        connects: u32,
        disconnects: u32,
    }

    impl LinkStatus for MockLink {
        fn is_link_up(&self) -> bool {
            if !self.up.get() {
                return false;
            }
            match self.checks_until_drop.get() {
                Some(0) => {
                    self.up.set(false);
                    self.checks_until_drop.set(None);
                    false
                }
                Some(n) => {
                    self.checks_until_drop.set(Some(n - 1));
                    true
                }
                None => true,
            }
        }
    }

    impl Link for MockLink {
        fn connect(&mut self, network: &NetworkConfig) -> Result<(), CsiError> {
            self.connects += 1;
            if self.unreachable.contains(&network.ssid) {
                return Err(CsiError::ConnectFailed {
                    network: network.ssid.clone(),
                    attempts: 1,
                });
            }
            self.up.set(true);
            Ok(())
        }

        fn disconnect(&mut self) {
            self.disconnects += 1;
            self.up.set(false);
        }
    }

    /// Entrega os vetores roteirizados do AP atual, em ordem, ao habilitar.
    #[derive(Default)]
    struct ScriptedRadio {
        vectors: HashMap<String, Vec<Vec<i8>>>,
        enabled: bool,
    }

    impl ScriptedRadio {
        fn with(mut self, ap: &str, vectors: Vec<Vec<i8>>) -> Self {
            self.vectors.insert(ap.into(), vectors);
            self
        }
    }

    impl Radio for ScriptedRadio {
        fn enable_capture(&mut self, buffer: Arc<CaptureBuffer>) {
            self.enabled = true;
            if let Some(vectors) = self.vectors.get(&buffer.current_ap()) {
                for v in vectors {
                    buffer.submit(v, -45, v.len() as u32);
                }
            }
        }

        fn disable_capture(&mut self) {
            self.enabled = false;
        }
    }

    type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

    struct RecordingTransport {
        sent: Sent,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(payload.len())
        }

        fn endpoint(&self) -> &str {
            "mock:2223"
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        sent: Sent,
        opened: u32,
    }

    impl Connector for RecordingConnector {
        type Transport = RecordingTransport;

        fn open(&mut self, _endpoint: &str) -> Result<RecordingTransport, CsiError> {
            self.opened += 1;
            Ok(RecordingTransport {
                sent: Arc::clone(&self.sent),
            })
        }
    }

    fn test_config(aps: &[&str]) -> AppConfig {
        AppConfig {
            capture: CaptureConfig {
                sample_len: LEN,
                buffer_capacity: LEN * 16,
                ..CaptureConfig::default()
            },
            scan: ScanConfig {
                networks: aps.iter().map(|ap| NetworkConfig::new(*ap, "12345678")).collect(),
                link_wait_polls: 3,
                ..ScanConfig::default()
            },
            transmitter: TransmitterConfig::default(),
        }
    }

    fn orchestrator(
        config: &AppConfig,
        link: MockLink,
        radio: ScriptedRadio,
    ) -> (ScanOrchestrator<MockLink, ScriptedRadio, ManualClock, RecordingConnector>, Sent) {
        let connector = RecordingConnector::default();
        let sent = Arc::clone(&connector.sent);
        let buffer = Arc::new(CaptureBuffer::from_config(&config.capture));
        let orch = ScanOrchestrator::new(config, buffer, link, radio, ManualClock::new(), connector)
            .unwrap();
        (orch, sent)
    }

    fn abc_radio() -> ScriptedRadio {
        ScriptedRadio::default()
            .with("A", vec![ramp(1), ramp(50)])
            .with("B", vec![ramp(4)])
            .with("C", vec![ramp(7), ramp(90), ramp(100)])
    }

    #[test]
    fn cycle_aggregates_in_visit_order_and_relays() {
        let config = test_config(&["A", "B", "C"]);
        let (mut orch, sent) = orchestrator(&config, MockLink::default(), abc_radio());

        let report = orch.run_cycle();

        let expected: Vec<i32> = [ramp(1), ramp(4), ramp(7)]
            .concat()
            .into_iter()
            .map(i32::from)
            .collect();
        assert_eq!(report.record, expected);
        assert_eq!(report.captured, 3);
        assert!(report.relayed);
        assert_eq!(report.failures, 0);

        // 3 tokens de visita + 1 registro agregado
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(sent[..3].iter().all(|p| p == b"1\n"));
        let relayed: Vec<i32> = decode_raw_f32(&sent[3])
            .unwrap()
            .into_iter()
            .map(|v| v as i32)
            .collect();
        assert_eq!(relayed, expected);

        assert_eq!(orch.link.connects, 3);
        assert_eq!(orch.link.disconnects, 3);
        assert!(!orch.radio().enabled);
        assert!(!orch.buffer().is_ready());
    }

    #[test]
    fn ap_without_capture_is_omitted() {
        let config = test_config(&["A", "B", "C"]);
        let radio = ScriptedRadio::default()
            .with("A", vec![ramp(1)])
            .with("C", vec![ramp(7)]);
        let (mut orch, _sent) = orchestrator(&config, MockLink::default(), radio);

        let report = orch.run_cycle();

        assert_eq!(report.captured, 2);
        assert_eq!(report.record.len(), 2 * LEN);
        assert_eq!(report.record[LEN], 7);
    }

    #[test]
    fn unreachable_ap_is_skipped() {
        let config = test_config(&["A", "B", "C"]);
        let link = MockLink {
            unreachable: vec!["B".into()],
            ..MockLink::default()
        };
        let (mut orch, sent) = orchestrator(&config, link, abc_radio());

        let report = orch.run_cycle();

        assert_eq!(report.failures, 1);
        assert_eq!(report.captured, 2);
        assert_eq!(report.record[0], 1);
        assert_eq!(report.record[LEN], 7);
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn unreachable_last_ap_still_aggregates_without_relay() {
        let config = test_config(&["A", "B", "C"]);
        let link = MockLink {
            unreachable: vec!["C".into()],
            ..MockLink::default()
        };
        let (mut orch, sent) = orchestrator(&config, link, abc_radio());

        let report = orch.run_cycle();

        assert_eq!(report.record.len(), 2 * LEN);
        assert!(!report.relayed);
        // Só os tokens de A e B
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn link_loss_mid_batch_reconnects_and_finishes() {
        let mut config = test_config(&["A"]);
        config.transmitter.packets_per_visit = 3;
        config.transmitter.relay_aggregate = false;
        let link = MockLink {
            checks_until_drop: Cell::new(Some(2)),
            ..MockLink::default()
        };
        let (mut orch, sent) = orchestrator(&config, link, abc_radio());

        let report = orch.run_cycle();

        assert_eq!(report.datagrams_sent, 3);
        assert_eq!(report.failures, 0);
        assert_eq!(sent.lock().unwrap().len(), 3);
        // Conexão inicial + uma reconexão
        assert_eq!(orch.link.connects, 2);
    }

    #[test]
    fn aggregate_is_relayed_once_regardless_of_visit_batch() {
        let mut config = test_config(&["A", "B", "C"]);
        config.transmitter.packets_per_visit = 3;
        let (mut orch, sent) = orchestrator(&config, MockLink::default(), abc_radio());

        let report = orch.run_cycle();

        assert!(report.relayed);
        assert_eq!(report.datagrams_sent, 3 * 3 + 1);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.iter().filter(|p| p.as_slice() == b"1\n").count(), 9);
        assert_eq!(decode_raw_f32(sent.last().unwrap()).unwrap().len(), 3 * LEN);
    }

    #[test]
    fn relay_switched_off_sends_only_visit_tokens() {
        let mut config = test_config(&["A", "B", "C"]);
        config.transmitter.relay_aggregate = false;
        let (mut orch, sent) = orchestrator(&config, MockLink::default(), abc_radio());

        let report = orch.run_cycle();

        assert!(!report.relayed);
        assert_eq!(report.record.len(), 3 * LEN);
        assert!(sent.lock().unwrap().iter().all(|p| p == b"1\n"));
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn consecutive_cycles_start_clean() {
        let config = test_config(&["A", "B", "C"]);
        let (mut orch, _sent) = orchestrator(&config, MockLink::default(), abc_radio());

        let reports = orch.run(2);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].cycle, 1);
        assert_eq!(reports[1].cycle, 2);
        assert_eq!(reports[0].record, reports[1].record);
        assert_eq!(orch.buffer().usage().0, 3 * LEN);
    }

    #[test]
    fn dwell_is_spent_on_the_clock() {
        let config = test_config(&["A"]);
        let (mut orch, _sent) = orchestrator(&config, MockLink::default(), abc_radio());

        orch.run_cycle();

        let dwell = Duration::from_millis(config.capture.dwell_ms);
        assert!(orch.clock.sleeps().contains(&dwell));
    }
}
