//! # CSI Sender
//!
//! Percorre os APs configurados, captura uma leitura CSI por visita, agrega o
//! ciclo e retransmite via UDP com taxa controlada.
//!
//! ## Uso
//! ```bash
//! csi_sender          # Executa `scan.cycles` ciclos
//! csi_sender --once   # Um único ciclo
//! ```

mod cycle;
mod host_link;
mod radio;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use csi_core::capture::CaptureBuffer;
use csi_core::config::AppConfig;
use csi_core::log_format::CSV_HEADER;
use csi_core::pacing::MonotonicClock;
use csi_core::transmitter::UdpConnector;
use cycle::ScanOrchestrator;
use host_link::HostLink;
use radio::SimulatedRadio;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config inválida: {e}");
        }
        return ExitCode::FAILURE;
    }

    let cycles = if std::env::args().any(|a| a == "--once") {
        1
    } else {
        config.scan.cycles
    };
    let tx = &config.transmitter;
    let endpoint = tx.endpoint();
    let ssids: Vec<&str> = config.scan.networks.iter().map(|n| n.ssid.as_str()).collect();

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   📡 CSI SENDER – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Destino:   {endpoint}");
    println!("  APs:       {}", ssids.join(" → "));
    println!("  Ciclos:    {cycles}");
    println!("  Modo:      {}", config.capture.encoding);
    match tx.packet_rate_hz {
        Some(rate) => println!("  Taxa:      {rate:.1} pacotes/s"),
        None => println!("  Taxa:      padrão"),
    }
    println!("  Protocolo: v{}", csi_core::PROTOCOL_VERSION);
    println!("══════════════════════════════════════════════");
    println!();

    info!(target: "csi", "{CSV_HEADER}");

    // ── Pipeline ──
    let buffer = Arc::new(CaptureBuffer::from_config(&config.capture));
    let radio = SimulatedRadio::new(Duration::from_millis(config.capture.callback_interval_ms));
    let link = HostLink::new(
        endpoint.clone(),
        tx.bind_ip.clone(),
        config.scan.connect_retries,
        Duration::from_millis(config.scan.link_poll_ms),
        MonotonicClock::new(),
    );
    let connector = UdpConnector {
        bind_ip: tx.bind_ip.clone(),
    };

    let mut orchestrator =
        match ScanOrchestrator::new(&config, buffer, link, radio, MonotonicClock::new(), connector) {
            Ok(o) => o,
            Err(e) => {
                error!("Falha ao iniciar orquestrador: {e}");
                return ExitCode::FAILURE;
            }
        };

    // ── Loop principal ──
    let reports = orchestrator.run(cycles);

    let captured: usize = reports.iter().map(|r| r.captured).sum();
    let visited: usize = reports.iter().map(|r| r.visited).sum();
    let sent: u32 = reports.iter().map(|r| r.datagrams_sent).sum();
    let failures: u32 = reports.iter().map(|r| r.failures).sum();
    let relayed = reports.iter().filter(|r| r.relayed).count();
    let (used, capacity) = orchestrator.buffer().usage();

    info!(
        cycles = reports.len(),
        captured,
        visited,
        sent,
        relayed,
        failures,
        frames = orchestrator.radio().frames_delivered(),
        "Resumo: buffer {used}/{capacity} amostras no último ciclo"
    );
    info!("COMPLETED");

    ExitCode::SUCCESS
}
