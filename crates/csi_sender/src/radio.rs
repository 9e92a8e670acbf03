//! Driver de rádio: habilita/desabilita a captura CSI.
//!
//! No host não há driver de firmware; [`SimulatedRadio`] faz o papel do
//! callback do driver com uma thread que entrega vetores CSI sintéticos em
//! intervalo fixo enquanto a captura estiver ligada.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use csi_core::capture::{CaptureBuffer, SubmitOutcome};
use tracing::{debug, info, trace, warn};

/// Controle da captura CSI do rádio.
pub trait Radio {
    /// Liga o callback do driver, que passa a escrever em `buffer`.
    fn enable_capture(&mut self, buffer: Arc<CaptureBuffer>);

    fn disable_capture(&mut self);
}

/// Payload informado pelo driver para cada amostra (LLTF + HT-LTF + STBC).
const DRIVER_LEN_FACTOR: u32 = 3;

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Rádio simulado: thread de callback com vetores determinísticos por AP.
pub struct SimulatedRadio {
    interval: Duration,
    frames: Arc<AtomicU64>,
    worker: Option<Worker>,
}

impl SimulatedRadio {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            frames: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// Callbacks entregues desde a criação.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Radio for SimulatedRadio {
    fn enable_capture(&mut self, buffer: Arc<CaptureBuffer>) {
        if self.worker.is_some() {
            debug!("Captura CSI já habilitada");
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let frames = Arc::clone(&self.frames);
        let interval = self.interval;

        let spawned = std::thread::Builder::new()
            .name("csi-callback".into())
            .spawn(move || callback_loop(&buffer, &flag, &frames, interval));

        match spawned {
            Ok(handle) => {
                info!("Captura CSI habilitada");
                self.worker = Some(Worker { running, handle });
            }
            Err(e) => warn!("Falha ao criar thread de callback CSI: {e}"),
        }
    }

    fn disable_capture(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.running.store(false, Ordering::Release);
            if worker.handle.join().is_err() {
                warn!("Thread de callback CSI terminou com pânico");
            }
            info!("Captura CSI desabilitada");
        }
    }
}

impl Drop for SimulatedRadio {
    fn drop(&mut self) {
        self.disable_capture();
    }
}

fn callback_loop(buffer: &CaptureBuffer, running: &AtomicBool, frames: &AtomicU64, interval: Duration) {
    let sample_len = buffer.sample_len();
    while running.load(Ordering::Acquire) {
        let frame = frames.fetch_add(1, Ordering::Relaxed);
        let seed = ap_seed(&buffer.current_ap());
        let raw = synth_samples(seed, frame, sample_len);
        let rssi = -40 - (seed % 40) as i32 - (frame % 3) as i32;
        let len = sample_len as u32 * DRIVER_LEN_FACTOR;

        match buffer.submit(&raw, rssi, len) {
            SubmitOutcome::Accepted => debug!(frame, rssi, "Callback CSI aceito"),
            outcome => trace!(frame, ?outcome, "Callback CSI ignorado"),
        }

        std::thread::sleep(interval);
    }
}

/// Semente estável por AP (FNV-1a).
fn ap_seed(ap: &str) -> u64 {
    ap.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Pares I/Q de uma senoide por subportadora, com fase dependente do frame.
fn synth_samples(seed: u64, frame: u64, len: usize) -> Vec<i8> {
    let amplitude = 20.0 + (seed % 80) as f64;
    let offset = (seed % 17) as f64;
    (0..len)
        .map(|i| {
            let angle = (i / 2) as f64 * 0.19 + frame as f64 * 0.05 + offset;
            let v = if i % 2 == 0 { angle.cos() } else { angle.sin() };
            (v * amplitude).round().clamp(-128.0, 127.0) as i8
        })
        .collect()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
