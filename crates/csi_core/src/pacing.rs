//! Relógio monotônico e cálculo de espera entre envios.
//!
//! O ritmo é em malha aberta: a espera compensa a latência medida do envio
//! anterior ("lag"), sem controlador de realimentação. Sobrecarga sustentada
//! vira deriva de taxa, não backpressure.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Espera padrão sem taxa configurada (~100 pacotes/s).
pub const DEFAULT_DELAY: Duration = Duration::from_millis(10);

/// Fonte de tempo monotônica.
///
/// `sleep` faz parte do relógio para que o ritmo seja determinístico com um
/// relógio manual nos testes.
pub trait Clock: Send + Sync {
    /// Milissegundos desde uma origem arbitrária.
    fn now_ms(&self) -> f64;

    fn sleep(&self, duration: Duration);
}

/// Relógio real baseado em [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Relógio controlado manualmente; `sleep` só avança o tempo.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Mutex<f64>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Avança o tempo sem registrar uma espera (simula trabalho).
    pub fn advance(&self, ms: f64) {
        let mut now = self.now_ms.lock().unwrap_or_else(|e| e.into_inner());
        *now += ms;
    }

    /// Esperas pedidas até agora, em ordem.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration.as_secs_f64() * 1000.0);
    }
}

/// Espera até o próximo envio.
///
/// Com taxa configurada: `max(0, 1000/taxa - elapsed_ms)`, arredondado para
/// baixo em milissegundos inteiros. Sem taxa: [`DEFAULT_DELAY`].
pub fn pace(target_rate_hz: Option<f64>, elapsed_ms: f64) -> Duration {
    match target_rate_hz {
        Some(rate) if rate > 0.0 => {
            let wait = (1000.0 / rate - elapsed_ms.max(0.0)).floor();
            if wait > 0.0 {
                Duration::from_millis(wait as u64)
            } else {
                Duration::ZERO
            }
        }
        _ => DEFAULT_DELAY,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
