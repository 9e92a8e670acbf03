//! Buffer de captura compartilhado entre o callback do driver e a task
//! da aplicação.
//!
//! Guarda a leitura mais recente do AP atual e o flag de "pronto". Todas as
//! operações (inclusive as leituras do flag e do payload) rodam sob o mesmo
//! mutex, então o snapshot por ciclo é sempre consistente.
//!
//! Política: a primeira leitura por janela de permanência vence. O driver
//! pode chamar o callback dezenas de vezes enquanto estamos associados ao
//! mesmo AP; as demais chamadas são descartadas.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::config::CaptureConfig;
use crate::error::CsiError;
use crate::types::Reading;

/// Resultado de um [`CaptureBuffer::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Leitura armazenada; o flag de pronto foi ligado.
    Accepted,
    /// Já existe leitura para o AP atual neste ciclo.
    AlreadyCaptured,
    /// Vetor bruto menor que o comprimento configurado (captura parcial).
    Incomplete { got: usize, expected: usize },
    /// O armazenamento estouraria; evento descartado.
    Overflow,
}

#[derive(Debug, Default)]
struct CaptureState {
    current_ap: String,
    ready: bool,
    pending: Option<Reading>,
    /// Amostras aceitas desde o início do ciclo
    used: usize,
    next_sequence: u64,
}

/// Buffer de captura limitado, protegido por um único mutex.
#[derive(Debug)]
pub struct CaptureBuffer {
    state: Mutex<CaptureState>,
    sample_len: usize,
    capacity: usize,
}

impl CaptureBuffer {
    /// Cria um buffer para vetores de `sample_len` amostras, com espaço para
    /// `capacity` amostras por ciclo.
    pub fn new(sample_len: usize, capacity: usize) -> Self {
        Self {
            state: Mutex::new(CaptureState::default()),
            sample_len,
            capacity,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.sample_len, config.buffer_capacity)
    }

    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        // Estado é dado puro e toda seção crítica o deixa consistente
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entrada do callback do driver. Nunca falha: decisões são logadas.
    pub fn submit(&self, raw: &[i8], rssi: i32, len: u32) -> SubmitOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.ready {
            trace!(ap = %state.current_ap, "Leitura repetida descartada");
            return SubmitOutcome::AlreadyCaptured;
        }

        if raw.len() < self.sample_len {
            debug!(
                ap = %state.current_ap,
                got = raw.len(),
                expected = self.sample_len,
                "Captura parcial descartada"
            );
            return SubmitOutcome::Incomplete {
                got: raw.len(),
                expected: self.sample_len,
            };
        }

        let available = self.capacity.saturating_sub(state.used);
        if self.sample_len > available {
            let err = CsiError::CaptureOverflow {
                requested: self.sample_len,
                available,
                capacity: self.capacity,
            };
            warn!(ap = %state.current_ap, "{err}");
            return SubmitOutcome::Overflow;
        }

        let sequence = state.next_sequence;
        let reading = Reading {
            ap: state.current_ap.clone(),
            rssi,
            len,
            samples: raw[..self.sample_len].to_vec(),
            sequence,
        };
        state.next_sequence += 1;
        state.used += self.sample_len;
        state.pending = Some(reading);
        state.ready = true;

        debug!(ap = %state.current_ap, rssi, len, sequence, "Leitura CSI capturada");
        SubmitOutcome::Accepted
    }

    /// Atualiza o AP atual. O flag de pronto é limpo mesmo que o AP não mude:
    /// cada visita a um AP precisa de pelo menos um reset.
    pub fn mark_ap_changed(&self, new_ap: &str) {
        let mut state = self.lock();
        if state.current_ap != new_ap {
            debug!(from = %state.current_ap, to = %new_ap, "AP atual alterado");
            state.current_ap = new_ap.to_owned();
        }
        state.ready = false;
    }

    /// Limpa o flag de pronto sem mexer no AP atual.
    pub fn reset_readiness(&self) {
        self.lock().ready = false;
    }

    /// Retira a leitura pendente para entregar ao agregador.
    ///
    /// O flag de pronto continua ligado: o AP já foi capturado neste ciclo.
    pub fn take_current(&self) -> Option<Reading> {
        self.lock().pending.take()
    }

    /// Início de ciclo: descarta pendências e zera o uso do armazenamento.
    pub fn begin_cycle(&self) {
        let mut state = self.lock();
        state.pending = None;
        state.ready = false;
        state.used = 0;
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn current_ap(&self) -> String {
        self.lock().current_ap.clone()
    }

    /// `(usado, capacidade)` em amostras.
    pub fn usage(&self) -> (usize, usize) {
        (self.lock().used, self.capacity)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
