//! Agregação por ciclo de varredura.
//!
//! Cada visita a um AP contribui com no máximo uma leitura. As amostras já
//! são convertidas para a sequência numérica no momento do `append`, então a
//! agregação é só concatenação na ordem de captura.

use tracing::{debug, info, warn};

use crate::log_format::{format_aggregate_line, format_reading_line};
use crate::types::{EncodingMode, Reading};

#[derive(Debug, Clone)]
struct CycleEntry {
    ap: String,
    values: Vec<i32>,
}

/// Dono exclusivo do ciclo de varredura (só a task da aplicação o usa).
#[derive(Debug)]
pub struct ScanAggregator {
    mode: EncodingMode,
    expected_aps: usize,
    entries: Vec<CycleEntry>,
    all_collected: bool,
}

impl ScanAggregator {
    /// `expected_aps` limita quantas leituras cabem num ciclo.
    pub fn new(mode: EncodingMode, expected_aps: usize) -> Self {
        Self {
            mode,
            expected_aps,
            entries: Vec::with_capacity(expected_aps),
            all_collected: false,
        }
    }

    /// Anexa a leitura capturada na visita atual.
    ///
    /// `None` (o AP nunca ligou o flag de pronto) e leituras sem amostras são
    /// descartadas, nunca preenchidas com zeros. Retorna se algo foi anexado.
    pub fn append_current(&mut self, reading: Option<Reading>) -> bool {
        let Some(reading) = reading else {
            debug!("Nenhuma leitura capturada nesta visita");
            return false;
        };

        if reading.samples.is_empty() {
            debug!(ap = %reading.ap, "Leitura vazia descartada");
            return false;
        }

        if self.entries.len() >= self.expected_aps {
            warn!(
                ap = %reading.ap,
                limit = self.expected_aps,
                "Ciclo já tem uma leitura por AP configurado, descartando"
            );
            return false;
        }

        info!(target: "csi", ap = %reading.ap, "{}", format_reading_line(&reading, self.mode));

        self.entries.push(CycleEntry {
            values: reading.values(self.mode),
            ap: reading.ap,
        });
        true
    }

    /// Sinaliza que todos os APs do ciclo foram visitados. Não limpa nada.
    pub fn mark_cycle_complete(&mut self) {
        self.all_collected = true;
    }

    /// Concatena as leituras do ciclo na ordem de captura.
    ///
    /// Com o ciclo marcado como completo, o ciclo é esvaziado e a marca é
    /// baixada: deve ser chamado exatamente uma vez por ciclo completo.
    pub fn aggregate(&mut self) -> Vec<i32> {
        let record: Vec<i32> = self
            .entries
            .iter()
            .flat_map(|e| e.values.iter().copied())
            .collect();

        info!(target: "csi", "{}", format_aggregate_line(&record));

        if self.all_collected {
            let missing = self.expected_aps.saturating_sub(self.entries.len());
            if missing > 0 {
                // TODO: confirmar com o time de treino se AP ausente deve virar placeholder
                warn!(
                    missing,
                    expected = self.expected_aps,
                    "Ciclo fechado sem leitura de todos os APs; ausentes omitidos"
                );
            }
            debug!(readings = self.entries.len(), values = record.len(), "Ciclo agregado e limpo");
            self.entries.clear();
            self.all_collected = false;
        }

        record
    }

    /// APs com leitura no ciclo atual, na ordem de captura.
    pub fn collected_aps(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.ap.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
