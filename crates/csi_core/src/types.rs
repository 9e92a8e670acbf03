//! Tipos de dados da captura CSI.
//!
//! Uma [`Reading`] é um evento de captura entregue pelo driver do rádio.
//! O [`EncodingMode`] decide como as amostras brutas viram a sequência
//! numérica que é agregada e transmitida.

use serde::{Deserialize, Serialize};

/// Comprimento do vetor de amostras na configuração observada.
pub const DEFAULT_SAMPLE_LEN: usize = 128;

// ──────────────────────────────────────────────
// Reading
// ──────────────────────────────────────────────

/// Um evento de captura CSI. Imutável depois de criado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Identificador do AP de origem (SSID)
    pub ap: String,
    /// Intensidade do sinal (dBm)
    pub rssi: i32,
    /// Tamanho do payload informado pelo driver (bytes)
    pub len: u32,
    /// Amostras brutas (I/Q intercalados, i8)
    pub samples: Vec<i8>,
    /// Ordem de captura atribuída pelo buffer
    pub sequence: u64,
}

impl Reading {
    /// Converte as amostras brutas segundo o modo de codificação.
    pub fn values(&self, mode: EncodingMode) -> Vec<i32> {
        mode.apply(&self.samples)
    }
}

// ──────────────────────────────────────────────
// Modo de codificação
// ──────────────────────────────────────────────

/// Como as amostras brutas viram a sequência numérica.
///
/// Escolhido uma vez na configuração; os três modos convivem no mesmo binário.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Amostras repassadas sem alteração
    #[default]
    Raw,
    /// Norma euclidiana de cada par consecutivo (truncada)
    Amplitude,
    /// `atan2(par[0], par[1])` de cada par consecutivo (truncado)
    Phase,
}

impl EncodingMode {
    pub fn apply(self, samples: &[i8]) -> Vec<i32> {
        match self {
            EncodingMode::Raw => samples.iter().map(|&s| i32::from(s)).collect(),
            // Par incompleto no final é ignorado
            EncodingMode::Amplitude => samples
                .chunks_exact(2)
                .map(|pair| {
                    let (a, b) = (f64::from(pair[0]), f64::from(pair[1]));
                    (a * a + b * b).sqrt() as i32
                })
                .collect(),
            EncodingMode::Phase => samples
                .chunks_exact(2)
                .map(|pair| f64::from(pair[0]).atan2(f64::from(pair[1])) as i32)
                .collect(),
        }
    }

    /// Quantos valores um vetor de `sample_len` amostras produz neste modo.
    pub fn output_len(self, sample_len: usize) -> usize {
        match self {
            EncodingMode::Raw => sample_len,
            EncodingMode::Amplitude | EncodingMode::Phase => sample_len / 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncodingMode::Raw => "raw",
            EncodingMode::Amplitude => "amplitude",
            EncodingMode::Phase => "phase",
        }
    }
}

impl std::fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
