//! Formato das linhas CSI no console.
//!
//! ```text
//! AP,rssi,real_timestamp,len,CSI_DATA
//! -42,384,[12 -3 7 0 ...]
//! CSI_DATA,[12 -3 7 0 ... 5 -9]
//! ```
//!
//! Saída secundária (não é contrato para outros sistemas), mas é o que os
//! scripts de treino leem da serial, então o parser segue a mesma política
//! de tokens do firmware: tudo antes de `[` é ignorado, tokens separados por
//! espaço, `]` encerra a lista e tokens não numéricos são pulados.

use std::fmt::Write as _;

use tracing::warn;

use crate::error::CsiError;
use crate::types::{EncodingMode, Reading};

/// Cabeçalho CSV impresso na inicialização da captura.
pub const CSV_HEADER: &str = "AP,rssi,real_timestamp,len,CSI_DATA";

/// Prefixo da linha agregada.
pub const AGGREGATE_PREFIX: &str = "CSI_DATA";

fn push_list(out: &mut String, values: &[i32]) {
    out.push('[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{v}");
    }
    out.push(']');
}

/// `<rssi>,<len>,[<valores>]`
pub fn format_reading_line(reading: &Reading, mode: EncodingMode) -> String {
    let values = reading.values(mode);
    let mut line = format!("{},{},", reading.rssi, reading.len);
    push_list(&mut line, &values);
    line
}

/// `CSI_DATA,[<valores>]`
pub fn format_aggregate_line(values: &[i32]) -> String {
    let mut line = format!("{AGGREGATE_PREFIX},");
    push_list(&mut line, values);
    line
}

/// Resultado do parse de uma lista de amostras.
#[derive(Debug, Default)]
pub struct ParsedSamples {
    pub values: Vec<i32>,
    /// Tokens rejeitados (sempre [`CsiError::Parse`])
    pub errors: Vec<CsiError>,
}

/// Extrai a lista numérica entre colchetes de uma linha CSI.
///
/// Para quem consome o log serial (scripts de treino, ferramentas de
/// inspeção). Linha sem `[` não tem lista e resulta vazia. Cada token
/// rejeitado é logado e fica em [`ParsedSamples::errors`].
pub fn parse_sample_list(line: &str) -> ParsedSamples {
    let mut parsed = ParsedSamples::default();
    let Some((_, body)) = line.split_once('[') else {
        return parsed;
    };

    for (position, raw) in body.split_whitespace().enumerate() {
        let (token, closed) = match raw.split_once(']') {
            Some((head, _)) => (head, true),
            None => (raw, false),
        };

        if !token.is_empty() {
            match token.parse::<i32>() {
                Ok(v) => parsed.values.push(v),
                Err(_) => {
                    let err = CsiError::Parse {
                        token: token.to_owned(),
                        position,
                    };
                    warn!("{err}, token ignorado");
                    parsed.errors.push(err);
                }
            }
        }

        if closed {
            break;
        }
    }

    parsed
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
