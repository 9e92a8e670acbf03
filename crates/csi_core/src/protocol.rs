//! Codificadores de payload UDP.
//!
//! O formato no fio é escolha de configuração, não de compilação:
//!
//! - [`TokenEncoder`] – token ASCII curto (`"1\n"`), só gera tráfego para o AP
//! - [`RawF32Encoder`] – amostras como `f32` little-endian, tamanho opcionalmente fixo
//! - [`FramedEncoder`] – frame binário com header:
//!
//! ```text
//! ┌──────────┬─────────┬──────────────────────┐
//! │ Magic(1) │ Ver.(1) │ bincode(CsiFrame)    │
//! └──────────┴─────────┴──────────────────────┘
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Magic byte que identifica frames CSI.
pub const MAGIC_BYTE: u8 = 0x43; // 'C'

/// Versão atual do protocolo.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tamanho do header (magic + version).
const HEADER_SIZE: usize = 2;

/// Tamanho máximo de pacote UDP seguro (sem fragmentação).
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Token padrão enviado a cada visita.
pub const DEFAULT_TOKEN: &str = "1\n";

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Pacote muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Payload de {0} bytes excede o limite UDP de {MAX_UDP_PAYLOAD}")]
    TooLarge(usize),

    #[error("Payload f32 com tamanho inválido: {0} bytes")]
    Misaligned(usize),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

fn check_size(bytes: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
    if bytes.len() > MAX_UDP_PAYLOAD {
        return Err(ProtocolError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

// ──────────────────────────────────────────────
// Encoder plugável
// ──────────────────────────────────────────────

/// Converte um registro numérico em bytes de um datagrama.
pub trait PayloadEncoder: Send {
    fn encode(&self, record: &[i32]) -> Result<Vec<u8>, ProtocolError>;

    /// Nome curto para logs.
    fn name(&self) -> &'static str;
}

/// Token fixo; ignora o registro.
#[derive(Debug, Clone)]
pub struct TokenEncoder {
    token: Vec<u8>,
}

impl TokenEncoder {
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        Self { token: token.into() }
    }
}

impl Default for TokenEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN)
    }
}

impl PayloadEncoder for TokenEncoder {
    fn encode(&self, _record: &[i32]) -> Result<Vec<u8>, ProtocolError> {
        check_size(self.token.clone())
    }

    fn name(&self) -> &'static str {
        "token"
    }
}

/// Amostras como `f32` little-endian.
///
/// Com `frame_samples` definido o buffer tem tamanho fixo: completa com zeros
/// ou trunca o excesso.
#[derive(Debug, Clone, Default)]
pub struct RawF32Encoder {
    frame_samples: Option<usize>,
}

impl RawF32Encoder {
    pub fn new(frame_samples: Option<usize>) -> Self {
        Self { frame_samples }
    }
}

impl PayloadEncoder for RawF32Encoder {
    fn encode(&self, record: &[i32]) -> Result<Vec<u8>, ProtocolError> {
        let count = self.frame_samples.unwrap_or(record.len());
        let mut out = Vec::with_capacity(count * 4);
        for i in 0..count {
            let v = record.get(i).copied().unwrap_or(0) as f32;
            out.extend_from_slice(&v.to_le_bytes());
        }
        check_size(out)
    }

    fn name(&self) -> &'static str {
        "raw_f32"
    }
}

/// Decodifica um payload [`RawF32Encoder`].
pub fn decode_raw_f32(data: &[u8]) -> Result<Vec<f32>, ProtocolError> {
    if data.len() % 4 != 0 {
        return Err(ProtocolError::Misaligned(data.len()));
    }
    Ok(data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

// ──────────────────────────────────────────────
// Frame binário
// ──────────────────────────────────────────────

/// Conteúdo de um frame binário.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CsiFrame {
    /// Contador por encoder; permite ao receptor detectar perda
    pub sequence: u32,
    pub values: Vec<i32>,
}

/// Codifica um [`CsiFrame`] para transmissão UDP.
///
/// Retorna bytes no formato: `[MAGIC][VERSION][bincode_payload...]`
pub fn encode_frame(frame: &CsiFrame) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(frame).map_err(|e| ProtocolError::Serialize(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.push(MAGIC_BYTE);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);

    check_size(out)
}

/// Decodifica bytes recebidos via UDP em [`CsiFrame`].
///
/// Valida magic byte e versão antes de deserializar.
pub fn decode_frame(data: &[u8]) -> Result<CsiFrame, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let magic = data[0];
    if magic != MAGIC_BYTE {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    let version = data[1];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    bincode::deserialize(&data[HEADER_SIZE..]).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

/// Frame binário com número de sequência.
#[derive(Debug, Default)]
pub struct FramedEncoder {
    next_sequence: AtomicU32,
}

impl PayloadEncoder for FramedEncoder {
    fn encode(&self, record: &[i32]) -> Result<Vec<u8>, ProtocolError> {
        let frame = CsiFrame {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            values: record.to_vec(),
        };
        encode_frame(&frame)
    }

    fn name(&self) -> &'static str {
        "framed"
    }
}

// ──────────────────────────────────────────────
// Seleção via configuração
// ──────────────────────────────────────────────

/// Formato do payload no fio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    #[default]
    Token,
    RawF32,
    Framed,
}

/// Seção de configuração de um payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub format: PayloadFormat,
    /// Usado só pelo formato `token`
    pub token: String,
    /// Tamanho fixo do frame `raw_f32` (ausente = registro inteiro)
    pub frame_samples: Option<usize>,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            format: PayloadFormat::Token,
            token: DEFAULT_TOKEN.into(),
            frame_samples: None,
        }
    }
}

impl PayloadConfig {
    /// Payload `raw_f32` sem tamanho fixo.
    pub fn raw_f32() -> Self {
        Self {
            format: PayloadFormat::RawF32,
            ..Self::default()
        }
    }

    pub fn build_encoder(&self) -> Box<dyn PayloadEncoder> {
        match self.format {
            PayloadFormat::Token => Box::new(TokenEncoder::new(self.token.as_bytes())),
            PayloadFormat::RawF32 => Box::new(RawF32Encoder::new(self.frame_samples)),
            PayloadFormat::Framed => Box::new(FramedEncoder::default()),
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
