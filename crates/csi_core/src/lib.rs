//! # CSI Core
//!
//! Pipeline de captura → sincronização → agregação → transmissão com taxa
//! controlada para telemetria CSI (channel state information).
//!
//! ## Módulos
//! - [`types`] – Leitura CSI e modos de codificação (raw, amplitude, phase)
//! - [`capture`] – Buffer compartilhado com o callback do driver
//! - [`aggregator`] – Agregação por ciclo de varredura de APs
//! - [`log_format`] – Linhas CSI do console e parser da lista de amostras
//! - [`protocol`] – Codificadores de payload UDP (token, f32, frame bincode)
//! - [`pacing`] – Relógio monotônico e cálculo de espera entre envios
//! - [`link`] – Colaborador de link Wi-Fi
//! - [`transmitter`] – Transporte UDP e envio em lotes com ritmo
//! - [`config`] – Configuração unificada via TOML
//! - [`error`] – Taxonomia de erros do pipeline

pub mod types;
pub mod capture;
pub mod aggregator;
pub mod log_format;
pub mod protocol;
pub mod pacing;
pub mod link;
pub mod transmitter;
pub mod config;
pub mod error;

// Re-exports convenientes
pub use aggregator::ScanAggregator;
pub use capture::{CaptureBuffer, SubmitOutcome};
pub use config::{AppConfig, CaptureConfig, NetworkConfig, ScanConfig, TransmitterConfig};
pub use error::CsiError;
pub use protocol::{PROTOCOL_VERSION, PayloadConfig, PayloadEncoder, PayloadFormat};
pub use types::{EncodingMode, Reading};
