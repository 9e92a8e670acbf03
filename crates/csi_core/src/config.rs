//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável; toda seção usa
//! `#[serde(default)]`, então arquivos parciais funcionam.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::protocol::PayloadConfig;
use crate::types::{DEFAULT_SAMPLE_LEN, EncodingMode};

/// Erros ao salvar a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Erro ao serializar TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Captura CSI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Amostras por leitura
    pub sample_len: usize,
    /// Amostras que cabem no armazenamento por ciclo
    pub buffer_capacity: usize,
    /// "raw", "amplitude" ou "phase"
    pub encoding: EncodingMode,
    /// Permanência em cada AP após o envio (ms)
    pub dwell_ms: u64,
    /// Intervalo entre callbacks do driver simulado (ms)
    pub callback_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_len: DEFAULT_SAMPLE_LEN,
            buffer_capacity: DEFAULT_SAMPLE_LEN * 32,
            encoding: EncodingMode::Raw,
            dwell_ms: 100,
            callback_interval_ms: 10,
        }
    }
}

/// Rede (AP) visitada a cada ciclo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
}

impl NetworkConfig {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// Varredura de APs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// APs na ordem de visita
    pub networks: Vec<NetworkConfig>,
    /// Ciclos completos a executar
    pub cycles: u32,
    /// Tentativas de conexão por AP
    pub connect_retries: u32,
    /// Reconexões permitidas após queda de link no meio de um lote
    pub reconnect_attempts: u32,
    /// Intervalo de polling do link (ms)
    pub link_poll_ms: u64,
    /// Quantos polls esperar pelo link antes de desistir
    pub link_wait_polls: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            networks: vec![
                NetworkConfig::new("AP1", "12345678"),
                NetworkConfig::new("AP2", "12345678"),
                NetworkConfig::new("AP3", "12345678"),
            ],
            cycles: 5,
            connect_retries: 5,
            reconnect_attempts: 3,
            link_poll_ms: 1000,
            link_wait_polls: 30,
        }
    }
}

/// Transmissor UDP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitterConfig {
    /// IP de destino
    pub dest_ip: String,
    /// Porta UDP
    pub port: u16,
    /// IP local para bind (vazio = auto)
    pub bind_ip: String,
    /// Taxa alvo (pacotes/s); ausente = espera padrão
    pub packet_rate_hz: Option<f64>,
    /// Pacotes enviados com sucesso por visita
    pub packets_per_visit: u32,
    /// Escritas parciais consecutivas toleradas
    pub max_short_write_retries: u32,
    /// Espera antes de reenviar após escrita parcial (ms)
    pub tick_ms: u64,
    /// Tentativas de abrir o socket
    pub open_attempts: u32,
    /// Espera fixa entre tentativas de abrir o socket (ms)
    pub open_retry_ms: u64,
    /// Payload de cada visita (gera tráfego para o AP)
    pub visit_payload: PayloadConfig,
    /// Retransmite o registro agregado no fim de cada ciclo
    pub relay_aggregate: bool,
    /// Payload do registro agregado
    pub aggregate_payload: PayloadConfig,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            dest_ip: "192.168.4.1".into(),
            port: 2223,
            bind_ip: String::new(),
            packet_rate_hz: None,
            packets_per_visit: 1,
            max_short_write_retries: 5,
            tick_ms: 1,
            open_attempts: 5,
            open_retry_ms: 1000,
            visit_payload: PayloadConfig::default(),
            relay_aggregate: true,
            aggregate_payload: PayloadConfig::raw_f32(),
        }
    }
}

impl TransmitterConfig {
    /// `ip:porta` de destino.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.dest_ip, self.port)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn open_retry_wait(&self) -> Duration {
        Duration::from_millis(self.open_retry_ms)
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub scan: ScanConfig,
    pub transmitter: TransmitterConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let capture = &self.capture;
        let tx = &self.transmitter;

        if capture.sample_len == 0 {
            errors.push("sample_len não pode ser 0".into());
        }
        if capture.encoding != EncodingMode::Raw && capture.sample_len % 2 != 0 {
            errors.push(format!(
                "Modo {} exige sample_len par (atual: {})",
                capture.encoding, capture.sample_len
            ));
        }
        if capture.buffer_capacity < capture.sample_len {
            errors.push(format!(
                "buffer_capacity ({}) menor que sample_len ({})",
                capture.buffer_capacity, capture.sample_len
            ));
        }
        if self.scan.networks.is_empty() {
            errors.push("Nenhuma rede configurada em [scan]".into());
        }
        if self.scan.connect_retries == 0 {
            errors.push("connect_retries deve ser >= 1".into());
        }
        if tx.port == 0 {
            errors.push("Porta do transmissor não pode ser 0".into());
        }
        if let Some(rate) = tx.packet_rate_hz {
            if !(rate > 0.0 && rate <= 1000.0) {
                errors.push(format!("packet_rate_hz inválido: {rate} (0–1000]"));
            }
        }
        if tx.packets_per_visit == 0 {
            errors.push("packets_per_visit deve ser >= 1".into());
        }
        if tx.open_attempts == 0 {
            errors.push("open_attempts deve ser >= 1".into());
        }

        errors
    }
}
