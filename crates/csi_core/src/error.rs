//! Taxonomia de erros do pipeline CSI.
//!
//! Nenhum destes erros é fatal para o processo: o pipeline degrada
//! (descarta/pula) em vez de parar.

use crate::protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum CsiError {
    /// Buffer de captura cheio; o evento é descartado.
    #[error("Buffer de captura cheio: {requested} amostras pedidas, {available} livres (capacidade {capacity})")]
    CaptureOverflow {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    /// Token não numérico na lista de amostras; o token é pulado.
    #[error("Token não numérico na posição {position}: {token:?}")]
    Parse { token: String, position: usize },

    /// Falha ao resolver o endpoint ou criar o socket.
    #[error("Falha de transporte para {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Envio parcial; o chamador espera um tick e reenvia o mesmo payload.
    #[error("Escrita parcial: {sent} de {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },

    /// Escritas parciais consecutivas além do limite configurado.
    #[error("Transporte degradado após {attempts} escritas parciais consecutivas")]
    TransportDegraded { attempts: u32 },

    /// Link caiu no meio do lote; o lote é abortado sem reenfileirar.
    #[error("Link caiu durante o lote ({sent} pacotes enviados)")]
    LinkDown { sent: u32 },

    /// Orçamento de tentativas de conexão esgotado.
    #[error("Não foi possível conectar em {network} após {attempts} tentativas")]
    ConnectFailed { network: String, attempts: u32 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
