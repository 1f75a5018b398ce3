//! Errores del flujo de ingesta y consulta.

use thiserror::Error;

/// Clase de error, tal y como se presenta al usuario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Service,
    Timeout,
    MalformedOutput,
    Conflict,
    Storage,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Suba un fichero PDF o indique una URL.")]
    MissingInput,

    #[error("Escriba una pregunta.")]
    EmptyQuestion,

    #[error("Fuente de documento no válida: {0}")]
    InvalidSource(String),

    #[error("No se pudo descargar el documento: {0}")]
    Download(#[source] reqwest::Error),

    #[error("Error del servicio de indexación: {0}")]
    Indexing(String),

    #[error("PageIndex sigue procesando el documento tras {attempts} comprobaciones. Inténtelo más tarde.")]
    StillProcessing { attempts: u32 },

    #[error("Error del modelo de lenguaje: {0}")]
    Completion(String),

    #[error("Respuesta del LLM no válida: {0}")]
    MalformedSelection(String),

    #[error("Error de almacenamiento local: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Ya hay una operación en curso.")]
    Busy,

    #[error("Primero debe procesar un documento.")]
    NoDocument,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingInput | Self::EmptyQuestion | Self::InvalidSource(_) => {
                ErrorKind::Validation
            }
            Self::Download(_) | Self::Indexing(_) | Self::Completion(_) => ErrorKind::Service,
            Self::StillProcessing { .. } => ErrorKind::Timeout,
            Self::MalformedSelection(_) => ErrorKind::MalformedOutput,
            Self::Busy | Self::NoDocument => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors_by_taxonomy() {
        assert_eq!(PipelineError::MissingInput.kind(), ErrorKind::Validation);
        assert_eq!(
            PipelineError::StillProcessing { attempts: 20 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            PipelineError::MalformedSelection("x".into()).kind(),
            ErrorKind::MalformedOutput
        );
        assert_eq!(PipelineError::Busy.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn timeout_message_mentions_attempts() {
        let msg = PipelineError::StillProcessing { attempts: 20 }.to_string();
        assert!(msg.contains("20"));
        assert!(msg.contains("más tarde"));
    }
}
