//! # Módulo de Erros do Motor de Testes
//!
//! Define os tipos de erro propagados uniformemente pelo motor:
//! erros de check, erros de preparação de request/template e erros
//! de configuração do gerador de carga.
//!
//! ## Para todos entenderem:
//!
//! Quando um teste "dá errado", existem naturezas bem diferentes de erro:
//!
//! - O **check** reprovou a resposta (o servidor respondeu, mas errado)
//! - O **template** do teste está malformado (culpa de quem escreveu o teste)
//! - A **rede** falhou (timeout, DNS, conexão recusada)
//!
//! Cada natureza vira um status diferente no resultado:
//!
//! | Erro                        | Status resultante |
//! |-----------------------------|-------------------|
//! | Check reprovou              | Fail              |
//! | Check malformado            | Bogus             |
//! | Template/merge inválido     | Bogus             |
//! | Erro de rede/transporte     | Error             |

use std::path::PathBuf;
use thiserror::Error;

use crate::report::Status;

// ============================================================================
// ERROS DE CHECK
// ============================================================================

/// Erros produzidos pela preparação ou avaliação de um check.
///
/// Cada variante carrega uma mensagem descritiva; o atributo `#[error(...)]`
/// define o texto exibido em relatórios.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Preparação do check falhou: regex inválida, seletor CSS inválido,
    /// limites contraditórios. O teste inteiro vira Bogus.
    #[error("malformed check: {0}")]
    MalformedCheck(String),

    /// O corpo da resposta não pôde ser lido ou decodificado.
    #[error("bad body: {0}")]
    BadBody(String),

    /// O check avaliou a resposta e reprovou.
    #[error("{0}")]
    Failed(String),

    /// Algo que deveria existir não foi encontrado.
    #[error("not found")]
    NotFound,

    /// Algo que não poderia existir foi encontrado.
    #[error("found forbidden")]
    FoundForbidden,

    /// Contagem tri-modal não bateu (esperava `want`, encontrou `got`).
    #[error("found {got} occurrences, want {want}")]
    WrongCount { got: i64, want: i64 },

    /// Pré-condição do check não atendida (ex.: corpo não é JSON
    /// quando um check JSON foi avaliado).
    #[error("cannot check: {cause}")]
    CantCheck { cause: String },
}

impl CheckError {
    /// Converte o erro no status de resultado correspondente.
    pub fn status(&self) -> Status {
        match self {
            CheckError::MalformedCheck(_) => Status::Bogus,
            _ => Status::Fail,
        }
    }
}

// ============================================================================
// ERROS DE PREPARAÇÃO (TEMPLATE / REQUEST)
// ============================================================================

/// Erros de preparação de um teste: merge de mixins ou construção
/// da requisição concreta. Todos resultam em status Bogus.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// Dois templates mesclados discordam em um campo escalar.
    #[error("cannot merge {field}: '{a}' conflicts with '{b}'")]
    MergeConflict {
        field: &'static str,
        a: String,
        b: String,
    },

    /// Mais de um template do merge define a URL.
    #[error("cannot merge: URL set by more than one template")]
    UrlConflict,

    /// Corpo literal e placement de parâmetros no corpo são exclusivos.
    #[error("body and parameter placement '{placement}' are mutually exclusive")]
    BodyWithParams { placement: &'static str },

    /// Placement de corpo não é permitido para GET/HEAD.
    #[error("parameter placement '{placement}' not allowed on {method}")]
    BodyPlacementOnMethod {
        placement: &'static str,
        method: String,
    },

    /// Valor `@file:` usado fora de uma requisição multipart.
    #[error("file parameter {0} allowed only in multipart requests")]
    FileOutsideMultipart(String),

    /// Arquivo referenciado por `@file:` não pôde ser aberto.
    #[error("cannot read file parameter {path}: {reason}")]
    FileUnreadable { path: PathBuf, reason: String },

    /// URL resultante da substituição não parseia.
    #[error("malformed URL '{url}': {reason}")]
    BadUrl { url: String, reason: String },

    /// Método HTTP desconhecido.
    #[error("invalid HTTP method '{0}'")]
    BadMethod(String),

    /// Um check do teste falhou na preparação.
    #[error(transparent)]
    MalformedCheck(#[from] CheckError),

    /// Um suite-element referencia um arquivo que não foi resolvido
    /// pelo decoder.
    #[error("suite element '{0}' has no resolved test")]
    UnresolvedElement(String),
}

// ============================================================================
// ERROS DE EXTRAÇÃO
// ============================================================================

/// Erros de um extractor ao puxar um valor da resposta.
///
/// Falhas de extração são registradas no resultado do teste mas
/// nunca rebaixam um teste que passou.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("nothing extracted: {0}")]
    NotFound(String),

    #[error("malformed extractor: {0}")]
    Malformed(String),

    #[error("cannot extract: {0}")]
    CantExtract(String),
}

// ============================================================================
// ERROS DO GERADOR DE CARGA
// ============================================================================

/// Erros de configuração ou de fase de setup de um teste de carga.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A soma das porcentagens dos cenários precisa ser exatamente 100.
    #[error("scenario percentages sum to {0}, want exactly 100")]
    BadPercentage(u32),

    #[error("rate must be positive, got {0}")]
    BadRate(f64),

    #[error("duration must be positive")]
    BadDuration,

    #[error("load test needs at least one scenario")]
    NoScenarios,

    /// Um teste de setup de cenário não passou; o teste de carga
    /// inteiro é abortado antes de gerar tráfego.
    #[error("setup of scenario '{scenario}' failed with status {status}")]
    SetupFailed { scenario: String, status: Status },

    /// O stream CSV de eventos não pôde ser aberto ou escrito.
    #[error("cannot write CSV stream: {0}")]
    Csv(String),
}
