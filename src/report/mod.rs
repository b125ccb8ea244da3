//! # Módulo de Resultados - Modelo de Dados dos Relatórios
//!
//! Define todas as **estruturas de resultado** produzidas pela execução:
//! o status de cada check, o resultado de cada teste e o resultado
//! agregado de uma suite.
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! SuiteResult
//! └── TestResult[]  (um por teste executado)
//!     ├── Response        (resposta HTTP capturada)
//!     └── CheckResult[]   (um por check do teste)
//! ```
//!
//! ## A escada de status:
//!
//! Todos os níveis usam a mesma escada, do melhor para o pior:
//!
//! ```text
//! NotRun < Skipped < Pass < Fail < Error < Bogus
//! ```
//!
//! O status agregado de um teste é o PIOR status entre seus checks;
//! o de uma suite é o pior entre seus testes de setup e main.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// STATUS
// ============================================================================

/// Status de um check, teste ou suite.
///
/// A ordem de declaração das variantes define a ordem da escada:
/// `NotRun < Skipped < Pass < Fail < Error < Bogus`. A derivação de
/// `Ord` usa exatamente essa ordem, então `max()` devolve o pior status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Status {
    /// Ainda não executado.
    #[default]
    NotRun,
    /// Pulado deliberadamente (setup falhou, polling negativo, etc).
    Skipped,
    /// Executou e passou.
    Pass,
    /// Executou e reprovou.
    Fail,
    /// Erro de rede/transporte impediu a avaliação.
    Error,
    /// Template ou check malformado; o teste nem chegou a rodar direito.
    Bogus,
}

impl Status {
    /// O pior status de um iterador; `Pass` quando vazio.
    pub fn worst<I: IntoIterator<Item = Status>>(iter: I) -> Status {
        iter.into_iter().max().unwrap_or(Status::Pass)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::NotRun => "NotRun",
            Status::Skipped => "Skipped",
            Status::Pass => "Pass",
            Status::Fail => "Fail",
            Status::Error => "Error",
            Status::Bogus => "Bogus",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotRun" => Ok(Status::NotRun),
            "Skipped" => Ok(Status::Skipped),
            "Pass" => Ok(Status::Pass),
            "Fail" => Ok(Status::Fail),
            "Error" => Ok(Status::Error),
            "Bogus" => Ok(Status::Bogus),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

// ============================================================================
// RESPOSTA CAPTURADA
// ============================================================================

/// Resposta HTTP capturada para avaliação de checks e para o relatório.
///
/// O corpo já está decodificado (gzip removido) e é mantido em bytes
/// porque nem toda resposta é texto (o check de imagem, por exemplo,
/// trabalha com os bytes crus).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Response {
    /// Código de status HTTP (200, 404, ...).
    pub status: u16,

    /// Headers da resposta, nome original → lista de valores.
    pub headers: BTreeMap<String, Vec<String>>,

    /// Corpo decodificado. Serializa como base64 para suportar
    /// respostas binárias no relatório.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Duração da requisição em milissegundos.
    pub duration_ms: f64,
}

impl Response {
    /// Corpo como texto (conversão UTF-8 com perda, para checks textuais).
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Primeiro valor do header, busca case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, vs)| vs.first())
            .map(|s| s.as_str())
    }

    /// Todos os valores do header, busca case-insensitive.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .flat_map(|(_, vs)| vs.iter().map(|s| s.as_str()))
            .collect()
    }

    /// Cookies de resposta parseados dos headers `Set-Cookie`.
    pub fn set_cookies(&self) -> Vec<ResponseCookie> {
        self.header_values("set-cookie")
            .into_iter()
            .filter_map(ResponseCookie::parse)
            .collect()
    }
}

/// Um cookie de resposta, parseado de um header `Set-Cookie`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    /// Atributo Max-Age em segundos, se presente.
    pub max_age: Option<i64>,
    /// Atributo Expires, se presente e parseável.
    pub expires: Option<DateTime<Utc>>,
    pub path: Option<String>,
}

impl ResponseCookie {
    /// Parseia um header `Set-Cookie`. Retorna None para headers sem
    /// o par `name=value` inicial.
    pub fn parse(header: &str) -> Option<ResponseCookie> {
        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts.next()?.split_once('=')?;
        if name.is_empty() {
            return None;
        }
        let mut cookie = ResponseCookie {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            max_age: None,
            expires: None,
            path: None,
        };
        for attr in parts {
            let (k, v) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr, ""),
            };
            if k.eq_ignore_ascii_case("max-age") {
                cookie.max_age = v.parse().ok();
            } else if k.eq_ignore_ascii_case("expires") {
                cookie.expires = DateTime::parse_from_rfc2822(v)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            } else if k.eq_ignore_ascii_case("path") {
                cookie.path = Some(v.to_string());
            }
        }
        Some(cookie)
    }

    /// Tempo de vida restante do cookie em milissegundos, se limitado.
    /// Max-Age tem precedência sobre Expires.
    pub fn lifetime_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        if let Some(secs) = self.max_age {
            return Some(secs * 1000);
        }
        self.expires
            .map(|exp| exp.signed_duration_since(now).num_milliseconds())
    }
}

// ============================================================================
// RESULTADO DE CHECK
// ============================================================================

/// Resultado da avaliação de um único check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Nome registrado do check (`StatusCode`, `Body`, ...).
    pub name: String,

    /// Forma serializada do check, para o relatório.
    pub check: serde_json::Value,

    /// Duração da avaliação em milissegundos.
    pub duration_ms: f64,

    /// Status da avaliação.
    pub status: Status,

    /// Mensagem de erro quando o status é pior que Pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// RESULTADO DE TESTE
// ============================================================================

/// Resultado da execução de um teste completo (com todos os retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Instante de início da primeira tentativa.
    pub started: DateTime<Utc>,

    /// Status agregado: o pior entre os checks executados, ou Error
    /// quando a própria requisição falhou, ou Bogus para template inválido.
    pub status: Status,

    /// Erro de requisição ou de preparação, quando houver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Requisição concreta enviada (última tentativa), para o relatório.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<crate::request::BuiltRequest>,

    /// Resposta da última tentativa.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,

    /// Duração da requisição HTTP da última tentativa, em ms.
    pub request_duration_ms: f64,

    /// Duração total incluindo retries e sleeps, em ms.
    pub full_duration_ms: f64,

    /// Número de tentativas efetivamente feitas.
    pub tries: u32,

    /// Variáveis extraídas com sucesso (nome → valor).
    #[serde(default)]
    pub extractions: HashMap<String, String>,

    /// Erros de extração (nome → mensagem). Não rebaixam o status.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extraction_errors: HashMap<String, String>,

    /// Resultados de cada check, na ordem declarada.
    pub checks: Vec<CheckResult>,
}

impl TestResult {
    /// Cria o esqueleto de resultado com todos os checks em NotRun.
    pub fn shell(name: &str, description: &str, checks: Vec<CheckResult>) -> TestResult {
        TestResult {
            name: name.to_string(),
            description: description.to_string(),
            started: Utc::now(),
            status: Status::NotRun,
            error: None,
            request: None,
            response: None,
            request_duration_ms: 0.0,
            full_duration_ms: 0.0,
            tries: 0,
            extractions: HashMap::new(),
            extraction_errors: HashMap::new(),
            checks,
        }
    }
}

// ============================================================================
// RESULTADO DE SUITE
// ============================================================================

/// Resultado da execução de uma suite inteira.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Pior status entre setup+main; teardown quebrado só pode
    /// agravar para Bogus.
    pub status: Status,

    pub started: DateTime<Utc>,

    /// Duração total da suite em milissegundos.
    pub full_duration_ms: f64,

    /// Resultados na ordem de execução (setup, main, teardown).
    pub tests: Vec<TestResult>,

    /// Escopo final da suite, depois de todas as extrações.
    pub variables: HashMap<String, String>,

    /// Cookie jar usado pela suite, para inspeção em relatórios.
    /// Presente apenas quando KeepCookies estava ativo.
    #[serde(skip)]
    pub jar: Option<Arc<reqwest::cookie::Jar>>,
}

// ============================================================================
// SERIALIZAÇÃO DO CORPO (BASE64)
// ============================================================================

pub(crate) mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------------
    // Escada de status
    // ------------------------------------------------------------------------

    #[test]
    fn test_status_ladder_ordering() {
        assert!(Status::NotRun < Status::Skipped);
        assert!(Status::Skipped < Status::Pass);
        assert!(Status::Pass < Status::Fail);
        assert!(Status::Fail < Status::Error);
        assert!(Status::Error < Status::Bogus);
    }

    #[test]
    fn test_status_worst() {
        assert_eq!(
            Status::worst([Status::Pass, Status::Fail, Status::Skipped]),
            Status::Fail
        );
        assert_eq!(Status::worst([]), Status::Pass);
        assert_eq!(
            Status::worst([Status::Pass, Status::Bogus, Status::Error]),
            Status::Bogus
        );
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            Status::NotRun,
            Status::Skipped,
            Status::Pass,
            Status::Fail,
            Status::Error,
            Status::Bogus,
        ] {
            assert_eq!(s.to_string().parse::<Status>().unwrap(), s);
        }
        assert!("Nope".parse::<Status>().is_err());
    }

    // ------------------------------------------------------------------------
    // Resposta capturada
    // ------------------------------------------------------------------------

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert(
            "Content-Type".to_string(),
            vec!["text/html".to_string(), "ignored".to_string()],
        );
        let resp = Response {
            status: 200,
            headers,
            body: b"ok".to_vec(),
            duration_ms: 1.0,
        };
        assert_eq!(resp.header("content-type"), Some("text/html"));
        assert_eq!(resp.header("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(resp.header("x-missing"), None);
    }

    #[test]
    fn test_set_cookie_parse() {
        let c = ResponseCookie::parse("session=abc123; Max-Age=3600; Path=/; HttpOnly").unwrap();
        assert_eq!(c.name, "session");
        assert_eq!(c.value, "abc123");
        assert_eq!(c.max_age, Some(3600));
        assert_eq!(c.path.as_deref(), Some("/"));
        assert_eq!(c.lifetime_ms(Utc::now()), Some(3_600_000));
    }

    #[test]
    fn test_set_cookie_parse_expires() {
        let c = ResponseCookie::parse("id=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT").unwrap();
        assert!(c.expires.is_some());
        assert!(c.max_age.is_none());
    }

    #[test]
    fn test_set_cookie_parse_invalid() {
        assert!(ResponseCookie::parse("garbage-without-equals").is_none());
        assert!(ResponseCookie::parse("=nameless").is_none());
    }

    // ------------------------------------------------------------------------
    // Serialização
    // ------------------------------------------------------------------------

    #[test]
    fn test_response_body_base64_round_trip() {
        let resp = Response {
            status: 200,
            headers: BTreeMap::new(),
            body: vec![0xff, 0x00, 0x7f],
            duration_ms: 2.5,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, vec![0xff, 0x00, 0x7f]);
    }
}
