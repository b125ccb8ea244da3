//! # Módulo de Requisição - Template → Requisição Concreta
//!
//! Transforma um template de requisição (já com as variáveis do escopo
//! substituídas) em uma requisição HTTP concreta, pronta para enviar:
//! método normalizado, URL validada, parâmetros colocados (query string,
//! corpo form-urlencoded ou multipart), headers padrão e cookies.
//!
//! ## Fluxo de construção:
//!
//! ```text
//! ┌──────────┐     ┌───────────┐     ┌────────────┐     ┌──────────┐
//! │ 1. Valida│  →  │ 2. Coloca │  →  │ 3. Headers │  →  │ 4. Anexa │
//! │  método/ │     │  params   │     │  padrão    │     │  cookies │
//! │  URL     │     │  (url/body│     │  (Accept,  │     │          │
//! │          │     │  /multi)  │     │  UA)       │     │          │
//! └──────────┘     └───────────┘     └────────────┘     └──────────┘
//! ```
//!
//! Toda falha aqui é erro de preparação: o teste vira Bogus e a
//! requisição nunca é enviada.

pub mod multipart;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::PrepareError;
use crate::model::{CookieValue, ParamsAs, Request};
use crate::report::body_base64;

// ============================================================================
// CONSTANTES
// ============================================================================

/// Valor padrão do header Accept quando o template não define um.
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// User-Agent padrão, no estilo de um Chrome de desktop.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Métodos HTTP aceitos, conforme RFC 7231 e RFC 5789.
const VALID_HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

// ============================================================================
// REQUISIÇÃO CONSTRUÍDA
// ============================================================================

/// Uma requisição HTTP concreta, pronta para o cliente enviar e para
/// o relatório registrar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltRequest {
    /// Método em maiúsculas; GET quando o template não definia.
    pub method: String,

    /// URL final, com a query string já anexada quando aplicável.
    pub url: String,

    /// Headers completos, incluindo os padrão e o Cookie.
    pub headers: BTreeMap<String, Vec<String>>,

    /// Cookies explícitos do template (também presentes no header Cookie).
    pub cookies: Vec<CookieValue>,

    /// Corpo em bytes (vazio, literal, form-urlencoded ou multipart).
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    pub follow_redirects: bool,

    pub timeout_ms: u64,
}

impl BuiltRequest {
    /// Primeiro valor de um header, busca case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, vs)| vs.first())
            .map(|s| s.as_str())
    }
}

// ============================================================================
// CONSTRUÇÃO
// ============================================================================

/// Constrói a requisição concreta a partir de um template já
/// substituído. O timeout vem do teste dono da requisição.
pub fn build(request: &Request, timeout_ms: u64) -> Result<BuiltRequest, PrepareError> {
    // Método: vazio equivale a GET.
    let method = if request.method.is_empty() {
        "GET".to_string()
    } else {
        request.method.to_uppercase()
    };
    if !VALID_HTTP_METHODS.contains(&method.as_str()) {
        return Err(PrepareError::BadMethod(request.method.clone()));
    }

    let has_params = request.params.iter().any(|p| !p.values.is_empty());

    // Corpo literal e placement de corpo são exclusivos.
    if !request.body.is_empty() && has_params {
        match request.params_as {
            ParamsAs::Body => {
                return Err(PrepareError::BodyWithParams { placement: "body" });
            }
            ParamsAs::Multipart => {
                return Err(PrepareError::BodyWithParams {
                    placement: "multipart",
                });
            }
            ParamsAs::Url => {}
        }
    }

    // GET e HEAD não carregam corpo de parâmetros.
    if has_params && (method == "GET" || method == "HEAD") {
        match request.params_as {
            ParamsAs::Body => {
                return Err(PrepareError::BodyPlacementOnMethod {
                    placement: "body",
                    method,
                });
            }
            ParamsAs::Multipart => {
                return Err(PrepareError::BodyPlacementOnMethod {
                    placement: "multipart",
                    method,
                });
            }
            ParamsAs::Url => {}
        }
    }

    // Valores @file: só fazem sentido em multipart.
    if request.params_as != ParamsAs::Multipart {
        for p in &request.params {
            for v in &p.values {
                if v.starts_with(multipart::FILE_PREFIX) {
                    return Err(PrepareError::FileOutsideMultipart(p.name.clone()));
                }
            }
        }
    }

    // A URL precisa parsear antes de qualquer anexo.
    Url::parse(&request.url).map_err(|e| PrepareError::BadUrl {
        url: request.url.clone(),
        reason: e.to_string(),
    })?;

    let mut url = request.url.clone();
    let mut headers = request.headers.clone();
    let mut body: Vec<u8> = request.body.clone().into_bytes();

    if has_params {
        match request.params_as {
            ParamsAs::Url => {
                let query = encode_params(&request.params);
                let separator = if url.contains('?') { '&' } else { '?' };
                url.push(separator);
                url.push_str(&query);
            }
            ParamsAs::Body => {
                body = encode_params(&request.params).into_bytes();
                set_if_absent(
                    &mut headers,
                    "Content-Type",
                    "application/x-www-form-urlencoded",
                );
            }
            ParamsAs::Multipart => {
                let (encoded, boundary) = multipart::encode(&request.params)?;
                body = encoded;
                set_if_absent(
                    &mut headers,
                    "Content-Type",
                    &format!("multipart/form-data; boundary={}", boundary),
                );
            }
        }
    }

    // Headers padrão, somente quando ausentes após a substituição.
    set_if_absent(&mut headers, "Accept", DEFAULT_ACCEPT);
    set_if_absent(&mut headers, "User-Agent", DEFAULT_USER_AGENT);

    // Cookies explícitos viram um header Cookie.
    if !request.cookies.is_empty() {
        let line = request
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        set_if_absent(&mut headers, "Cookie", &line);
    }

    Ok(BuiltRequest {
        method,
        url,
        headers,
        cookies: request.cookies.clone(),
        body,
        follow_redirects: request.follow_redirects,
        timeout_ms,
    })
}

/// Percent-encode dos parâmetros como pares k=v unidos por &.
fn encode_params(params: &[crate::model::Parameter]) -> String {
    let mut pairs = Vec::new();
    for p in params {
        for v in &p.values {
            pairs.push(format!(
                "{}={}",
                urlencoding::encode(&p.name),
                urlencoding::encode(v)
            ));
        }
    }
    pairs.join("&")
}

fn set_if_absent(headers: &mut BTreeMap<String, Vec<String>>, name: &str, value: &str) {
    let present = headers.keys().any(|k| k.eq_ignore_ascii_case(name));
    if !present {
        headers.insert(name.to_string(), vec![value.to_string()]);
    }
}

// ============================================================================
// TESTES
// ============================================================================
