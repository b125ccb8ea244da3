//! # Módulo de Extração - Captura de Valores das Respostas HTTP
//!
//! Um **extractor** é uma regra nomeada e serializável que puxa um valor
//! string de uma resposta e o vincula a uma variável do escopo da suite.
//!
//! ## Para todos entenderem:
//!
//! Imagine que você faz login numa API e recebe um token na resposta.
//! Você precisa usar esse token nos próximos testes. A extração faz isso:
//!
//! 1. **Recebe** a resposta HTTP (body, headers, cookies)
//! 2. **Busca** o valor (elemento JSON, regex, header, cookie, seletor CSS)
//! 3. **Vincula** no escopo da suite com o nome declarado em `var_ex`
//! 4. **Disponibiliza** para substituição `{{nome}}` nos testes seguintes
//!
//! ## Exemplo de Fluxo:
//!
//! ```text
//! Teste 1: POST /login
//! Resposta: { "data": { "token": "abc123" } }
//! var_ex: { "TOKEN": {"Extractor": "JSONExtractor", "element": "data.token"} }
//! Resultado: escopo da suite ganha TOKEN=abc123
//!
//! Teste 2: GET /profile
//! Header: Authorization: Bearer {{TOKEN}}
//! Substituído: Authorization: Bearer abc123
//! ```
//!
//! ## Serialização:
//!
//! Igual aos checks, cada extractor carrega o discriminador `Extractor`
//! resolvido contra um registro processo-wide:
//!
//! ```json
//! { "Extractor": "HeaderExtractor", "header": "X-Request-Id" }
//! ```

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checks::json_element;
use crate::errors::ExtractionError;
use crate::report::Response;
use crate::scope::Scope;

// ============================================================================
// VARIANTES DE EXTRACTOR
// ============================================================================

/// Vincula um valor constante, sem olhar a resposta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetVariable {
    pub to: String,
}

/// Extrai um elemento do corpo JSON por caminho pontilhado.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonExtractor {
    pub element: String,
}

impl JsonExtractor {
    fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        let root: Value = serde_json::from_slice(&resp.body)
            .map_err(|e| ExtractionError::CantExtract(format!("body is not JSON: {}", e)))?;
        let element = json_element(&root, &self.element)
            .map_err(|e| ExtractionError::NotFound(e.to_string()))?;
        Ok(match element {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Extrai o valor de um cookie de resposta pelo nome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookieExtractor {
    pub name: String,
}

impl CookieExtractor {
    fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        resp.set_cookies()
            .into_iter()
            .find(|c| c.name == self.name)
            .map(|c| c.value)
            .ok_or_else(|| {
                ExtractionError::NotFound(format!("no Set-Cookie named '{}'", self.name))
            })
    }
}

/// Extrai o texto (ou um atributo) do primeiro elemento que casa com
/// o seletor CSS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HtmlExtractor {
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl HtmlExtractor {
    fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        let sel = Selector::parse(&self.selector).map_err(|e| {
            ExtractionError::Malformed(format!("bad CSS selector '{}': {}", self.selector, e))
        })?;
        let doc = Html::parse_document(&resp.text());
        let element = doc.select(&sel).next().ok_or_else(|| {
            ExtractionError::NotFound(format!("selector '{}' matched nothing", self.selector))
        })?;
        match &self.attribute {
            Some(attr) => element
                .value()
                .attr(attr)
                .map(|v| v.to_string())
                .ok_or_else(|| {
                    ExtractionError::NotFound(format!("element has no attribute '{}'", attr))
                }),
            None => {
                let text: Vec<&str> = element.text().collect();
                Ok(text.join("").split_whitespace().collect::<Vec<_>>().join(" "))
            }
        }
    }
}

/// Extrai o primeiro valor de um header da resposta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderExtractor {
    pub header: String,
}

impl HeaderExtractor {
    fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        resp.header(&self.header)
            .map(|v| v.to_string())
            .ok_or_else(|| ExtractionError::NotFound(format!("no header '{}'", self.header)))
    }
}

/// Extrai do corpo textual com uma regex; `submatch` escolhe o grupo
/// de captura (0 = o match inteiro).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyExtractor {
    pub regexp: String,
    pub submatch: usize,
}

impl BodyExtractor {
    fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        let re = Regex::new(&self.regexp).map_err(|e| {
            ExtractionError::Malformed(format!("bad regexp '{}': {}", self.regexp, e))
        })?;
        let text = resp.text();
        let caps = re.captures(&text).ok_or_else(|| {
            ExtractionError::NotFound(format!("regexp '{}' matched nothing", self.regexp))
        })?;
        caps.get(self.submatch)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ExtractionError::NotFound(format!(
                    "regexp '{}' has no submatch {}",
                    self.regexp, self.submatch
                ))
            })
    }
}

// ============================================================================
// O ENUM EXTRACTOR
// ============================================================================

/// Conjunto selado de extractors. A serialização carrega o
/// discriminador `Extractor` com a tag registrada.
#[derive(Debug, Clone)]
pub enum Extractor {
    SetVariable(SetVariable),
    Json(JsonExtractor),
    Cookie(CookieExtractor),
    Html(HtmlExtractor),
    Header(HeaderExtractor),
    Body(BodyExtractor),
}

impl Extractor {
    /// Tag registrada do extractor.
    pub fn name(&self) -> &'static str {
        match self {
            Extractor::SetVariable(_) => "SetVariable",
            Extractor::Json(_) => "JSONExtractor",
            Extractor::Cookie(_) => "CookieExtractor",
            Extractor::Html(_) => "HTMLExtractor",
            Extractor::Header(_) => "HeaderExtractor",
            Extractor::Body(_) => "BodyExtractor",
        }
    }

    /// Puxa um valor string da resposta.
    pub fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        match self {
            Extractor::SetVariable(e) => Ok(e.to.clone()),
            Extractor::Json(e) => e.extract(resp),
            Extractor::Cookie(e) => e.extract(resp),
            Extractor::Html(e) => e.extract(resp),
            Extractor::Header(e) => e.extract(resp),
            Extractor::Body(e) => e.extract(resp),
        }
    }

    /// Clone com variáveis do escopo substituídas nos campos string.
    pub fn substituted(&self, scope: &Scope) -> Extractor {
        match self {
            Extractor::SetVariable(e) => Extractor::SetVariable(SetVariable {
                to: scope.replace_in(&e.to),
            }),
            Extractor::Json(e) => Extractor::Json(JsonExtractor {
                element: scope.replace_in(&e.element),
            }),
            Extractor::Cookie(e) => Extractor::Cookie(CookieExtractor {
                name: scope.replace_in(&e.name),
            }),
            Extractor::Html(e) => Extractor::Html(HtmlExtractor {
                selector: scope.replace_in(&e.selector),
                attribute: e.attribute.clone(),
            }),
            Extractor::Header(e) => Extractor::Header(HeaderExtractor {
                header: scope.replace_in(&e.header),
            }),
            Extractor::Body(e) => Extractor::Body(BodyExtractor {
                regexp: scope.replace_in(&e.regexp),
                submatch: e.submatch,
            }),
        }
    }
}

// ============================================================================
// REGISTRO DE CONSTRUTORES
// ============================================================================

type Constructor = fn(Value) -> Result<Extractor, serde_json::Error>;

struct ExtractorRegistry {
    ctors: HashMap<&'static str, Constructor>,
}

impl ExtractorRegistry {
    fn register(&mut self, tag: &'static str, ctor: Constructor) {
        if self.ctors.insert(tag, ctor).is_some() {
            panic!("duplicate extractor registration: {}", tag);
        }
    }
}

static REGISTRY: Lazy<ExtractorRegistry> = Lazy::new(|| {
    let mut r = ExtractorRegistry {
        ctors: HashMap::new(),
    };
    r.register("SetVariable", |v| {
        Ok(Extractor::SetVariable(serde_json::from_value(v)?))
    });
    r.register("JSONExtractor", |v| Ok(Extractor::Json(serde_json::from_value(v)?)));
    r.register("CookieExtractor", |v| {
        Ok(Extractor::Cookie(serde_json::from_value(v)?))
    });
    r.register("HTMLExtractor", |v| Ok(Extractor::Html(serde_json::from_value(v)?)));
    r.register("HeaderExtractor", |v| {
        Ok(Extractor::Header(serde_json::from_value(v)?))
    });
    r.register("BodyExtractor", |v| Ok(Extractor::Body(serde_json::from_value(v)?)));
    r
});

/// Cria um extractor a partir da tag registrada e dos campos.
pub fn create_extractor(tag: &str, fields: Value) -> Result<Extractor, ExtractionError> {
    let ctor = REGISTRY
        .ctors
        .get(tag)
        .ok_or_else(|| ExtractionError::Malformed(format!("unregistered extractor '{}'", tag)))?;
    ctor(fields)
        .map_err(|e| ExtractionError::Malformed(format!("bad fields for '{}': {}", tag, e)))
}

/// Tags registradas, para round-trips em testes.
pub fn registered_extractor_tags() -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = REGISTRY.ctors.keys().copied().collect();
    tags.sort_unstable();
    tags
}

// ============================================================================
// SERIALIZAÇÃO POR TAG
// ============================================================================

impl Serialize for Extractor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let inner = match self {
            Extractor::SetVariable(e) => serde_json::to_value(e),
            Extractor::Json(e) => serde_json::to_value(e),
            Extractor::Cookie(e) => serde_json::to_value(e),
            Extractor::Html(e) => serde_json::to_value(e),
            Extractor::Header(e) => serde_json::to_value(e),
            Extractor::Body(e) => serde_json::to_value(e),
        };
        let mut value = inner.map_err(serde::ser::Error::custom)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| serde::ser::Error::custom("extractor did not serialize as an object"))?;
        map.insert(
            "Extractor".to_string(),
            Value::String(self.name().to_string()),
        );
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Extractor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Extractor, D::Error> {
        let mut value = Value::deserialize(deserializer)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| serde::de::Error::custom("extractor must be an object"))?;
        let tag = match map.remove("Extractor") {
            Some(Value::String(tag)) => tag,
            _ => return Err(serde::de::Error::custom("missing Extractor discriminator")),
        };
        create_extractor(&tag, value).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTES
// ============================================================================
