//! # Módulo de Checks - Validações Polimórficas de Resposta
//!
//! Um **check** é uma asserção nomeada e serializável avaliada contra
//! uma resposta HTTP. Este módulo define o conjunto selado de variantes,
//! o registro processo-wide de construtores e a serialização por tag.
//!
//! ## Ciclo de vida de um check:
//!
//! ```text
//! ┌──────────┐      ┌──────────┐      ┌──────────┐
//! │ decode   │  →   │ prepare  │  →   │ execute  │
//! │ (tag →   │      │ (compila │      │ (avalia  │
//! │ registro)│      │ regex,   │      │ resposta)│
//! │          │      │ seletor) │      │          │
//! └──────────┘      └──────────┘      └──────────┘
//! ```
//!
//! - `prepare` falha com `MalformedCheck` para entradas inválidas
//!   (regex quebrada, limites contraditórios); o teste inteiro vira Bogus
//!   e a requisição nem é enviada.
//! - `execute` devolve sucesso ou um dos erros da taxonomia.
//!
//! ## Serialização:
//!
//! Cada check serializa como um objeto com o discriminador `Check`:
//!
//! ```json
//! { "Check": "StatusCode", "expect": 200 }
//! { "Check": "Body", "contains": "Hello", "count": 1 }
//! ```
//!
//! A deserialização lê a tag e resolve o construtor no registro.
//! Registro duplicado de uma tag é erro de programação e aborta.

pub mod html;
pub mod image;

use std::collections::HashMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CheckError;
use crate::report::Response;
use crate::scope::Scope;

pub use html::{HtmlContains, HtmlContainsText, ValidHtml};
pub use image::ImageCheck;

// ============================================================================
// CONDITION
// ============================================================================

/// Conjunção de restrições sobre uma string.
///
/// Todos os campos presentes precisam valer ao mesmo tempo. `count`
/// qualifica `contains` e `regexp` de forma tri-modal:
///
/// | count | Significado            |
/// |-------|------------------------|
/// | > 0   | exatamente count vezes |
/// | 0     | pelo menos uma vez     |
/// | < 0   | nenhuma vez            |
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Condition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
    pub count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,

    #[serde(skip)]
    pub(crate) compiled: Option<Regex>,
}

impl Condition {
    /// Nenhuma restrição configurada.
    pub fn is_empty(&self) -> bool {
        self.equals.is_none()
            && self.prefix.is_none()
            && self.suffix.is_none()
            && self.contains.is_none()
            && self.regexp.is_none()
            && self.min.is_none()
            && self.max.is_none()
    }

    /// Compila a regex, se houver. Regex inválida é `MalformedCheck`.
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if let Some(pattern) = &self.regexp {
            let re = Regex::new(pattern)
                .map_err(|e| CheckError::MalformedCheck(format!("bad regexp '{}': {}", pattern, e)))?;
            self.compiled = Some(re);
        }
        Ok(())
    }

    /// Avalia a conjunção contra a string de entrada.
    pub fn fulfilled(&self, s: &str) -> Result<(), CheckError> {
        if let Some(want) = &self.equals {
            if s != want {
                return Err(CheckError::Failed(format!(
                    "found \"{}\", want \"{}\"",
                    abbreviate(s),
                    want
                )));
            }
        }
        if let Some(prefix) = &self.prefix {
            if !s.starts_with(prefix.as_str()) {
                return Err(CheckError::Failed(format!(
                    "missing prefix \"{}\"",
                    prefix
                )));
            }
        }
        if let Some(suffix) = &self.suffix {
            if !s.ends_with(suffix.as_str()) {
                return Err(CheckError::Failed(format!(
                    "missing suffix \"{}\"",
                    suffix
                )));
            }
        }
        if let Some(needle) = &self.contains {
            let got = s.matches(needle.as_str()).count() as i64;
            tri_modal(got, self.count)?;
        }
        if let Some(pattern) = &self.regexp {
            let fresh;
            let re = match &self.compiled {
                Some(re) => re,
                None => {
                    fresh = Regex::new(pattern).map_err(|e| {
                        CheckError::MalformedCheck(format!("bad regexp '{}': {}", pattern, e))
                    })?;
                    &fresh
                }
            };
            let got = re.find_iter(s).count() as i64;
            tri_modal(got, self.count)?;
        }
        if let Some(min) = self.min {
            if s.len() < min {
                return Err(CheckError::Failed(format!(
                    "length {} below minimum {}",
                    s.len(),
                    min
                )));
            }
        }
        if let Some(max) = self.max {
            if s.len() > max {
                return Err(CheckError::Failed(format!(
                    "length {} above maximum {}",
                    s.len(),
                    max
                )));
            }
        }
        Ok(())
    }

    /// Clone com variáveis do escopo substituídas nos campos string.
    pub fn substituted(&self, scope: &Scope) -> Condition {
        Condition {
            equals: self.equals.as_deref().map(|v| scope.replace_in(v)),
            prefix: self.prefix.as_deref().map(|v| scope.replace_in(v)),
            suffix: self.suffix.as_deref().map(|v| scope.replace_in(v)),
            contains: self.contains.as_deref().map(|v| scope.replace_in(v)),
            regexp: self.regexp.as_deref().map(|v| scope.replace_in(v)),
            count: self.count,
            min: self.min,
            max: self.max,
            compiled: None,
        }
    }
}

/// Aplica a semântica tri-modal de contagem.
fn tri_modal(got: i64, want: i32) -> Result<(), CheckError> {
    if want > 0 {
        if got != want as i64 {
            return Err(CheckError::WrongCount {
                got,
                want: want as i64,
            });
        }
    } else if want == 0 {
        if got == 0 {
            return Err(CheckError::NotFound);
        }
    } else if got > 0 {
        return Err(CheckError::FoundForbidden);
    }
    Ok(())
}

fn abbreviate(s: &str) -> String {
    const LIMIT: usize = 60;
    if s.len() <= LIMIT {
        return s.to_string();
    }
    let mut cut = LIMIT;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &s[..cut])
}

// ============================================================================
// VARIANTES DE CHECK
// ============================================================================

/// O status da resposta é exatamente o esperado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCode {
    #[serde(default = "default_expect")]
    pub expect: u16,
}

fn default_expect() -> u16 {
    200
}

impl StatusCode {
    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        if resp.status != self.expect {
            return Err(CheckError::Failed(format!(
                "got status {}, want {}",
                resp.status, self.expect
            )));
        }
        Ok(())
    }
}

/// Condição aplicada ao corpo textual da resposta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(flatten)]
    pub condition: Condition,
}

impl Body {
    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        self.condition.fulfilled(&resp.text())
    }
}

/// O corpo é UTF-8 válido e não começa com BOM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Utf8Encoded {}

impl Utf8Encoded {
    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        if resp.body.starts_with(&[0xEF, 0xBB, 0xBF]) {
            return Err(CheckError::Failed("body starts with UTF-8 BOM".to_string()));
        }
        if let Err(e) = std::str::from_utf8(&resp.body) {
            return Err(CheckError::Failed(format!(
                "invalid UTF-8 at byte {}",
                e.valid_up_to()
            )));
        }
        Ok(())
    }
}

/// O primeiro valor do header nomeado satisfaz a condição, ou o
/// header está ausente quando `absent` é true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderCheck {
    pub header: String,
    #[serde(default)]
    pub absent: bool,
    #[serde(flatten)]
    pub condition: Condition,
}

impl HeaderCheck {
    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let value = resp.header(&self.header);
        if self.absent {
            return match value {
                Some(_) => Err(CheckError::FoundForbidden),
                None => Ok(()),
            };
        }
        match value {
            Some(v) => self.condition.fulfilled(v),
            None => Err(CheckError::NotFound),
        }
    }
}

/// Um cookie de resposta com o nome dado existe e, opcionalmente,
/// satisfaz a condição de valor e o tempo de vida mínimo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetCookieCheck {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_lifetime_ms: Option<u64>,
}

impl SetCookieCheck {
    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let cookies = resp.set_cookies();
        let cookie = cookies
            .iter()
            .find(|c| c.name == self.name)
            .ok_or(CheckError::NotFound)?;
        if let Some(cond) = &self.value {
            cond.fulfilled(&cookie.value)?;
        }
        if let Some(min) = self.min_lifetime_ms {
            match cookie.lifetime_ms(Utc::now()) {
                Some(ms) if ms >= min as i64 => {}
                Some(ms) => {
                    return Err(CheckError::Failed(format!(
                        "cookie '{}' lives {}ms, want at least {}ms",
                        self.name, ms, min
                    )));
                }
                None => {
                    return Err(CheckError::Failed(format!(
                        "cookie '{}' has no bounded lifetime",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Limites sobre a duração da requisição. Zero significa "sem limite"
/// naquele lado; `min_ms ≥ max_ms` com ambos não-zero é malformado.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseTime {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl ResponseTime {
    fn prepare(&self) -> Result<(), CheckError> {
        if self.min_ms > 0 && self.max_ms > 0 && self.min_ms >= self.max_ms {
            return Err(CheckError::MalformedCheck(format!(
                "contradictory bounds: min {}ms >= max {}ms",
                self.min_ms, self.max_ms
            )));
        }
        Ok(())
    }

    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let d = resp.duration_ms;
        if self.min_ms > 0 && d < self.min_ms as f64 {
            return Err(CheckError::Failed(format!(
                "response took {:.1}ms, want at least {}ms",
                d, self.min_ms
            )));
        }
        if self.max_ms > 0 && d > self.max_ms as f64 {
            return Err(CheckError::Failed(format!(
                "response took {:.1}ms, want at most {}ms",
                d, self.max_ms
            )));
        }
        Ok(())
    }
}

/// Navega o corpo JSON até `element` e aplica a condição ao valor;
/// opcionalmente valida o valor contra um JSON Schema embutido.
///
/// Sem condição e sem schema, o check exige que o elemento exista e,
/// quando booleano, que seja true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonCheck {
    #[serde(default)]
    pub element: String,
    #[serde(flatten)]
    pub condition: Condition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl JsonCheck {
    fn prepare(&self) -> Result<(), CheckError> {
        if let Some(schema) = &self.schema {
            jsonschema::JSONSchema::compile(schema)
                .map_err(|e| CheckError::MalformedCheck(format!("bad JSON schema: {}", e)))?;
        }
        Ok(())
    }

    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let root: Value = serde_json::from_slice(&resp.body).map_err(|e| CheckError::CantCheck {
            cause: format!("body is not JSON: {}", e),
        })?;
        let element = json_element(&root, &self.element)?;

        if let Some(schema) = &self.schema {
            let compiled = jsonschema::JSONSchema::compile(schema)
                .map_err(|e| CheckError::MalformedCheck(format!("bad JSON schema: {}", e)))?;
            if let Err(errors) = compiled.validate(element) {
                let msgs: Vec<String> = errors.take(3).map(|e| e.to_string()).collect();
                return Err(CheckError::Failed(format!(
                    "schema violations: [{}]",
                    msgs.join("; ")
                )));
            };
        }

        if self.condition.is_empty() {
            if element == &Value::Bool(false) {
                return Err(CheckError::Failed(format!(
                    "element '{}' is false",
                    self.element
                )));
            }
            return Ok(());
        }

        let text = match element {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.condition.fulfilled(&text)
    }
}

/// Composto "nenhum destes": todos os checks aninhados devem reprovar.
/// Se qualquer um passar, o composto reprova com FoundForbidden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoneOf {
    pub of: Vec<Check>,
}

impl NoneOf {
    fn prepare(&mut self) -> Result<(), CheckError> {
        for check in &mut self.of {
            check.prepare()?;
        }
        Ok(())
    }

    fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        for check in &self.of {
            if check.execute(resp).is_ok() {
                return Err(CheckError::FoundForbidden);
            }
        }
        Ok(())
    }
}

// ============================================================================
// NAVEGAÇÃO JSON
// ============================================================================

/// Navega um Value JSON por um caminho pontilhado com índices de array.
///
/// Suporta `token`, `data.user.id`, `items[2].name`. Caminho vazio
/// devolve a raiz.
pub(crate) fn json_element<'a>(root: &'a Value, path: &str) -> Result<&'a Value, CheckError> {
    if path.is_empty() {
        return Ok(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        let (field, indexes) = split_indexes(segment)?;
        if !field.is_empty() {
            current = match current {
                Value::Object(map) => map.get(field).ok_or_else(|| CheckError::CantCheck {
                    cause: format!("element '{}' not found at '{}'", path, field),
                })?,
                _ => {
                    return Err(CheckError::CantCheck {
                        cause: format!("'{}' is not an object", field),
                    });
                }
            };
        }
        for idx in indexes {
            current = match current {
                Value::Array(items) => items.get(idx).ok_or_else(|| CheckError::CantCheck {
                    cause: format!("index {} out of bounds", idx),
                })?,
                _ => {
                    return Err(CheckError::CantCheck {
                        cause: format!("cannot index non-array with [{}]", idx),
                    });
                }
            };
        }
    }
    Ok(current)
}

/// Separa "items[2][0]" em ("items", [2, 0]).
fn split_indexes(segment: &str) -> Result<(&str, Vec<usize>), CheckError> {
    match segment.find('[') {
        None => Ok((segment, Vec::new())),
        Some(pos) => {
            let field = &segment[..pos];
            let mut indexes = Vec::new();
            for part in segment[pos..].split('[').skip(1) {
                let digits = part.strip_suffix(']').ok_or_else(|| CheckError::CantCheck {
                    cause: format!("malformed index in '{}'", segment),
                })?;
                let idx = digits.parse().map_err(|_| CheckError::CantCheck {
                    cause: format!("malformed index in '{}'", segment),
                })?;
                indexes.push(idx);
            }
            Ok((field, indexes))
        }
    }
}

// ============================================================================
// O ENUM CHECK
// ============================================================================

/// Conjunto selado de checks. A serialização carrega o discriminador
/// `Check` com a tag registrada.
#[derive(Debug, Clone)]
pub enum Check {
    StatusCode(StatusCode),
    Body(Body),
    Utf8Encoded(Utf8Encoded),
    Header(HeaderCheck),
    SetCookie(SetCookieCheck),
    ResponseTime(ResponseTime),
    HtmlContains(HtmlContains),
    HtmlContainsText(HtmlContainsText),
    ValidHtml(ValidHtml),
    Json(JsonCheck),
    Image(ImageCheck),
    None(NoneOf),
}

impl Check {
    /// Tag registrada do check.
    pub fn name(&self) -> &'static str {
        match self {
            Check::StatusCode(_) => "StatusCode",
            Check::Body(_) => "Body",
            Check::Utf8Encoded(_) => "UTF8Encoded",
            Check::Header(_) => "Header",
            Check::SetCookie(_) => "SetCookie",
            Check::ResponseTime(_) => "ResponseTime",
            Check::HtmlContains(_) => "HTMLContains",
            Check::HtmlContainsText(_) => "HTMLContainsText",
            Check::ValidHtml(_) => "ValidHTML",
            Check::Json(_) => "JSON",
            Check::Image(_) => "Image",
            Check::None(_) => "None",
        }
    }

    /// Compila expressões e valida limites. `MalformedCheck` aqui
    /// promove o teste inteiro a Bogus antes da requisição.
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        match self {
            Check::StatusCode(_) | Check::Utf8Encoded(_) | Check::ValidHtml(_) => Ok(()),
            Check::Body(c) => c.condition.prepare(),
            Check::Header(c) => c.condition.prepare(),
            Check::SetCookie(c) => match &mut c.value {
                Some(cond) => cond.prepare(),
                None => Ok(()),
            },
            Check::ResponseTime(c) => c.prepare(),
            Check::HtmlContains(c) => c.prepare(),
            Check::HtmlContainsText(c) => c.prepare(),
            Check::Json(c) => {
                c.condition.prepare()?;
                c.prepare()
            }
            Check::Image(c) => c.prepare(),
            Check::None(c) => c.prepare(),
        }
    }

    /// Avalia o check contra a resposta.
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        match self {
            Check::StatusCode(c) => c.execute(resp),
            Check::Body(c) => c.execute(resp),
            Check::Utf8Encoded(c) => c.execute(resp),
            Check::Header(c) => c.execute(resp),
            Check::SetCookie(c) => c.execute(resp),
            Check::ResponseTime(c) => c.execute(resp),
            Check::HtmlContains(c) => c.execute(resp),
            Check::HtmlContainsText(c) => c.execute(resp),
            Check::ValidHtml(c) => c.execute(resp),
            Check::Json(c) => c.execute(resp),
            Check::Image(c) => c.execute(resp),
            Check::None(c) => c.execute(resp),
        }
    }

    /// Clone com variáveis do escopo substituídas nos campos string.
    pub fn substituted(&self, scope: &Scope) -> Check {
        match self {
            Check::StatusCode(c) => Check::StatusCode(c.clone()),
            Check::Utf8Encoded(c) => Check::Utf8Encoded(c.clone()),
            Check::ValidHtml(c) => Check::ValidHtml(c.clone()),
            Check::ResponseTime(c) => Check::ResponseTime(c.clone()),
            Check::Image(c) => Check::Image(c.clone()),
            Check::Body(c) => Check::Body(Body {
                condition: c.condition.substituted(scope),
            }),
            Check::Header(c) => Check::Header(HeaderCheck {
                header: scope.replace_in(&c.header),
                absent: c.absent,
                condition: c.condition.substituted(scope),
            }),
            Check::SetCookie(c) => Check::SetCookie(SetCookieCheck {
                name: scope.replace_in(&c.name),
                value: c.value.as_ref().map(|v| v.substituted(scope)),
                min_lifetime_ms: c.min_lifetime_ms,
            }),
            Check::Json(c) => Check::Json(JsonCheck {
                element: scope.replace_in(&c.element),
                condition: c.condition.substituted(scope),
                schema: c.schema.clone(),
            }),
            Check::HtmlContains(c) => Check::HtmlContains(c.substituted(scope)),
            Check::HtmlContainsText(c) => Check::HtmlContainsText(c.substituted(scope)),
            Check::None(c) => Check::None(NoneOf {
                of: c.of.iter().map(|n| n.substituted(scope)).collect(),
            }),
        }
    }
}

// ============================================================================
// REGISTRO DE CONSTRUTORES
// ============================================================================

type Constructor = fn(Value) -> Result<Check, serde_json::Error>;

struct CheckRegistry {
    ctors: HashMap<&'static str, Constructor>,
}

impl CheckRegistry {
    fn new() -> CheckRegistry {
        CheckRegistry {
            ctors: HashMap::new(),
        }
    }

    /// Registro duplicado é erro de programação: aborta.
    fn register(&mut self, tag: &'static str, ctor: Constructor) {
        if self.ctors.insert(tag, ctor).is_some() {
            panic!("duplicate check registration: {}", tag);
        }
    }
}

/// Registro processo-wide, populado na primeira utilização e somente
/// leitura depois disso.
static REGISTRY: Lazy<CheckRegistry> = Lazy::new(|| {
    let mut r = CheckRegistry::new();
    r.register("StatusCode", |v| Ok(Check::StatusCode(serde_json::from_value(v)?)));
    r.register("Body", |v| Ok(Check::Body(serde_json::from_value(v)?)));
    r.register("UTF8Encoded", |v| Ok(Check::Utf8Encoded(serde_json::from_value(v)?)));
    r.register("Header", |v| Ok(Check::Header(serde_json::from_value(v)?)));
    r.register("SetCookie", |v| Ok(Check::SetCookie(serde_json::from_value(v)?)));
    r.register("ResponseTime", |v| Ok(Check::ResponseTime(serde_json::from_value(v)?)));
    r.register("HTMLContains", |v| Ok(Check::HtmlContains(serde_json::from_value(v)?)));
    r.register("HTMLContainsText", |v| {
        Ok(Check::HtmlContainsText(serde_json::from_value(v)?))
    });
    r.register("ValidHTML", |v| Ok(Check::ValidHtml(serde_json::from_value(v)?)));
    r.register("JSON", |v| Ok(Check::Json(serde_json::from_value(v)?)));
    r.register("Image", |v| Ok(Check::Image(serde_json::from_value(v)?)));
    r.register("None", |v| Ok(Check::None(serde_json::from_value(v)?)));
    r
});

/// Cria um check a partir da tag registrada e dos campos serializados.
pub fn create_check(tag: &str, fields: Value) -> Result<Check, CheckError> {
    let ctor = REGISTRY
        .ctors
        .get(tag)
        .ok_or_else(|| CheckError::MalformedCheck(format!("unregistered check '{}'", tag)))?;
    ctor(fields).map_err(|e| CheckError::MalformedCheck(format!("bad fields for '{}': {}", tag, e)))
}

/// Tags registradas, para round-trips em testes.
pub fn registered_check_tags() -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = REGISTRY.ctors.keys().copied().collect();
    tags.sort_unstable();
    tags
}

// ============================================================================
// SERIALIZAÇÃO POR TAG
// ============================================================================

impl Serialize for Check {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let inner = match self {
            Check::StatusCode(c) => serde_json::to_value(c),
            Check::Body(c) => serde_json::to_value(c),
            Check::Utf8Encoded(c) => serde_json::to_value(c),
            Check::Header(c) => serde_json::to_value(c),
            Check::SetCookie(c) => serde_json::to_value(c),
            Check::ResponseTime(c) => serde_json::to_value(c),
            Check::HtmlContains(c) => serde_json::to_value(c),
            Check::HtmlContainsText(c) => serde_json::to_value(c),
            Check::ValidHtml(c) => serde_json::to_value(c),
            Check::Json(c) => serde_json::to_value(c),
            Check::Image(c) => serde_json::to_value(c),
            Check::None(c) => serde_json::to_value(c),
        };
        let mut value = inner.map_err(serde::ser::Error::custom)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| serde::ser::Error::custom("check did not serialize as an object"))?;
        map.insert("Check".to_string(), Value::String(self.name().to_string()));
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Check {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Check, D::Error> {
        let mut value = Value::deserialize(deserializer)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| serde::de::Error::custom("check must be an object"))?;
        let tag = match map.remove("Check") {
            Some(Value::String(tag)) => tag,
            _ => return Err(serde::de::Error::custom("missing Check discriminator")),
        };
        create_check(&tag, value).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn response(status: u16, body: &[u8]) -> Response {
        Response {
            status,
            headers: BTreeMap::new(),
            body: body.to_vec(),
            duration_ms: 10.0,
        }
    }

    fn response_with_header(name: &str, value: &str) -> Response {
        let mut headers = BTreeMap::new();
        headers.insert(name.to_string(), vec![value.to_string()]);
        Response {
            status: 200,
            headers,
            body: Vec::new(),
            duration_ms: 10.0,
        }
    }

    // ------------------------------------------------------------------------
    // Condition
    // ------------------------------------------------------------------------

    #[test]
    fn test_condition_contains_tri_modal() {
        let body = "foo bar foo baz foo";

        // count > 0: exatamente count vezes
        let exact = Condition {
            contains: Some("foo".into()),
            count: 3,
            ..Condition::default()
        };
        assert!(exact.fulfilled(body).is_ok());

        let wrong = Condition {
            contains: Some("foo".into()),
            count: 2,
            ..Condition::default()
        };
        assert!(matches!(
            wrong.fulfilled(body),
            Err(CheckError::WrongCount { got: 3, want: 2 })
        ));

        // count == 0: pelo menos uma vez
        let at_least = Condition {
            contains: Some("bar".into()),
            ..Condition::default()
        };
        assert!(at_least.fulfilled(body).is_ok());
        let missing = Condition {
            contains: Some("qux".into()),
            ..Condition::default()
        };
        assert!(matches!(missing.fulfilled(body), Err(CheckError::NotFound)));

        // count < 0: nenhuma vez
        let forbidden = Condition {
            contains: Some("foo".into()),
            count: -1,
            ..Condition::default()
        };
        assert!(matches!(
            forbidden.fulfilled(body),
            Err(CheckError::FoundForbidden)
        ));
        let absent_ok = Condition {
            contains: Some("qux".into()),
            count: -1,
            ..Condition::default()
        };
        assert!(absent_ok.fulfilled(body).is_ok());
    }

    #[test]
    fn test_condition_regexp_tri_modal() {
        let mut c = Condition {
            regexp: Some(r"\d+".into()),
            count: 2,
            ..Condition::default()
        };
        c.prepare().unwrap();
        assert!(c.fulfilled("a1b22c").is_ok());
        assert!(matches!(
            c.fulfilled("abc"),
            Err(CheckError::WrongCount { got: 0, want: 2 })
        ));
    }

    #[test]
    fn test_condition_bad_regexp_is_malformed() {
        let mut c = Condition {
            regexp: Some("([invalid".into()),
            ..Condition::default()
        };
        assert!(matches!(c.prepare(), Err(CheckError::MalformedCheck(_))));
    }

    #[test]
    fn test_condition_equals_prefix_suffix_length() {
        let c = Condition {
            equals: Some("exact".into()),
            ..Condition::default()
        };
        assert!(c.fulfilled("exact").is_ok());
        assert!(c.fulfilled("other").is_err());

        let c = Condition {
            prefix: Some("he".into()),
            suffix: Some("lo".into()),
            min: Some(4),
            max: Some(8),
            ..Condition::default()
        };
        assert!(c.fulfilled("hello").is_ok());
        assert!(c.fulfilled("hi").is_err());
    }

    // ------------------------------------------------------------------------
    // Checks individuais
    // ------------------------------------------------------------------------

    #[test]
    fn test_status_code_check() {
        let c = StatusCode { expect: 200 };
        assert!(c.execute(&response(200, b"")).is_ok());
        let err = c.execute(&response(404, b"")).unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_utf8_encoded_check() {
        let c = Utf8Encoded {};
        assert!(c.execute(&response(200, "olá".as_bytes())).is_ok());
        assert!(c.execute(&response(200, &[0xEF, 0xBB, 0xBF, b'x'])).is_err());
        assert!(c.execute(&response(200, &[0xff, 0xfe])).is_err());
    }

    #[test]
    fn test_header_check_present_and_absent() {
        let resp = response_with_header("Content-Type", "application/json");

        let present = HeaderCheck {
            header: "Content-Type".into(),
            absent: false,
            condition: Condition {
                contains: Some("json".into()),
                ..Condition::default()
            },
        };
        assert!(present.execute(&resp).is_ok());

        let absent = HeaderCheck {
            header: "Content-Type".into(),
            absent: true,
            condition: Condition::default(),
        };
        assert!(matches!(
            absent.execute(&resp),
            Err(CheckError::FoundForbidden)
        ));

        let missing = HeaderCheck {
            header: "X-Missing".into(),
            absent: false,
            condition: Condition::default(),
        };
        assert!(matches!(missing.execute(&resp), Err(CheckError::NotFound)));
    }

    #[test]
    fn test_set_cookie_check() {
        let resp = response_with_header("Set-Cookie", "session=abc; Max-Age=7200");

        let ok = SetCookieCheck {
            name: "session".into(),
            value: None,
            min_lifetime_ms: Some(3_600_000),
        };
        assert!(ok.execute(&resp).is_ok());

        let too_short = SetCookieCheck {
            name: "session".into(),
            value: None,
            min_lifetime_ms: Some(8_000_000),
        };
        assert!(too_short.execute(&resp).is_err());

        let missing = SetCookieCheck {
            name: "other".into(),
            value: None,
            min_lifetime_ms: None,
        };
        assert!(matches!(missing.execute(&resp), Err(CheckError::NotFound)));
    }

    #[test]
    fn test_response_time_bounds() {
        let c = ResponseTime { min_ms: 5, max_ms: 50 };
        c.prepare().unwrap();
        assert!(c.execute(&response(200, b"")).is_ok()); // 10ms

        let slow = ResponseTime { min_ms: 0, max_ms: 5 };
        assert!(slow.execute(&response(200, b"")).is_err());

        let contradictory = ResponseTime { min_ms: 50, max_ms: 5 };
        assert!(matches!(
            contradictory.prepare(),
            Err(CheckError::MalformedCheck(_))
        ));
    }

    #[test]
    fn test_json_check_element_and_condition() {
        let body = br#"{"data": {"user": {"id": 42, "active": true}}, "items": [1, 2, 3]}"#;
        let resp = response(200, body);

        let exists = JsonCheck {
            element: "data.user.id".into(),
            ..JsonCheck::default()
        };
        assert!(exists.execute(&resp).is_ok());

        let equals = JsonCheck {
            element: "data.user.id".into(),
            condition: Condition {
                equals: Some("42".into()),
                ..Condition::default()
            },
            ..JsonCheck::default()
        };
        assert!(equals.execute(&resp).is_ok());

        let indexed = JsonCheck {
            element: "items[1]".into(),
            condition: Condition {
                equals: Some("2".into()),
                ..Condition::default()
            },
            ..JsonCheck::default()
        };
        assert!(indexed.execute(&resp).is_ok());

        let boolean = JsonCheck {
            element: "data.user.active".into(),
            ..JsonCheck::default()
        };
        assert!(boolean.execute(&resp).is_ok());

        let missing = JsonCheck {
            element: "data.missing".into(),
            ..JsonCheck::default()
        };
        assert!(matches!(
            missing.execute(&resp),
            Err(CheckError::CantCheck { .. })
        ));
    }

    #[test]
    fn test_json_check_not_json_body() {
        let c = JsonCheck::default();
        let resp = response(200, b"<html>nope</html>");
        assert!(matches!(
            c.execute(&resp),
            Err(CheckError::CantCheck { .. })
        ));
    }

    #[test]
    fn test_json_check_with_schema() {
        let body = br#"{"user": {"id": 1, "name": "Alice"}}"#;
        let resp = response(200, body);

        let c = JsonCheck {
            element: "user".into(),
            schema: Some(serde_json::json!({
                "type": "object",
                "required": ["id", "name"],
                "properties": {
                    "id": {"type": "integer"},
                    "name": {"type": "string"}
                }
            })),
            ..JsonCheck::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp).is_ok());

        let wrong = JsonCheck {
            element: "user".into(),
            schema: Some(serde_json::json!({
                "type": "object",
                "required": ["email"]
            })),
            ..JsonCheck::default()
        };
        assert!(wrong.execute(&resp).is_err());
    }

    #[test]
    fn test_none_composite() {
        let resp = response(404, b"not here");

        // Todos os aninhados reprovam: None passa.
        let mut all_fail = NoneOf {
            of: vec![
                Check::StatusCode(StatusCode { expect: 200 }),
                Check::Body(Body {
                    condition: Condition {
                        contains: Some("welcome".into()),
                        ..Condition::default()
                    },
                }),
            ],
        };
        all_fail.prepare().unwrap();
        assert!(all_fail.execute(&resp).is_ok());

        // Um aninhado passa: None reprova.
        let one_passes = NoneOf {
            of: vec![Check::StatusCode(StatusCode { expect: 404 })],
        };
        assert!(matches!(
            one_passes.execute(&resp),
            Err(CheckError::FoundForbidden)
        ));
    }

    // ------------------------------------------------------------------------
    // Registro e serialização
    // ------------------------------------------------------------------------

    #[test]
    fn test_serialize_carries_discriminator() {
        let check = Check::StatusCode(StatusCode { expect: 200 });
        let v = serde_json::to_value(&check).unwrap();
        assert_eq!(v["Check"], "StatusCode");
        assert_eq!(v["expect"], 200);
    }

    #[test]
    fn test_create_check_unregistered_tag() {
        let err = create_check("NoSuchCheck", serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("unregistered"));
    }

    #[test]
    fn test_registry_has_all_tags() {
        let tags = registered_check_tags();
        for tag in [
            "StatusCode",
            "Body",
            "UTF8Encoded",
            "Header",
            "SetCookie",
            "ResponseTime",
            "HTMLContains",
            "HTMLContainsText",
            "ValidHTML",
            "JSON",
            "Image",
            "None",
        ] {
            assert!(tags.contains(&tag), "missing tag {}", tag);
        }
    }

    #[test]
    fn test_check_round_trip_every_variant() {
        let checks: Vec<Check> = vec![
            Check::StatusCode(StatusCode { expect: 201 }),
            Check::Body(Body {
                condition: Condition {
                    contains: Some("hello".into()),
                    count: 2,
                    ..Condition::default()
                },
            }),
            Check::Utf8Encoded(Utf8Encoded {}),
            Check::Header(HeaderCheck {
                header: "Content-Type".into(),
                absent: false,
                condition: Condition {
                    prefix: Some("text/".into()),
                    ..Condition::default()
                },
            }),
            Check::SetCookie(SetCookieCheck {
                name: "session".into(),
                value: None,
                min_lifetime_ms: Some(60_000),
            }),
            Check::ResponseTime(ResponseTime { min_ms: 0, max_ms: 500 }),
            Check::Json(JsonCheck {
                element: "data.ok".into(),
                ..JsonCheck::default()
            }),
            Check::None(NoneOf {
                of: vec![Check::StatusCode(StatusCode { expect: 500 })],
            }),
        ];

        for check in checks {
            let encoded = serde_json::to_value(&check).unwrap();
            let decoded: Check = serde_json::from_value(encoded.clone()).unwrap();
            // Igualdade módulo caches compilados: compara as formas serializadas.
            let re_encoded = serde_json::to_value(&decoded).unwrap();
            assert_eq!(encoded, re_encoded, "round trip of {}", check.name());
        }
    }

    #[test]
    fn test_nested_none_round_trip() {
        let check = Check::None(NoneOf {
            of: vec![Check::None(NoneOf {
                of: vec![Check::StatusCode(StatusCode { expect: 200 })],
            })],
        });
        let encoded = serde_json::to_value(&check).unwrap();
        let decoded: Check = serde_json::from_value(encoded.clone()).unwrap();
        assert_eq!(encoded, serde_json::to_value(&decoded).unwrap());
    }

    #[test]
    fn test_check_substitution() {
        let mut scope = Scope::new();
        scope.set("GREETING", "Hello");

        let check = Check::Body(Body {
            condition: Condition {
                contains: Some("{{GREETING}} World".into()),
                ..Condition::default()
            },
        });
        let substituted = check.substituted(&scope);
        match substituted {
            Check::Body(b) => assert_eq!(b.condition.contains.as_deref(), Some("Hello World")),
            _ => panic!("variant changed"),
        }
    }
}
