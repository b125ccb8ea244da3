//! # Módulo de Modelo - Estruturas de Dados dos Templates
//!
//! Este módulo define todas as **estruturas de dados** que descrevem
//! um teste HTTP declarativo antes de ele executar: a requisição,
//! o teste com seus checks e extractors, e a suite.
//!
//! ## O que é um template?
//!
//! Um template é **dado inerte**: descreve O QUE fazer, sem fazer nada.
//! O motor transforma templates em requisições concretas na hora de
//! executar, substituindo variáveis `{{nome}}` do escopo.
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! Suite
//! ├── setup:    SuiteElement[]   (preparação, aborta a suite se falhar)
//! ├── main:     SuiteElement[]   (os testes de verdade)
//! └── teardown: SuiteElement[]   (limpeza, roda sempre)
//!     └── Test
//!         ├── Request            (método, URL, params, headers, ...)
//!         ├── Check[]            (validações da resposta)
//!         ├── VarEx              (extrações de variáveis)
//!         ├── Poll               (política de retry)
//!         └── mixins: Test[]     (templates parciais mesclados)
//! ```
//!
//! ## Regras de merge (template × mixins):
//!
//! | Campo               | Regra                                      |
//! |---------------------|--------------------------------------------|
//! | method, body, descr | não-vazios devem concordar                 |
//! | url                 | no máximo um template define               |
//! | headers, params     | merge por chave, o último vence            |
//! | cookies             | merge por nome, o último vence             |
//! | checks              | concatenados em ordem                      |
//! | poll                | máximo componente a componente             |
//! | timeout, verbosity  | máximo                                     |

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::checks::Check;
use crate::errors::PrepareError;
use crate::extract::Extractor;
use crate::scope::Scope;

// ============================================================================
// CONSTANTES E DEFAULTS
// ============================================================================

/// Timeout padrão por requisição: 2 segundos.
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_poll_max() -> i32 {
    1
}

// ============================================================================
// REQUISIÇÃO (TEMPLATE)
// ============================================================================

/// Onde os parâmetros da requisição são colocados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamsAs {
    /// Percent-encoded e anexados à URL como query string (padrão).
    #[default]
    Url,
    /// Enviados como corpo `application/x-www-form-urlencoded`.
    Body,
    /// Enviados como corpo `multipart/form-data`; valores `@file:<path>`
    /// viram partes de arquivo.
    Multipart,
}

impl ParamsAs {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamsAs::Url => "url",
            ParamsAs::Body => "body",
            ParamsAs::Multipart => "multipart",
        }
    }
}

/// Um parâmetro nomeado com um ou mais valores, em ordem de declaração.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<String>,
}

/// Um cookie enviado com a requisição.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieValue {
    pub name: String,
    pub value: String,
}

/// Descrição inerte de uma chamada HTTP.
///
/// O método vazio equivale a GET (aplicado na construção da requisição
/// concreta, não no template, para que o merge saiba distinguir "não
/// definido" de "definido como GET").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub params: Vec<Parameter>,
    pub params_as: ParamsAs,
    pub headers: BTreeMap<String, Vec<String>>,
    pub cookies: Vec<CookieValue>,
    pub body: String,
    pub follow_redirects: bool,
}

impl Request {
    /// Clone com variáveis do escopo substituídas em URL, valores de
    /// parâmetros, valores de headers, valores de cookies e corpo.
    /// O template original nunca é mutado.
    pub fn substituted(&self, scope: &Scope) -> Request {
        Request {
            method: self.method.clone(),
            url: scope.replace_in(&self.url),
            params: self
                .params
                .iter()
                .map(|p| Parameter {
                    name: p.name.clone(),
                    values: p.values.iter().map(|v| scope.replace_in(v)).collect(),
                })
                .collect(),
            params_as: self.params_as,
            headers: self
                .headers
                .iter()
                .map(|(k, vs)| {
                    (
                        k.clone(),
                        vs.iter().map(|v| scope.replace_in(v)).collect(),
                    )
                })
                .collect(),
            cookies: self
                .cookies
                .iter()
                .map(|c| CookieValue {
                    name: c.name.clone(),
                    value: scope.replace_in(&c.value),
                })
                .collect(),
            body: scope.replace_in(&self.body),
            follow_redirects: self.follow_redirects,
        }
    }

    /// Todas as strings do template, para resolução de now-expressions.
    pub fn texts(&self) -> Vec<&str> {
        let mut out = vec![self.url.as_str(), self.body.as_str()];
        for p in &self.params {
            out.extend(p.values.iter().map(|v| v.as_str()));
        }
        for vs in self.headers.values() {
            out.extend(vs.iter().map(|v| v.as_str()));
        }
        for c in &self.cookies {
            out.push(c.value.as_str());
        }
        out
    }
}

// ============================================================================
// POLLING
// ============================================================================

/// Política de retry de um teste.
///
/// O teste passa assim que QUALQUER tentativa passar (tolerância a
/// consistência eventual).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Poll {
    /// Total de tentativas, incluindo a primeira. 0 equivale a 1;
    /// negativo marca o teste como Skipped sem executar.
    pub max: i32,

    /// Pausa entre tentativas que falharam, em milissegundos.
    pub sleep_ms: u64,
}

impl Default for Poll {
    fn default() -> Self {
        Poll {
            max: default_poll_max(),
            sleep_ms: 0,
        }
    }
}

impl Poll {
    /// Teste marcado para ser pulado inteiramente.
    pub fn skip(&self) -> bool {
        self.max < 0
    }

    /// Número efetivo de tentativas.
    pub fn tries(&self) -> u32 {
        self.max.max(1) as u32
    }
}

// ============================================================================
// TESTE (TEMPLATE)
// ============================================================================

/// Um teste declarativo: requisição + checks + extrações.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Test {
    pub name: String,
    pub description: String,
    pub request: Request,

    /// Checks avaliados contra a resposta, na ordem declarada.
    pub checks: Vec<Check>,

    /// Extrações: nome da variável → extractor.
    pub var_ex: BTreeMap<String, Extractor>,

    /// Defaults de variáveis locais do teste (camada mais interna
    /// do escopo).
    pub variables: HashMap<String, String>,

    /// Templates parciais mesclados neste teste na preparação.
    pub mixins: Vec<Test>,

    pub poll: Poll,

    /// Timeout por requisição, em milissegundos.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    pub verbosity: i32,
}

impl Default for Test {
    fn default() -> Test {
        Test {
            name: String::new(),
            description: String::new(),
            request: Request::default(),
            checks: Vec::new(),
            var_ex: BTreeMap::new(),
            variables: HashMap::new(),
            mixins: Vec::new(),
            poll: Poll::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            verbosity: 0,
        }
    }
}

impl Test {
    /// Aplica os mixins e devolve o teste consolidado.
    ///
    /// Falha de merge é erro de preparação (o teste vira Bogus).
    pub fn merged(&self) -> Result<Test, PrepareError> {
        if self.mixins.is_empty() {
            return Ok(self.clone());
        }
        let mut inputs: Vec<&Test> = vec![self];
        inputs.extend(self.mixins.iter());
        merge_tests(&inputs)
    }

    /// Clone com variáveis substituídas na requisição, nos checks e
    /// nos extractors. O template original nunca é mutado.
    pub fn substituted(&self, scope: &Scope) -> Test {
        Test {
            name: self.name.clone(),
            description: self.description.clone(),
            request: self.request.substituted(scope),
            checks: self.checks.iter().map(|c| c.substituted(scope)).collect(),
            var_ex: self
                .var_ex
                .iter()
                .map(|(k, e)| (k.clone(), e.substituted(scope)))
                .collect(),
            variables: self.variables.clone(),
            mixins: Vec::new(),
            poll: self.poll,
            timeout_ms: self.timeout_ms,
            verbosity: self.verbosity,
        }
    }
}

// ============================================================================
// MERGE DE TESTES
// ============================================================================

/// Mescla campos escalares string: todos os não-vazios devem concordar.
fn merge_scalar(field: &'static str, values: &[&str]) -> Result<String, PrepareError> {
    let mut result = "";
    for v in values {
        if v.is_empty() {
            continue;
        }
        if result.is_empty() {
            result = v;
        } else if result != *v {
            return Err(PrepareError::MergeConflict {
                field,
                a: result.to_string(),
                b: v.to_string(),
            });
        }
    }
    Ok(result.to_string())
}

/// Mescla uma lista de testes em um só, conforme as regras do módulo.
pub fn merge_tests(tests: &[&Test]) -> Result<Test, PrepareError> {
    let first = tests.first().expect("merge needs at least one test");
    let mut out = Test {
        name: first.name.clone(),
        // Zerado para que o máximo reflita só os inputs; o default
        // entra no fim quando ninguém definiu.
        timeout_ms: 0,
        ..Test::default()
    };

    // Campos escalares: não-vazios devem concordar.
    out.description = merge_scalar(
        "description",
        &tests.iter().map(|t| t.description.as_str()).collect::<Vec<_>>(),
    )?;
    out.request.method = merge_scalar(
        "method",
        &tests.iter().map(|t| t.request.method.as_str()).collect::<Vec<_>>(),
    )?;
    out.request.body = merge_scalar(
        "body",
        &tests.iter().map(|t| t.request.body.as_str()).collect::<Vec<_>>(),
    )?;

    // URL: no máximo um template define.
    for t in tests {
        if t.request.url.is_empty() {
            continue;
        }
        if !out.request.url.is_empty() {
            return Err(PrepareError::UrlConflict);
        }
        out.request.url = t.request.url.clone();
    }

    // Placement dos parâmetros: valores não-padrão devem concordar.
    for t in tests {
        if t.request.params_as == ParamsAs::default() {
            continue;
        }
        if out.request.params_as != ParamsAs::default()
            && out.request.params_as != t.request.params_as
        {
            return Err(PrepareError::MergeConflict {
                field: "params_as",
                a: out.request.params_as.as_str().to_string(),
                b: t.request.params_as.as_str().to_string(),
            });
        }
        out.request.params_as = t.request.params_as;
    }

    for t in tests {
        // Headers e var_ex: merge por chave, o último vence.
        for (k, vs) in &t.request.headers {
            out.request.headers.insert(k.clone(), vs.clone());
        }
        for (k, e) in &t.var_ex {
            out.var_ex.insert(k.clone(), e.clone());
        }
        for (k, v) in &t.variables {
            out.variables.insert(k.clone(), v.clone());
        }

        // Params e cookies: merge por nome preservando a posição da
        // primeira ocorrência, valor da última.
        for p in &t.request.params {
            match out.request.params.iter_mut().find(|q| q.name == p.name) {
                Some(q) => q.values = p.values.clone(),
                None => out.request.params.push(p.clone()),
            }
        }
        for c in &t.request.cookies {
            match out.request.cookies.iter_mut().find(|d| d.name == c.name) {
                Some(d) => d.value = c.value.clone(),
                None => out.request.cookies.push(c.clone()),
            }
        }

        // Checks: concatenados em ordem.
        out.checks.extend(t.checks.iter().cloned());

        // Máximos componente a componente.
        out.poll.max = out.poll.max.max(t.poll.max);
        out.poll.sleep_ms = out.poll.sleep_ms.max(t.poll.sleep_ms);
        out.timeout_ms = out.timeout_ms.max(t.timeout_ms);
        out.verbosity = out.verbosity.max(t.verbosity);

        out.request.follow_redirects = out.request.follow_redirects || t.request.follow_redirects;
    }

    if out.timeout_ms == 0 {
        out.timeout_ms = DEFAULT_TIMEOUT_MS;
    }
    Ok(out)
}

// ============================================================================
// SUITE (TEMPLATE)
// ============================================================================

/// Um elemento de suite: referência a arquivo ou teste inline, com
/// overrides de variáveis do ponto de chamada.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteElement {
    /// Caminho do arquivo do teste; o decoder resolve para `test`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Template do teste, inline ou resolvido pelo decoder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<Test>,

    /// Variáveis do ponto de chamada (dominam os defaults do teste).
    pub variables: HashMap<String, String>,
}

impl SuiteElement {
    pub fn from_test(test: Test) -> SuiteElement {
        SuiteElement {
            file: None,
            test: Some(test),
            variables: HashMap::new(),
        }
    }

    /// Nome para relatórios, mesmo quando o teste não foi resolvido.
    pub fn display_name(&self) -> String {
        match (&self.test, &self.file) {
            (Some(t), _) => t.name.clone(),
            (None, Some(f)) => f.clone(),
            (None, None) => "<empty element>".to_string(),
        }
    }
}

/// Uma suite: três listas ordenadas de elementos, cookies e defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Suite {
    pub name: String,
    pub description: String,

    /// Testes de preparação; uma falha pula o restante de setup+main.
    pub setup: Vec<SuiteElement>,

    /// Os testes principais.
    pub main: Vec<SuiteElement>,

    /// Limpeza; roda sempre, mesmo com setup quebrado.
    pub teardown: Vec<SuiteElement>,

    /// Com true, todos os testes compartilham um cookie jar; com false,
    /// cada teste usa um jar isolado.
    pub keep_cookies: bool,

    /// Com true, a lista de checks de cada teste é limpa antes de
    /// executar (modo usado pelo gerador de carga).
    pub omit_checks: bool,

    /// Defaults de variáveis da suite.
    pub variables: HashMap<String, String>,

    pub verbosity: i32,
}

// ============================================================================
// TESTES
// ============================================================================
