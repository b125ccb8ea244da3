//! # Módulo de Suite - Sequenciamento de Testes
//!
//! Executa uma suite: caminha pelas listas ordenadas de setup, main e
//! teardown, montando o escopo de cada teste, propagando extrações e
//! compartilhando (ou isolando) o cookie jar.
//!
//! ## Camadas de escopo:
//!
//! ```text
//! global  (do chamador; nunca mutado)
//!   └── suite  (global + auto-vars + defaults da suite; recebe extrações)
//!         └── call   (suite + auto-vars + overrides do ponto de chamada)
//!               └── test  (call + defaults do teste; nunca volta pra cima)
//! ```
//!
//! Escopos externos dominam: um default interno NUNCA sobrescreve um
//! valor que já veio de fora.
//!
//! ## Regra de abort do setup:
//!
//! Um único teste de setup com status pior que Pass pula todo o
//! restante de setup e main. O teardown roda incondicionalmente.
//!
//! ## Propagação de extrações:
//!
//! Quando um teste PASSA, suas variáveis extraídas entram no escopo da
//! suite ANTES do próximo teste montar o dele; testes posteriores veem
//! todas as extrações anteriores. Colisões sobrescrevem.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::cookie::Jar;
use tracing::{debug, info};

use crate::client::ClientPool;
use crate::model::{Suite, Test};
use crate::report::{Status, SuiteResult, TestResult};
use crate::runner;
use crate::scope::Scope;

// ============================================================================
// SEAM DE EXECUÇÃO
// ============================================================================

/// Contrato de execução de um teste dentro da suite.
///
/// O sequenciador não sabe COMO um teste executa: o executor padrão
/// chama o runner diretamente; o gerador de carga instala um executor
/// que despacha o teste para o pool do cenário e espera o sinal de
/// conclusão.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(&self, test: &Test, scope: &Scope, pool: &ClientPool) -> TestResult;
}

/// Executor padrão: roda o teste no próprio caller.
pub struct DirectExecutor;

#[async_trait]
impl TestExecutor for DirectExecutor {
    async fn execute(&self, test: &Test, scope: &Scope, pool: &ClientPool) -> TestResult {
        runner::run_test(test, scope, pool).await
    }
}

// ============================================================================
// FASES
// ============================================================================

/// Seleção de fases a executar (o gerador de carga fatia a suite).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub setup: bool,
    pub main: bool,
    pub teardown: bool,
}

impl Phases {
    pub const ALL: Phases = Phases {
        setup: true,
        main: true,
        teardown: true,
    };
    pub const SETUP: Phases = Phases {
        setup: true,
        main: false,
        teardown: false,
    };
    pub const MAIN: Phases = Phases {
        setup: false,
        main: true,
        teardown: false,
    };
    pub const TEARDOWN: Phases = Phases {
        setup: false,
        main: false,
        teardown: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Setup,
    Main,
    Teardown,
}

// ============================================================================
// EXECUÇÃO DA SUITE
// ============================================================================

/// Executa a suite inteira com o executor padrão.
///
/// `jar` é o cookie jar externo a usar quando KeepCookies está ativo;
/// com None, um jar novo é criado (KeepCookies) ou cada teste fica com
/// um jar isolado (sem KeepCookies).
pub async fn run_suite(suite: &Suite, global: &Scope, jar: Option<Arc<Jar>>) -> SuiteResult {
    run_suite_with(suite, global, jar, &DirectExecutor, Phases::ALL).await
}

/// Variante completa: executor substituível e fatiamento de fases.
/// Retorna também o escopo final para o chamador reaproveitar
/// (o gerador de carga alimenta os workers com ele).
pub async fn run_suite_with(
    suite: &Suite,
    global: &Scope,
    jar: Option<Arc<Jar>>,
    executor: &dyn TestExecutor,
    phases: Phases,
) -> SuiteResult {
    let started = Utc::now();
    let timer = Instant::now();

    // Escopo da suite: global + auto-vars + defaults com substituição.
    let mut suite_scope = Scope::merge(global, &suite.variables, true);

    // KeepCookies: um jar e um pool para a suite inteira.
    let shared_pool = if suite.keep_cookies {
        let jar = jar.unwrap_or_default();
        Some(Arc::new(ClientPool::with_jar(jar)))
    } else {
        None
    };

    info!(suite = %suite.name, keep_cookies = suite.keep_cookies, "running suite");

    let mut elements: Vec<(Phase, &crate::model::SuiteElement)> = Vec::new();
    if phases.setup {
        elements.extend(suite.setup.iter().map(|e| (Phase::Setup, e)));
    }
    if phases.main {
        elements.extend(suite.main.iter().map(|e| (Phase::Main, e)));
    }
    if phases.teardown {
        elements.extend(suite.teardown.iter().map(|e| (Phase::Teardown, e)));
    }

    let mut results: Vec<(Phase, TestResult)> = Vec::new();
    let mut skip_remaining = false;

    for (phase, element) in elements {
        let name = element.display_name();

        // Elemento sem teste resolvido é Bogus (o decoder deveria ter
        // resolvido a referência de arquivo).
        let template = match &element.test {
            Some(t) => t,
            None => {
                let mut r = TestResult::shell(&name, "", Vec::new());
                r.status = Status::Bogus;
                r.error = Some(
                    crate::errors::PrepareError::UnresolvedElement(name.clone()).to_string(),
                );
                if phase == Phase::Setup {
                    skip_remaining = true;
                }
                results.push((phase, r));
                continue;
            }
        };

        // Setup quebrado pula o restante de setup e main; teardown roda.
        if skip_remaining && phase != Phase::Teardown {
            let mut r = TestResult::shell(&template.name, &template.description, Vec::new());
            r.status = Status::Skipped;
            results.push((phase, r));
            continue;
        }

        // Merge dos mixins antes do OmitChecks, para limpar também os
        // checks vindos de mixins.
        let mut test = match template.merged() {
            Ok(t) => t,
            Err(e) => {
                let mut r = TestResult::shell(&template.name, &template.description, Vec::new());
                r.status = Status::Bogus;
                r.error = Some(e.to_string());
                if phase == Phase::Setup {
                    skip_remaining = true;
                }
                results.push((phase, r));
                continue;
            }
        };
        if suite.omit_checks {
            test.checks.clear();
        }

        // Escopo do teste: call (com auto-vars novos) + defaults do
        // teste (sem auto-vars novos).
        let call_scope = Scope::merge(&suite_scope, &element.variables, true);
        let test_scope = Scope::merge(&call_scope, &test.variables, false);

        let fresh_pool;
        let pool: &ClientPool = match &shared_pool {
            Some(p) => p.as_ref(),
            None => {
                fresh_pool = ClientPool::new();
                &fresh_pool
            }
        };

        let result = executor.execute(&test, &test_scope, pool).await;
        debug!(test = %result.name, status = %result.status, "test finished");

        if phase == Phase::Setup && result.status > Status::Pass {
            skip_remaining = true;
        }

        // Extrações sobem para o escopo da suite apenas em Pass.
        if result.status == Status::Pass {
            for (k, v) in &result.extractions {
                suite_scope.set(k.clone(), v.clone());
            }
        }

        results.push((phase, result));
    }

    // Status geral: pior entre setup+main; teardown quebrado só agrava
    // para Bogus, nunca para Fail ou Error.
    let primary = Status::worst(
        results
            .iter()
            .filter(|(p, _)| *p != Phase::Teardown)
            .map(|(_, r)| r.status),
    );
    let teardown_broken = results
        .iter()
        .any(|(p, r)| *p == Phase::Teardown && r.status > Status::Pass);
    let status = if teardown_broken { Status::Bogus } else { primary };

    info!(suite = %suite.name, status = %status, "suite finished");

    SuiteResult {
        name: suite.name.clone(),
        description: suite.description.clone(),
        status,
        started,
        full_duration_ms: timer.elapsed().as_secs_f64() * 1_000.0,
        tests: results.into_iter().map(|(_, r)| r).collect(),
        variables: suite_scope.into_variables(),
        jar: shared_pool.map(|p| p.jar()),
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{Check, StatusCode};
    use crate::extract::{Extractor, SetVariable};
    use crate::model::{Request, SuiteElement};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn get_test(name: &str, url: String) -> Test {
        Test {
            name: name.to_string(),
            request: Request {
                url,
                ..Request::default()
            },
            checks: vec![Check::StatusCode(StatusCode { expect: 200 })],
            ..Test::default()
        }
    }

    /// Executor que grava os escopos recebidos e devolve Pass.
    struct RecordingExecutor {
        scopes: Mutex<Vec<Scope>>,
    }

    #[async_trait]
    impl TestExecutor for RecordingExecutor {
        async fn execute(&self, test: &Test, scope: &Scope, _pool: &ClientPool) -> TestResult {
            self.scopes.lock().unwrap().push(scope.clone());
            let mut r = TestResult::shell(&test.name, &test.description, Vec::new());
            r.status = Status::Pass;
            r
        }
    }

    // ------------------------------------------------------------------------
    // Dominância de escopo
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_scope_dominance_across_layers() {
        let mut global = Scope::new();
        global.set("D", "global");

        let mut test = Test {
            name: "layered".to_string(),
            ..Test::default()
        };
        test.variables = vars(&[("A", "local"), ("B", "local"), ("C", "local"), ("D", "local")]);

        let suite = Suite {
            name: "dominance".to_string(),
            variables: vars(&[("C", "suite"), ("D", "suite")]),
            main: vec![SuiteElement {
                file: None,
                test: Some(test),
                variables: vars(&[("B", "call"), ("C", "call"), ("D", "call")]),
            }],
            ..Suite::default()
        };

        let executor = RecordingExecutor {
            scopes: Mutex::new(Vec::new()),
        };
        let result = run_suite_with(&suite, &global, None, &executor, Phases::ALL).await;
        assert_eq!(result.status, Status::Pass);

        let scopes = executor.scopes.lock().unwrap();
        let scope = &scopes[0];
        assert_eq!(scope.get("A"), Some("local"));
        assert_eq!(scope.get("B"), Some("call"));
        assert_eq!(scope.get("C"), Some("suite"));
        assert_eq!(scope.get("D"), Some("global"));
        // Auto-vars presentes na camada de chamada.
        assert!(scope.get("COUNTER").is_some());
        assert!(scope.get("RANDOM").is_some());
    }

    // ------------------------------------------------------------------------
    // Propagação de extrações
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_extraction_feeds_next_test() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/first"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/second/v"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut first = get_test("first", format!("{}/first", server.uri()));
        first.var_ex.insert(
            "X".to_string(),
            Extractor::SetVariable(SetVariable { to: "v".to_string() }),
        );
        let second = get_test("second", format!("{}/second/{{{{X}}}}", server.uri()));

        let suite = Suite {
            name: "extraction".to_string(),
            main: vec![SuiteElement::from_test(first), SuiteElement::from_test(second)],
            ..Suite::default()
        };

        let result = run_suite(&suite, &Scope::new(), None).await;
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.variables.get("X").map(String::as_str), Some("v"));

        // A URL emitida do segundo teste contém o valor extraído.
        let issued = result.tests[1].request.as_ref().unwrap();
        assert!(issued.url.ends_with("/second/v"));
    }

    // ------------------------------------------------------------------------
    // Abort de setup e teardown incondicional
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_setup_failure_skips_rest_but_runs_teardown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let suite = Suite {
            name: "abort".to_string(),
            setup: vec![
                SuiteElement::from_test(get_test("setup-bad", format!("{}/broken", server.uri()))),
                SuiteElement::from_test(get_test("setup-after", server.uri())),
            ],
            main: vec![SuiteElement::from_test(get_test("main-1", server.uri()))],
            teardown: vec![SuiteElement::from_test(get_test("teardown-1", server.uri()))],
            ..Suite::default()
        };

        let result = run_suite(&suite, &Scope::new(), None).await;

        assert_eq!(result.tests[0].status, Status::Fail);
        assert_eq!(result.tests[1].status, Status::Skipped);
        assert_eq!(result.tests[2].status, Status::Skipped);
        // Teardown rodou de verdade.
        assert_eq!(result.tests[3].status, Status::Pass);
        assert_eq!(result.status, Status::Fail);
    }

    #[tokio::test]
    async fn test_broken_teardown_upgrades_to_bogus() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let suite = Suite {
            name: "teardown-bogus".to_string(),
            main: vec![SuiteElement::from_test(get_test("ok", format!("{}/ok", server.uri())))],
            teardown: vec![SuiteElement::from_test(get_test(
                "cleanup",
                format!("{}/broken", server.uri()),
            ))],
            ..Suite::default()
        };

        let result = run_suite(&suite, &Scope::new(), None).await;
        // main passou; teardown quebrado agrava para Bogus, não para Fail.
        assert_eq!(result.tests[0].status, Status::Pass);
        assert_eq!(result.status, Status::Bogus);
    }

    // ------------------------------------------------------------------------
    // Cookies
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_keep_cookies_shares_jar_between_tests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Set-Cookie", "session=abc; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        // Sem o cookie, /me responde 403.
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let suite = Suite {
            name: "cookies".to_string(),
            keep_cookies: true,
            main: vec![
                SuiteElement::from_test(get_test("login", format!("{}/login", server.uri()))),
                SuiteElement::from_test(get_test("me", format!("{}/me", server.uri()))),
            ],
            ..Suite::default()
        };

        let result = run_suite(&suite, &Scope::new(), None).await;
        assert_eq!(result.status, Status::Pass, "second test must send the jar cookie");
        assert!(result.jar.is_some());
    }

    #[tokio::test]
    async fn test_isolated_jars_without_keep_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Set-Cookie", "session=abc; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let mut me = get_test("me", format!("{}/me", server.uri()));
        me.checks = vec![Check::StatusCode(StatusCode { expect: 403 })];

        let suite = Suite {
            name: "isolated".to_string(),
            keep_cookies: false,
            main: vec![
                SuiteElement::from_test(get_test("login", format!("{}/login", server.uri()))),
                SuiteElement::from_test(me),
            ],
            ..Suite::default()
        };

        let result = run_suite(&suite, &Scope::new(), None).await;
        assert_eq!(result.status, Status::Pass, "cookie must NOT leak between tests");
        assert!(result.jar.is_none());
    }

    // ------------------------------------------------------------------------
    // OmitChecks e fatiamento de fases
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_omit_checks_clears_check_lists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        // O check de status reprovaria; com omit_checks o teste passa.
        let suite = Suite {
            name: "omit".to_string(),
            omit_checks: true,
            main: vec![SuiteElement::from_test(get_test("would-fail", server.uri()))],
            ..Suite::default()
        };

        let result = run_suite(&suite, &Scope::new(), None).await;
        assert_eq!(result.status, Status::Pass);
        assert!(result.tests[0].checks.is_empty());
    }

    #[tokio::test]
    async fn test_phase_slicing_runs_only_selected_phase() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let suite = Suite {
            name: "slicing".to_string(),
            setup: vec![SuiteElement::from_test(get_test("setup", server.uri()))],
            main: vec![SuiteElement::from_test(get_test("main", server.uri()))],
            teardown: vec![SuiteElement::from_test(get_test("teardown", server.uri()))],
            ..Suite::default()
        };

        let result =
            run_suite_with(&suite, &Scope::new(), None, &DirectExecutor, Phases::SETUP).await;
        assert_eq!(result.tests.len(), 1);
        assert_eq!(result.tests[0].name, "setup");
    }
}
