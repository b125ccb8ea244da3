//! # apiprobe - Motor de Testes HTTP Declarativos e Geração de Carga
//!
//! Este crate executa testes HTTP descritos como **dados**: um template
//! de requisição com checks (asserções) e extractors (captura de
//! variáveis), organizado em suites com setup/main/teardown, e, no
//! modo de carga, cenários ponderados gerando uma taxa alvo de
//! requisições com chegadas de Poisson.
//!
//! ## O que este crate faz?
//!
//! 1. **Constrói requisições** a partir de templates com substituição
//!    de variáveis `{{nome}}`, auto-variáveis e now-expressions
//! 2. **Executa testes** com retry (polling), redirects, cookie jars e
//!    pool de clientes por timeout
//! 3. **Sequencia suites** propagando variáveis extraídas de um teste
//!    para os seguintes
//! 4. **Gera carga** com cenários ponderados, pools elásticos de
//!    workers e gravação CSV de cada requisição
//!
//! ## Arquitetura:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            lib.rs                                │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!    ┌──────────┐          ┌──────────┐           ┌──────────┐
//!    │  model/  │          │ runner/  │           │  load/   │
//!    │ checks/  │          │ suite/   │           │ (pools,  │
//!    │ extract/ │          │ (executa)│           │  taxa,   │
//!    │ (dados)  │          │          │           │  CSV)    │
//!    └──────────┘          └──────────┘           └──────────┘
//! ```
//!
//! ## Exemplo de uso:
//!
//! ```ignore
//! use apiprobe::{loader, scope::Scope, suite};
//!
//! let s = loader::load_suite_from_file("smoke.suite.json")?;
//! let result = suite::run_suite(&s, &Scope::new(), None).await;
//! assert_eq!(result.status, apiprobe::report::Status::Pass);
//! ```

/// Módulo de checks: asserções polimórficas avaliadas contra respostas.
pub mod checks;

/// Módulo de clientes: pool de clientes HTTP por (timeout, redirect).
pub mod client;

/// Módulo de erros: taxonomia propagada uniformemente pelo motor.
pub mod errors;

/// Módulo de extração: captura de variáveis das respostas.
pub mod extract;

/// Módulo de carga: controlador de throughput com cenários ponderados.
pub mod load;

/// Módulo de carregamento: lê templates JSON do disco.
pub mod loader;

/// Módulo de modelo: templates de requisição, teste e suite.
pub mod model;

/// Módulo de relatório: status, resultados e resposta capturada.
pub mod report;

/// Módulo de requisição: template + escopo → requisição concreta.
pub mod request;

/// Módulo runner: executa um teste com polling.
pub mod runner;

/// Módulo de escopo: variáveis, substituição e auto-variáveis.
pub mod scope;

/// Módulo de suite: sequenciamento setup/main/teardown.
pub mod suite;

/// Módulo de telemetria: integração OpenTelemetry.
pub mod telemetry;

pub use checks::Check;
pub use errors::{CheckError, ExtractionError, LoadError, PrepareError};
pub use extract::Extractor;
pub use load::{run_load_test, LoadResult, LoadTest, Scenario};
pub use model::{Poll, Request, Suite, SuiteElement, Test};
pub use report::{CheckResult, Status, SuiteResult, TestResult};
pub use runner::run_test;
pub use scope::Scope;
pub use suite::{run_suite, run_suite_with, Phases, TestExecutor};
