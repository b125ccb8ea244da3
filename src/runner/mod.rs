//! # Módulo Runner - Execução de Um Teste
//!
//! Este é o coração do motor. Ele executa UM teste: constrói a
//! requisição concreta, envia, avalia os checks e roda os extractors,
//! com retry conforme a política de polling.
//!
//! ## Fluxo de execução:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         run_test()                               │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             │
//!    ┌────────────────────────┼───────────────────────────────┐
//!    ▼                        ▼                               ▼
//! ┌──────────┐          ┌──────────┐                   ┌──────────┐
//! │ 1. Merge │          │ 2. Loop  │                   │ 3. Extrai│
//! │  mixins  │    →     │ de tries │         →         │ variáveis│
//! │          │          │ (request │                   │ (última  │
//! │          │          │ + checks)│                   │ resposta)│
//! └──────────┘          └──────────┘                   └──────────┘
//! ```
//!
//! ## Semântica de polling:
//!
//! A intenção é tolerar consistência eventual: o teste passa assim que
//! QUALQUER tentativa passar. Cada tentativa re-substitui as variáveis
//! (o relógio das now-expressions anda) e re-compila os checks. O
//! resultado final reflete apenas a última tentativa; o contador de
//! tries e a duração total cobrem todas.
//!
//! ## Curto-circuito de status:
//!
//! Quando o PRIMEIRO check é `StatusCode{expect: 200}` e reprova, os
//! checks seguintes são marcados Skipped sem executar. Um 404 numa
//! página de erro tornaria os checks de conteúdo apenas ruído.

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Instant;

use chrono::Utc;
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::checks::Check;
use crate::client::ClientPool;
use crate::model::Test;
use crate::report::{CheckResult, Response, Status, TestResult};
use crate::request::{self, BuiltRequest};
use crate::scope::Scope;
use crate::telemetry::instrumentation::TestSpanContext;

// ============================================================================
// EXECUÇÃO DE UM TESTE
// ============================================================================

/// Executa um teste completo contra o escopo e o pool de clientes dados.
///
/// Nunca retorna Err: toda falha vira status no `TestResult` (Bogus
/// para template malformado, Error para falha de transporte, Fail
/// para check reprovado).
#[tracing::instrument(
    name = "run_test",
    skip_all,
    fields(
        test.name = %test.name,
        test.attempt = tracing::field::Empty,
        http.method = tracing::field::Empty,
        http.url = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
        http.duration_ms = tracing::field::Empty
    )
)]
pub async fn run_test(test: &Test, scope: &Scope, pool: &ClientPool) -> TestResult {
    // ========================================================================
    // PASSO 1: MERGE DOS MIXINS
    // ========================================================================

    let merged = match test.merged() {
        Ok(t) => t,
        Err(e) => {
            let mut result = TestResult::shell(&test.name, &test.description, Vec::new());
            result.status = Status::Bogus;
            result.error = Some(e.to_string());
            return result;
        }
    };

    let mut result = TestResult::shell(&merged.name, &merged.description, check_slots(&merged.checks));

    // Polling negativo marca o teste como pulado, sem executar nada.
    if merged.poll.skip() {
        result.status = Status::Skipped;
        for slot in &mut result.checks {
            slot.status = Status::Skipped;
        }
        return result;
    }

    // ========================================================================
    // PASSO 2: LOOP DE TENTATIVAS
    // ========================================================================

    let max_tries = merged.poll.tries();
    let full_timer = Instant::now();
    result.started = Utc::now();

    let mut last_substituted: Option<Test> = None;

    for current_try in 1..=max_tries {
        result.tries = current_try;
        result.error = None;

        if current_try > 1 {
            tokio::time::sleep(std::time::Duration::from_millis(merged.poll.sleep_ms)).await;
        }

        // Substituição contra o escopo resolvido NESTA tentativa: as
        // now-expressions acompanham o relógio de parede.
        let mut try_scope = scope.clone();
        try_scope.resolve_now(merged.request.texts(), Utc::now());
        let substituted = merged.substituted(&try_scope);

        // Requisição concreta. Falha aqui é Bogus e não há retry que ajude.
        let built = match request::build(&substituted.request, substituted.timeout_ms) {
            Ok(b) => b,
            Err(e) => {
                result.status = Status::Bogus;
                result.error = Some(e.to_string());
                result.full_duration_ms = ms(full_timer.elapsed());
                return result;
            }
        };

        // Re-compila todos os checks. MalformedCheck promove o teste a
        // Bogus antes da requisição ser enviada.
        let mut checks = substituted.checks.clone();
        let mut malformed = false;
        for (i, check) in checks.iter_mut().enumerate() {
            if let Err(e) = check.prepare() {
                result.checks[i].status = e.status();
                result.checks[i].error = Some(e.to_string());
                result.status = Status::Bogus;
                result.error = Some(e.to_string());
                malformed = true;
            }
        }
        if malformed {
            result.full_duration_ms = ms(full_timer.elapsed());
            return result;
        }

        last_substituted = Some(substituted);
        result.request = Some(built.clone());

        let mut span_ctx =
            TestSpanContext::new(&built.method, &built.url, &merged.name, current_try);

        // Envia e lê a resposta inteira.
        match send(pool, &built).await {
            Err(message) => {
                // Erro de rede/transporte: checks nem rodam.
                warn!(error = %message, "request failed");
                result.status = Status::Error;
                result.error = Some(message);
                result.response = None;
                for slot in &mut result.checks {
                    slot.status = Status::Skipped;
                    slot.error = None;
                }
                result.request_duration_ms = 0.0;
            }
            Ok(response) => {
                span_ctx.finish(response.status);
                result.request_duration_ms = response.duration_ms;
                debug!(
                    status = response.status,
                    duration_ms = response.duration_ms,
                    "response received"
                );

                run_checks(&checks, &response, &mut result);
                result.response = Some(response);
                result.status = Status::worst(result.checks.iter().map(|c| c.status));
            }
        }

        // Atributos da tentativa no span; a última tentativa fica
        // registrada.
        let span = tracing::Span::current();
        for (name, value) in span_ctx.attributes() {
            span.record(name, value.as_str());
        }

        if result.status == Status::Pass {
            break;
        }
    }

    result.full_duration_ms = ms(full_timer.elapsed());

    // ========================================================================
    // PASSO 3: EXTRAÇÕES CONTRA A ÚLTIMA RESPOSTA
    // ========================================================================
    // Erros de extração são registrados mas nunca rebaixam um Pass.

    if let (Some(substituted), Some(response)) = (&last_substituted, &result.response) {
        for (name, extractor) in &substituted.var_ex {
            match extractor.extract(response) {
                Ok(value) => {
                    debug!(variable = %name, value = %value, "extraction succeeded");
                    result.extractions.insert(name.clone(), value);
                }
                Err(e) => {
                    warn!(variable = %name, error = %e, "extraction failed");
                    result.extraction_errors.insert(name.clone(), e.to_string());
                }
            }
        }
    }

    result
}

// ============================================================================
// AVALIAÇÃO DOS CHECKS
// ============================================================================

/// Roda os checks em ordem, aplicando a política de curto-circuito.
fn run_checks(checks: &[Check], response: &Response, result: &mut TestResult) {
    let mut skip_rest = false;

    for (i, check) in checks.iter().enumerate() {
        let slot = &mut result.checks[i];
        if skip_rest {
            slot.status = Status::Skipped;
            slot.error = None;
            continue;
        }

        let timer = Instant::now();
        match check.execute(response) {
            Ok(()) => {
                slot.status = Status::Pass;
                slot.error = None;
            }
            Err(e) => {
                slot.status = e.status();
                slot.error = Some(e.to_string());
            }
        }
        slot.duration_ms = ms(timer.elapsed());

        // Curto-circuito: primeiro check StatusCode{200} reprovado
        // torna os demais ruído.
        if i == 0 && slot.status != Status::Pass {
            if let Check::StatusCode(sc) = check {
                if sc.expect == 200 {
                    skip_rest = true;
                }
            }
        }
    }
}

/// Slots NotRun, um por check, com a forma serializada para o relatório.
fn check_slots(checks: &[Check]) -> Vec<CheckResult> {
    checks
        .iter()
        .map(|check| CheckResult {
            name: check.name().to_string(),
            check: serde_json::to_value(check).unwrap_or(serde_json::Value::Null),
            duration_ms: 0.0,
            status: Status::NotRun,
            error: None,
        })
        .collect()
}

// ============================================================================
// ENVIO DA REQUISIÇÃO
// ============================================================================

/// Envia a requisição e captura a resposta inteira, descomprimindo
/// gzip de forma transparente. Erros viram a mensagem retornada.
async fn send(pool: &ClientPool, built: &BuiltRequest) -> Result<Response, String> {
    let client = pool
        .get(built.timeout_ms, built.follow_redirects)
        .map_err(|e| format!("cannot build HTTP client: {}", e))?;

    let method = reqwest::Method::from_bytes(built.method.as_bytes())
        .map_err(|e| format!("invalid method: {}", e))?;

    let mut request = client.request(method, &built.url);
    for (name, values) in &built.headers {
        for value in values {
            request = request.header(name, value);
        }
    }
    if !built.body.is_empty() {
        request = request.body(built.body.clone());
    }

    let timer = Instant::now();
    let response = request.send().await.map_err(|e| e.to_string())?;

    let status = response.status().as_u16();
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in response.headers() {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    let raw = response
        .bytes()
        .await
        .map_err(|e| format!("cannot read body: {}", e))?;
    let duration_ms = ms(timer.elapsed());

    let gzipped = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-encoding"))
        .map(|(_, vs)| vs.iter().any(|v| v.to_lowercase().contains("gzip")))
        .unwrap_or(false);
    let body = if gzipped {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_ref())
            .read_to_end(&mut decoded)
            .map_err(|e| format!("cannot decode gzip body: {}", e))?;
        decoded
    } else {
        raw.to_vec()
    };

    Ok(Response {
        status,
        headers,
        body,
        duration_ms,
    })
}

fn ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

// ============================================================================
// TESTES
// ============================================================================
