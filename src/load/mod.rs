//! # Módulo de Carga - Controlador de Throughput
//!
//! Gera uma taxa alvo de requisições sorteadas de cenários ponderados,
//! gravando o desfecho de cada requisição.
//!
//! ## Arquitetura do run:
//!
//! ```text
//!              ┌────────────────────────────────────────────────┐
//!              │                  monitor (~1s)                  │
//!              │   duração esgotada / taxa de erro → stop        │
//!              └────────────────────────┬───────────────────────┘
//!                                       ▼ (watch)
//!  pools por cenário        scheduler              dispatcher
//!  ┌──────────────┐   tick Poisson + seleção   executa cada teste
//!  │ workers ────→│──→ ponderada + leitura ──→ numa task própria ──→ recorder
//!  │ (elásticos)  │    não-bloqueante           e sinaliza o worker   (CSV,
//!  └──────────────┘                                                   anel,
//!                                                                     coleta)
//! ```
//!
//! ## Ciclo de vida:
//!
//! 1. **Setup**: o setup da suite de cada cenário roda sequencialmente;
//!    uma falha aborta o run inteiro (teardown dos cenários já
//!    preparados ainda roda).
//! 2. **Start**: um pool por cenário, dois workers pré-iniciados,
//!    seletor de 100 posições proporcional às porcentagens.
//! 3. **Tráfego**: o scheduler dorme o intervalo exponencial, sorteia
//!    um cenário, lê um teste pronto do canal do pool (crescendo o pool
//!    quando vazio) e encaminha ao dispatcher, que executa e grava.
//! 4. **Stop**: duração esgotada, taxa de erro estourada ou o chamador;
//!    um único canal watch cancela todo mundo.
//! 5. **Drain + teardown + pós-análise**.

pub mod pool;
pub mod rate;
pub mod recorder;

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::ClientPool;
use crate::errors::LoadError;
use crate::model::Suite;
use crate::report::{Status, SuiteResult, TestResult};
use crate::runner;
use crate::scope::Scope;
use crate::suite::{run_suite_with, DirectExecutor, Phases};

use self::pool::{Job, ScenarioPool};
use self::rate::ArrivalGenerator;
use self::recorder::{
    record_events, CsvRecorder, RecorderEvent, StatusRing, TestData, STATUS_WINDOW,
};

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Um cenário: suite + fatia percentual do tráfego + teto de workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub suite: Suite,

    /// Fatia do tráfego em porcento; as fatias somam exatamente 100.
    pub percent: u32,

    /// Teto de workers do pool deste cenário. 0 = ilimitado.
    pub max_threads: usize,

    /// Limpa os checks dos testes deste cenário antes de executar.
    pub omit_checks: bool,

    /// Variáveis locais do cenário.
    pub variables: HashMap<String, String>,
}

/// Configuração de um teste de carga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTest {
    pub scenarios: Vec<Scenario>,

    /// Taxa alvo em requisições por segundo.
    pub rate: f64,

    /// Duração total do run, em milissegundos.
    pub duration_ms: u64,

    /// Janela de ramp-up: a taxa cresce linearmente de 0 até o alvo.
    #[serde(default)]
    pub ramp_ms: u64,

    /// Fração de Fail+Error na janela dos últimos 50 eventos que
    /// aborta o run. 0 desliga a política.
    #[serde(default)]
    pub max_error_rate: f64,

    /// Status mínimo para reter o resultado completo do teste no
    /// subconjunto de falhas.
    #[serde(default = "default_collect_from")]
    pub collect_from: Status,
}

fn default_collect_from() -> Status {
    Status::Fail
}

// ============================================================================
// RESULTADO
// ============================================================================

/// Estatísticas agregadas de um cenário ao fim do run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub name: String,
    pub percent: u32,
    pub events: usize,
    /// Fatia efetivamente observada, em porcento.
    pub share: f64,
    pub threads: u64,
    pub misses: u64,
    pub repetitions: u64,
}

/// Resultado agregado de um teste de carga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResult {
    pub id: Uuid,
    pub started: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub events: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub scenarios: Vec<ScenarioStats>,

    /// Resultados completos com status ≥ collect_from.
    pub collected: Vec<TestResult>,

    /// Violações da pós-análise (vazio = run saudável).
    pub analysis: Vec<String>,

    /// Resultados de teardown, separados do desfecho primário.
    pub teardown: Vec<SuiteResult>,

    /// Razão do abort antecipado, quando houve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,

    pub mean_overage_second_half_ms: f64,
}

// ============================================================================
// EXECUÇÃO
// ============================================================================

struct Dispatch {
    job: Job,
    wait_ms: f64,
    overage_ms: f64,
}

/// Roda um teste de carga completo, escrevendo o stream CSV de eventos
/// em `csv_out`.
pub async fn run_load_test<W>(
    config: &LoadTest,
    global: &Scope,
    csv_out: W,
) -> Result<LoadResult, LoadError>
where
    W: Write + Send + 'static,
{
    validate(config)?;

    let id = Uuid::new_v4();
    info!(
        run = %id,
        rate = config.rate,
        duration_ms = config.duration_ms,
        scenarios = config.scenarios.len(),
        "starting load test"
    );

    // ========================================================================
    // FASE 1: SETUP DOS CENÁRIOS
    // ========================================================================

    struct Prepared {
        suite: Arc<Suite>,
        globals: Scope,
        client_pool: Arc<ClientPool>,
    }

    let mut prepared: Vec<Prepared> = Vec::new();
    for scenario in &config.scenarios {
        let mut suite = scenario.suite.clone();
        suite.omit_checks = suite.omit_checks || scenario.omit_checks;

        let globals = Scope::merge(global, &scenario.variables, false);
        let client_pool = Arc::new(ClientPool::new());
        let setup = run_suite_with(
            &suite,
            &globals,
            Some(client_pool.jar()),
            &DirectExecutor,
            Phases::SETUP,
        )
        .await;

        if setup.status > Status::Pass {
            warn!(scenario = %suite.name, status = %setup.status, "scenario setup failed");
            // Teardown garantido para tudo que já foi preparado,
            // inclusive o cenário que quebrou.
            prepared.push(Prepared {
                suite: Arc::new(suite.clone()),
                globals: Scope::from_vars(setup.variables.clone()),
                client_pool,
            });
            for p in &prepared {
                run_suite_with(
                    &p.suite,
                    &p.globals,
                    Some(p.client_pool.jar()),
                    &DirectExecutor,
                    Phases::TEARDOWN,
                )
                .await;
            }
            return Err(LoadError::SetupFailed {
                scenario: suite.name,
                status: setup.status,
            });
        }

        // Extrações do setup alimentam os workers deste cenário.
        prepared.push(Prepared {
            suite: Arc::new(suite),
            globals: Scope::from_vars(setup.variables),
            client_pool,
        });
    }

    // ========================================================================
    // FASE 2: POOLS, CANAIS E TASKS
    // ========================================================================

    let started = Utc::now();
    let run_timer = Instant::now();

    let (stop_tx, stop_rx) = watch::channel(false);
    let (dispatch_tx, dispatch_rx) = mpsc::channel::<Dispatch>(64);
    let (event_tx, event_rx) = mpsc::channel::<RecorderEvent>(1024);

    let ring = Arc::new(Mutex::new(StatusRing::new(STATUS_WINDOW)));
    let csv = CsvRecorder::new(csv_out, started).map_err(|e| LoadError::Csv(e.to_string()))?;
    let recorder_handle = tokio::spawn(record_events(
        event_rx,
        csv,
        Arc::clone(&ring),
        config.collect_from,
    ));

    let mut pools: Vec<Arc<ScenarioPool>> = Vec::new();
    let mut receivers: Vec<mpsc::Receiver<Job>> = Vec::new();
    for (idx, p) in prepared.into_iter().enumerate() {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(1);
        let pool = Arc::new(ScenarioPool {
            idx,
            name: p.suite.name.clone(),
            suite: p.suite,
            globals: p.globals,
            client_pool: p.client_pool,
            jobs_tx,
            max_threads: config.scenarios[idx].max_threads,
            threads: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            repetitions: Arc::new(AtomicU64::new(0)),
            handles: Mutex::new(Vec::new()),
        });
        // Dois workers de partida; o resto cresce sob demanda.
        pool.spawn_worker(stop_rx.clone());
        pool.spawn_worker(stop_rx.clone());
        pools.push(pool);
        receivers.push(jobs_rx);
    }

    let selector = build_selector(&config.scenarios);

    let scheduler = tokio::spawn(schedule(
        receivers,
        pools.clone(),
        selector,
        config.rate,
        Duration::from_millis(config.ramp_ms),
        dispatch_tx,
        stop_rx.clone(),
    ));
    let dispatcher = tokio::spawn(dispatch_loop(dispatch_rx, event_tx));

    // ========================================================================
    // FASE 3: MONITOR
    // ========================================================================

    let duration = Duration::from_millis(config.duration_ms);
    let tick = Duration::from_millis((config.duration_ms / 20).clamp(50, 1_000));
    let mut ticker = tokio::time::interval(tick);
    let mut aborted: Option<String> = None;

    loop {
        ticker.tick().await;
        if run_timer.elapsed() >= duration {
            break;
        }
        if config.max_error_rate > 0.0 {
            let rate = ring.lock().expect("status ring poisoned").error_rate();
            if let Some(rate) = rate {
                if rate > config.max_error_rate {
                    let reason = format!(
                        "error rate {:.1}% over the last {} events exceeds {:.1}%",
                        rate * 100.0,
                        STATUS_WINDOW,
                        config.max_error_rate * 100.0
                    );
                    warn!(run = %id, %reason, "aborting load test");
                    aborted = Some(reason);
                    break;
                }
            }
        }
    }

    // ========================================================================
    // FASE 4: DRAIN
    // ========================================================================

    let _ = stop_tx.send(true);
    let elapsed_ms = run_timer.elapsed().as_secs_f64() * 1_000.0;

    let _ = scheduler.await;
    let _ = dispatcher.await;
    for pool in &pools {
        let handles: Vec<_> = pool
            .handles
            .lock()
            .expect("pool handles poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
    let output = recorder_handle
        .await
        .map_err(|e| LoadError::Csv(e.to_string()))?
        .map_err(|e| LoadError::Csv(e.to_string()))?;

    // ========================================================================
    // FASE 5: TEARDOWN E PÓS-ANÁLISE
    // ========================================================================

    let mut teardown = Vec::new();
    for pool in &pools {
        teardown.push(
            run_suite_with(
                &pool.suite,
                &pool.globals,
                Some(pool.client_pool.jar()),
                &DirectExecutor,
                Phases::TEARDOWN,
            )
            .await,
        );
    }

    let mut events = output.events;
    events.sort_by_key(|e| e.started);
    let (analysis, mean_overage) = analyze(&events, &pools, config);

    let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
    for e in &events {
        *status_counts.entry(e.status.to_string()).or_default() += 1;
    }

    let scenarios = pools
        .iter()
        .enumerate()
        .map(|(i, pool)| {
            let count = events.iter().filter(|e| e.scenario == i).count();
            ScenarioStats {
                name: pool.name.clone(),
                percent: config.scenarios[i].percent,
                events: count,
                share: if events.is_empty() {
                    0.0
                } else {
                    count as f64 / events.len() as f64 * 100.0
                },
                threads: pool.threads.load(Ordering::Relaxed),
                misses: pool.misses.load(Ordering::Relaxed),
                repetitions: pool.repetitions.load(Ordering::Relaxed),
            }
        })
        .collect();

    info!(run = %id, events = events.len(), elapsed_ms, "load test finished");

    Ok(LoadResult {
        id,
        started,
        elapsed_ms,
        events: events.len(),
        status_counts,
        scenarios,
        collected: output.collected,
        analysis,
        teardown,
        aborted,
        mean_overage_second_half_ms: mean_overage,
    })
}

// ============================================================================
// VALIDAÇÃO E SELEÇÃO
// ============================================================================

fn validate(config: &LoadTest) -> Result<(), LoadError> {
    if config.scenarios.is_empty() {
        return Err(LoadError::NoScenarios);
    }
    let sum: u32 = config.scenarios.iter().map(|s| s.percent).sum();
    if sum != 100 {
        return Err(LoadError::BadPercentage(sum));
    }
    if config.rate <= 0.0 {
        return Err(LoadError::BadRate(config.rate));
    }
    if config.duration_ms == 0 {
        return Err(LoadError::BadDuration);
    }
    Ok(())
}

/// Seletor de 100 posições preenchido com índices de cenário na
/// proporção das porcentagens.
fn build_selector(scenarios: &[Scenario]) -> Vec<usize> {
    let mut selector = Vec::with_capacity(100);
    for (i, s) in scenarios.iter().enumerate() {
        for _ in 0..s.percent {
            selector.push(i);
        }
    }
    selector
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Dorme até o deadline; false quando o stop fechou antes.
async fn sleep_until_or_stop(deadline: Instant, stop: &mut watch::Receiver<bool>) -> bool {
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return false;
                }
            }
        }
    }
}

async fn schedule(
    mut receivers: Vec<mpsc::Receiver<Job>>,
    pools: Vec<Arc<ScenarioPool>>,
    selector: Vec<usize>,
    rate: f64,
    ramp: Duration,
    dispatch_tx: mpsc::Sender<Dispatch>,
    mut stop: watch::Receiver<bool>,
) {
    let mut generator = ArrivalGenerator::new(rate, ramp);
    let grace = rate::gracetime(rate);
    let mut rng = StdRng::from_entropy();
    let mut next_at = Instant::now();

    'ticks: loop {
        if *stop.borrow() {
            break;
        }

        // Agenda absoluta: atrasos não encurtam os intervalos seguintes,
        // eles aparecem como overage.
        let interval = generator.next_interval();
        next_at += interval;
        if !sleep_until_or_stop(next_at, &mut stop).await {
            break;
        }
        let overage_ms =
            Instant::now().saturating_duration_since(next_at).as_secs_f64() * 1_000.0;

        // Sorteio ponderado do cenário.
        let idx = selector[rng.gen_range(0..selector.len())];

        // Leitura não-bloqueante; no miss, cresce o pool e tenta de novo
        // depois do gracetime. Nenhuma requisição é descartada aqui.
        let job = loop {
            match receivers[idx].try_recv() {
                Ok(job) => break job,
                Err(_) => {
                    pools[idx].spawn_worker(stop.clone());
                    if !sleep_until_or_stop(Instant::now() + grace, &mut stop).await {
                        break 'ticks;
                    }
                }
            }
        };

        let dispatch = Dispatch {
            job,
            wait_ms: interval.as_secs_f64() * 1_000.0,
            overage_ms,
        };
        if dispatch_tx.send(dispatch).await.is_err() {
            break;
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Executa cada teste encaminhado numa task própria, grava o evento e
/// sinaliza o worker. Depois do canal fechar, espera as requisições em
/// voo: o recorder só encerra quando todas foram gravadas.
async fn dispatch_loop(mut rx: mpsc::Receiver<Dispatch>, events: mpsc::Sender<RecorderEvent>) {
    let mut in_flight = JoinSet::new();

    while let Some(dispatch) = rx.recv().await {
        let events = events.clone();
        in_flight.spawn(async move {
            let Dispatch {
                job,
                wait_ms,
                overage_ms,
            } = dispatch;
            let started = Utc::now();
            let result = runner::run_test(&job.test, &job.scope, &job.client_pool).await;

            let data = TestData {
                started,
                status: result.status,
                req_duration_ms: result.request_duration_ms,
                test_duration_ms: result.full_duration_ms,
                wait_ms,
                overage_ms,
                scenario: job.meta.scenario,
                thread: job.meta.thread,
                repetition: job.meta.repetition,
                test_no: job.meta.test_no,
                scenario_name: job.meta.scenario_name,
                test_name: job.meta.test_name,
                error: result.error.clone(),
            };
            let _ = events
                .send(RecorderEvent {
                    data,
                    result: result.clone(),
                })
                .await;
            let _ = job.done.send(result);
        });
    }

    while in_flight.join_next().await.is_some() {}
}

// ============================================================================
// PÓS-ANÁLISE
// ============================================================================

/// Verifica as garantias do run; cada violação vira uma linha.
fn analyze(
    events: &[TestData],
    pools: &[Arc<ScenarioPool>],
    config: &LoadTest,
) -> (Vec<String>, f64) {
    let mut violations = Vec::new();
    let total = events.len();

    // (i) na segunda metade, o atraso médio fica abaixo de 1ms quando a
    // taxa alvo está sendo atingida.
    let second_half = &events[total / 2..];
    let mean_overage = if second_half.is_empty() {
        0.0
    } else {
        second_half.iter().map(|e| e.overage_ms).sum::<f64>() / second_half.len() as f64
    };
    if mean_overage >= 1.0 {
        violations.push(format!(
            "mean overage of second half is {:.3}ms, want < 1ms",
            mean_overage
        ));
    }

    for (i, pool) in pools.iter().enumerate() {
        let percent = config.scenarios[i].percent as f64;
        let count = events.iter().filter(|e| e.scenario == i).count();
        let expected = total as f64 * percent / 100.0;

        // (ii) misses de thread até 2% da fatia esperada do pool.
        let misses = pool.misses.load(Ordering::Relaxed) as f64;
        if expected > 0.0 && misses > 0.02 * expected {
            violations.push(format!(
                "scenario '{}' dropped {} worker starts, more than 2% of its {:.0} expected events",
                pool.name, misses, expected
            ));
        }

        // (iii) fatia observada dentro de ±5 pontos percentuais.
        if total > 0 {
            let share = count as f64 / total as f64 * 100.0;
            if (share - percent).abs() > 5.0 {
                violations.push(format!(
                    "scenario '{}' got {:.1}% of requests, want {:.0}%±5",
                    pool.name, share, percent
                ));
            }
        }

        // (iv) cada cenário completou a lista main pelo menos duas vezes.
        let repetitions = pool.repetitions.load(Ordering::Relaxed);
        if repetitions < 2 {
            violations.push(format!(
                "scenario '{}' completed its main list {} time(s), want at least 2",
                pool.name, repetitions
            ));
        }
    }

    (violations, mean_overage)
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{Check, StatusCode};
    use crate::model::{Request, SuiteElement, Test};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scenario(name: &str, url: String, percent: u32) -> Scenario {
        let test = Test {
            name: format!("{}-request", name),
            request: Request {
                url,
                ..Request::default()
            },
            checks: vec![Check::StatusCode(StatusCode { expect: 200 })],
            ..Test::default()
        };
        Scenario {
            suite: Suite {
                name: name.to_string(),
                main: vec![SuiteElement::from_test(test)],
                ..Suite::default()
            },
            percent,
            max_threads: 0,
            omit_checks: false,
            variables: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Validação e seleção
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_validation_rejects_bad_configs() {
        let empty = LoadTest {
            scenarios: vec![],
            rate: 10.0,
            duration_ms: 1_000,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };
        assert!(matches!(
            run_load_test(&empty, &Scope::new(), Vec::new()).await,
            Err(LoadError::NoScenarios)
        ));

        let bad_sum = LoadTest {
            scenarios: vec![scenario("a", "http://x/".into(), 60)],
            rate: 10.0,
            duration_ms: 1_000,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };
        assert!(matches!(
            run_load_test(&bad_sum, &Scope::new(), Vec::new()).await,
            Err(LoadError::BadPercentage(60))
        ));

        let bad_rate = LoadTest {
            scenarios: vec![scenario("a", "http://x/".into(), 100)],
            rate: 0.0,
            duration_ms: 1_000,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };
        assert!(matches!(
            run_load_test(&bad_rate, &Scope::new(), Vec::new()).await,
            Err(LoadError::BadRate(_))
        ));

        let bad_duration = LoadTest {
            scenarios: vec![scenario("a", "http://x/".into(), 100)],
            rate: 10.0,
            duration_ms: 0,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };
        assert!(matches!(
            run_load_test(&bad_duration, &Scope::new(), Vec::new()).await,
            Err(LoadError::BadDuration)
        ));
    }

    #[test]
    fn test_selector_proportional_to_percentages() {
        let scenarios = vec![
            scenario("a", "http://x/".into(), 40),
            scenario("b", "http://x/".into(), 40),
            scenario("c", "http://x/".into(), 20),
        ];
        let selector = build_selector(&scenarios);
        assert_eq!(selector.len(), 100);
        assert_eq!(selector.iter().filter(|i| **i == 0).count(), 40);
        assert_eq!(selector.iter().filter(|i| **i == 1).count(), 40);
        assert_eq!(selector.iter().filter(|i| **i == 2).count(), 20);
    }

    // ------------------------------------------------------------------------
    // Pós-análise com dados sintéticos
    // ------------------------------------------------------------------------

    fn synthetic_event(scenario: usize, overage_ms: f64) -> TestData {
        TestData {
            started: Utc::now(),
            status: Status::Pass,
            req_duration_ms: 1.0,
            test_duration_ms: 1.0,
            wait_ms: 10.0,
            overage_ms,
            scenario,
            thread: 1,
            repetition: 1,
            test_no: 1,
            scenario_name: "s".to_string(),
            test_name: "t".to_string(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_analysis_flags_violations() {
        let config = LoadTest {
            scenarios: vec![
                scenario("a", "http://x/".into(), 50),
                scenario("b", "http://x/".into(), 50),
            ],
            rate: 10.0,
            duration_ms: 1_000,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };

        // Cenário 0 com 90% dos eventos e overage alto na segunda metade.
        let mut events = Vec::new();
        for i in 0..100 {
            let s = if i < 90 { 0 } else { 1 };
            events.push(synthetic_event(s, 5.0));
        }

        let pools: Vec<Arc<ScenarioPool>> = (0..2)
            .map(|idx| {
                let (jobs_tx, _rx) = mpsc::channel(1);
                Arc::new(ScenarioPool {
                    idx,
                    name: format!("s{}", idx),
                    suite: Arc::new(Suite::default()),
                    globals: Scope::new(),
                    client_pool: Arc::new(ClientPool::new()),
                    jobs_tx,
                    max_threads: 0,
                    threads: AtomicU64::new(1),
                    misses: AtomicU64::new(0),
                    repetitions: Arc::new(AtomicU64::new(5)),
                    handles: Mutex::new(Vec::new()),
                })
            })
            .collect();

        let (violations, mean_overage) = analyze(&events, &pools, &config);
        assert!(mean_overage >= 5.0);
        // Overage alto + as duas fatias fora de ±5pp.
        assert!(violations.iter().any(|v| v.contains("overage")));
        assert!(violations.iter().filter(|v| v.contains("% of requests")).count() == 2);
    }

    // ------------------------------------------------------------------------
    // Ponta a ponta
    // ------------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distribution_matches_scenario_weights() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let config = LoadTest {
            scenarios: vec![
                scenario("forty-a", format!("{}/a", server.uri()), 40),
                scenario("forty-b", format!("{}/b", server.uri()), 40),
                scenario("twenty", format!("{}/c", server.uri()), 20),
            ],
            rate: 100.0,
            duration_ms: 3_000,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };

        let csv = tempfile::NamedTempFile::new().unwrap();
        let out = csv.reopen().unwrap();
        let result = run_load_test(&config, &Scope::new(), out).await.unwrap();

        assert!(result.aborted.is_none());
        assert!(
            result.events >= 150,
            "expected a healthy event count, got {}",
            result.events
        );
        assert_eq!(result.status_counts.get("Pass"), Some(&result.events));

        // Fatias dentro de uma margem estatística folgada.
        for stats in &result.scenarios {
            let want = stats.percent as f64;
            assert!(
                (stats.share - want).abs() <= 8.0,
                "scenario '{}' share {:.1}% too far from {:.0}%",
                stats.name,
                stats.share,
                want
            );
            assert!(stats.repetitions >= 2);
        }

        // O stream CSV reconstrói cada evento.
        let parsed = recorder::read_csv(std::fs::File::open(csv.path()).unwrap()).unwrap();
        assert_eq!(parsed.len(), result.events);
        assert!(parsed.iter().all(|d| d.status == Status::Pass));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_error_rate_aborts_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = LoadTest {
            scenarios: vec![scenario("failing", server.uri(), 100)],
            rate: 100.0,
            duration_ms: 20_000,
            ramp_ms: 0,
            max_error_rate: 0.5,
            collect_from: Status::Fail,
        };

        let result = run_load_test(&config, &Scope::new(), Vec::new())
            .await
            .unwrap();

        assert!(result.aborted.is_some(), "run must trip on error rate");
        assert!(
            result.elapsed_ms < 10_000.0,
            "abort must come well before the 20s duration, took {}ms",
            result.elapsed_ms
        );
        // Os reprovados ficam no subconjunto coletado.
        assert!(!result.collected.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_setup_failure_aborts_run_and_tears_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut sc = scenario("broken-setup", server.uri(), 100);
        sc.suite.setup = sc.suite.main.clone();

        let config = LoadTest {
            scenarios: vec![sc],
            rate: 10.0,
            duration_ms: 5_000,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };

        let err = run_load_test(&config, &Scope::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::SetupFailed { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_thread_and_repetition_vars_in_worker_scope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // A URL referencia THREAD e REPETITION; se as variáveis não
        // existirem no escopo, a substituição deixa o literal e o check
        // de caminho reprova.
        let test = Test {
            name: "worker-vars".to_string(),
            request: Request {
                url: format!("{}/t{{{{THREAD}}}}/r{{{{REPETITION}}}}", server.uri()),
                ..Request::default()
            },
            checks: vec![Check::StatusCode(StatusCode { expect: 200 })],
            ..Test::default()
        };
        let config = LoadTest {
            scenarios: vec![Scenario {
                suite: Suite {
                    name: "vars".to_string(),
                    main: vec![SuiteElement::from_test(test)],
                    ..Suite::default()
                },
                percent: 100,
                max_threads: 0,
                omit_checks: false,
                variables: HashMap::new(),
            }],
            rate: 30.0,
            duration_ms: 1_000,
            ramp_ms: 0,
            max_error_rate: 0.0,
            collect_from: Status::Fail,
        };

        let csv = tempfile::NamedTempFile::new().unwrap();
        let out = csv.reopen().unwrap();
        let result = run_load_test(&config, &Scope::new(), out).await.unwrap();

        assert!(result.events > 0);
        // Nenhuma URL com placeholder sem resolver chegou ao servidor.
        let requests = server.received_requests().await.unwrap();
        for r in &requests {
            let path = r.url.path().to_string();
            assert!(
                !path.contains("{{"),
                "unsubstituted placeholder reached the server: {}",
                path
            );
            assert!(path.starts_with("/t"), "path: {}", path);
        }
    }
}
