//! # Pools Elásticos por Cenário
//!
//! Cada cenário do teste de carga tem um pool de workers. Um worker
//! roda os testes main da suite em loop; em vez de executar cada teste
//! ele próprio, oferece o teste pronto no canal do pool e espera o
//! sinal de conclusão do despachante.
//!
//! ```text
//!  worker 1 ──┐
//!  worker 2 ──┤→ canal do pool (bounded) → scheduler → dispatcher
//!  worker N ──┘         ▲
//!                       └── back-pressure: o worker bloqueia no send
//! ```
//!
//! O canal limitado É a contrapressão: o scheduler só consome no ritmo
//! da taxa alvo, e um worker bloqueado no send não fabrica trabalho
//! novo. Quando o canal está vazio na hora do tick, o scheduler inicia
//! um worker extra (respeitando MaxThreads): é assim que a capacidade
//! cresce sob carga.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::ClientPool;
use crate::model::{Suite, Test};
use crate::report::{Status, TestResult};
use crate::scope::Scope;
use crate::suite::{run_suite_with, Phases, TestExecutor};

// ============================================================================
// TRABALHO PRONTO PARA DESPACHO
// ============================================================================

/// Identificação de um teste dentro do run, para o registro compacto.
#[derive(Debug, Clone)]
pub(crate) struct JobMeta {
    pub scenario: usize,
    pub scenario_name: String,
    pub thread: u64,
    pub repetition: u64,
    pub test_no: usize,
    pub test_name: String,
}

/// Um teste construído por um worker, aguardando o despachante.
/// `done` devolve o resultado ao worker, que segue a sequência da suite.
pub(crate) struct Job {
    pub test: Test,
    pub scope: Scope,
    pub client_pool: Arc<ClientPool>,
    pub meta: JobMeta,
    pub done: oneshot::Sender<TestResult>,
}

// ============================================================================
// EXECUTOR VIA CANAL
// ============================================================================

/// Executor instalado no sequenciador pelos workers: publica o teste
/// no canal do pool e espera a conclusão. Sai cedo quando o stop fecha.
pub(crate) struct ChannelExecutor {
    scenario: usize,
    scenario_name: String,
    thread: u64,
    repetition: u64,
    next_test: AtomicUsize,
    jobs: mpsc::Sender<Job>,
    client_pool: Arc<ClientPool>,
    stop: watch::Receiver<bool>,
    interrupted: AtomicBool,
}

impl ChannelExecutor {
    fn skipped(test: &Test) -> TestResult {
        let mut r = TestResult::shell(&test.name, &test.description, Vec::new());
        r.status = Status::Skipped;
        r
    }

    /// A repetição foi interrompida pelo stop (não conta como completa).
    pub(crate) fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TestExecutor for ChannelExecutor {
    async fn execute(&self, test: &Test, scope: &Scope, _pool: &ClientPool) -> TestResult {
        let mut stop = self.stop.clone();
        if *stop.borrow() {
            self.interrupted.store(true, Ordering::Relaxed);
            return Self::skipped(test);
        }

        let test_no = self.next_test.fetch_add(1, Ordering::Relaxed) + 1;
        let (done, wait_done) = oneshot::channel();
        let job = Job {
            test: test.clone(),
            scope: scope.clone(),
            client_pool: Arc::clone(&self.client_pool),
            meta: JobMeta {
                scenario: self.scenario,
                scenario_name: self.scenario_name.clone(),
                thread: self.thread,
                repetition: self.repetition,
                test_no,
                test_name: test.name.clone(),
            },
            done,
        };

        // O send bloqueante sempre acompanha um caso de stop no select.
        tokio::select! {
            sent = self.jobs.send(job) => {
                if sent.is_err() {
                    self.interrupted.store(true, Ordering::Relaxed);
                    return Self::skipped(test);
                }
            }
            _ = stop.changed() => {
                self.interrupted.store(true, Ordering::Relaxed);
                return Self::skipped(test);
            }
        }

        match wait_done.await {
            Ok(result) => result,
            Err(_) => {
                // O drain descartou o job pendente.
                self.interrupted.store(true, Ordering::Relaxed);
                Self::skipped(test)
            }
        }
    }
}

// ============================================================================
// POOL DE UM CENÁRIO
// ============================================================================

/// Estado compartilhado do pool de um cenário.
pub(crate) struct ScenarioPool {
    pub idx: usize,
    pub name: String,
    /// Suite do cenário (omit_checks já aplicado).
    pub suite: Arc<Suite>,
    /// Escopo do cenário depois do setup (extrações incluídas).
    pub globals: Scope,
    /// Transporte e cookie jar do cenário.
    pub client_pool: Arc<ClientPool>,
    pub jobs_tx: mpsc::Sender<Job>,
    pub max_threads: usize,
    /// Contador de workers iniciados; também numera o THREAD.
    pub threads: AtomicU64,
    /// Workers recusados por MaxThreads.
    pub misses: AtomicU64,
    /// Repetições completas da lista main (todas as threads somadas).
    pub repetitions: Arc<AtomicU64>,
    /// Handles dos workers, esperados no drain.
    pub handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ScenarioPool {
    /// Inicia um worker novo, respeitando MaxThreads. Quando o teto é
    /// atingido, conta um miss e descarta o pedido, o único ponto em
    /// que o controlador cede sob carga.
    pub(crate) fn spawn_worker(self: &Arc<Self>, stop: watch::Receiver<bool>) -> bool {
        let running = self.threads.load(Ordering::Relaxed);
        if self.max_threads > 0 && running as usize >= self.max_threads {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let thread_no = self.threads.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(scenario = %self.name, thread = thread_no, "starting worker");

        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker_loop(pool, thread_no, stop).await;
        });
        self.handles.lock().expect("pool handles poisoned").push(handle);
        true
    }
}

/// Loop de um worker: a cada volta, uma instância fresca da suite
/// (auto-vars novos, escopo novo) com THREAD e REPETITION no escopo.
async fn worker_loop(pool: Arc<ScenarioPool>, thread_no: u64, stop: watch::Receiver<bool>) {
    let mut repetition: u64 = 0;
    loop {
        if *stop.borrow() {
            break;
        }
        // Suites vazias não podem monopolizar o runtime.
        tokio::task::yield_now().await;
        repetition += 1;

        let mut thread_scope = pool.globals.clone();
        thread_scope.set("THREAD", thread_no.to_string());
        thread_scope.set("REPETITION", repetition.to_string());

        let executor = ChannelExecutor {
            scenario: pool.idx,
            scenario_name: pool.name.clone(),
            thread: thread_no,
            repetition,
            next_test: AtomicUsize::new(0),
            jobs: pool.jobs_tx.clone(),
            client_pool: Arc::clone(&pool.client_pool),
            stop: stop.clone(),
            interrupted: AtomicBool::new(false),
        };

        run_suite_with(
            &pool.suite,
            &thread_scope,
            Some(pool.client_pool.jar()),
            &executor,
            Phases::MAIN,
        )
        .await;

        if executor.was_interrupted() {
            break;
        }
        pool.repetitions.fetch_add(1, Ordering::Relaxed);
    }
    debug!(scenario = %pool.name, thread = thread_no, "worker stopped");
}
