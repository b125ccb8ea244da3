//! # Gravador de Eventos do Teste de Carga
//!
//! Consome cada evento de fim de requisição e mantém três coisas:
//!
//! 1. Uma linha CSV compacta por evento (o stream de dados do teste)
//! 2. Um anel com os últimos N status, para a política de abort
//! 3. A lista de resultados coletados com status ≥ limiar
//!
//! O leitor paralelo do CSV faz parte do contrato: cada linha
//! reconstrói um `TestData`.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;

use crate::report::{Status, TestResult};

// ============================================================================
// FORMATO CSV
// ============================================================================

/// Separador dos campos do SeqNo (U+2237, "proporção").
pub const SEQ_SEP: char = '\u{2237}';

/// Tamanho do anel de status consultado pela política de abort.
pub const STATUS_WINDOW: usize = 50;

const CSV_HEADER: [&str; 9] = [
    "Started",
    "Elapsed(ms)",
    "Status",
    "ReqDuration(ms)",
    "TestDuration(ms)",
    "Wait(ms)",
    "Overage(ms)",
    "SeqNo",
    "Error",
];

/// Registro compacto de um evento de fim de requisição.
#[derive(Debug, Clone, PartialEq)]
pub struct TestData {
    pub started: DateTime<Utc>,
    pub status: Status,
    pub req_duration_ms: f64,
    pub test_duration_ms: f64,
    /// Intervalo de chegada pretendido antes deste disparo.
    pub wait_ms: f64,
    /// Atraso acumulado entre o instante pretendido e o real.
    pub overage_ms: f64,
    pub scenario: usize,
    pub thread: u64,
    pub repetition: u64,
    pub test_no: usize,
    pub scenario_name: String,
    pub test_name: String,
    pub error: Option<String>,
}

impl TestData {
    /// Identificador sequencial:
    /// `<Cenário>/<Thread>/<Repetição>/<Teste>∷<NomeCenário>∷<NomeTeste>`.
    pub fn seq_no(&self) -> String {
        format!(
            "{}/{}/{}/{}{}{}{}{}",
            self.scenario,
            self.thread,
            self.repetition,
            self.test_no,
            SEQ_SEP,
            self.scenario_name,
            SEQ_SEP,
            self.test_name
        )
    }
}

/// Escritor do stream CSV de eventos.
pub struct CsvRecorder<W: Write> {
    writer: csv::Writer<W>,
    run_start: DateTime<Utc>,
}

impl<W: Write> CsvRecorder<W> {
    pub fn new(out: W, run_start: DateTime<Utc>) -> anyhow::Result<CsvRecorder<W>> {
        let mut writer = csv::Writer::from_writer(out);
        writer
            .write_record(CSV_HEADER)
            .context("cannot write CSV header")?;
        Ok(CsvRecorder { writer, run_start })
    }

    pub fn write(&mut self, data: &TestData) -> anyhow::Result<()> {
        let elapsed_ms = (data.started - self.run_start)
            .num_microseconds()
            .unwrap_or(0) as f64
            / 1_000.0;
        self.writer
            .write_record([
                data.started.to_rfc3339_opts(SecondsFormat::Millis, true),
                format!("{:.3}", elapsed_ms),
                data.status.to_string(),
                format!("{:.3}", data.req_duration_ms),
                format!("{:.3}", data.test_duration_ms),
                format!("{:.3}", data.wait_ms),
                format!("{:.3}", data.overage_ms),
                data.seq_no(),
                data.error.clone().unwrap_or_default(),
            ])
            .context("cannot write CSV record")?;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush().context("cannot flush CSV stream")?;
        Ok(())
    }
}

/// Lê de volta um stream CSV de eventos, reconstruindo cada registro.
pub fn read_csv<R: Read>(input: R) -> anyhow::Result<Vec<TestData>> {
    let mut reader = csv::Reader::from_reader(input);
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.context("cannot read CSV record")?;
        let field = |i: usize| record.get(i).unwrap_or("").to_string();

        let started = DateTime::parse_from_rfc3339(&field(0))
            .context("bad Started timestamp")?
            .with_timezone(&Utc);
        let status: Status = field(2).parse().map_err(anyhow::Error::msg)?;

        let seq = field(7);
        let mut seq_parts = seq.split(SEQ_SEP);
        let numbers = seq_parts.next().unwrap_or("");
        let scenario_name = seq_parts.next().unwrap_or("").to_string();
        let test_name = seq_parts.next().unwrap_or("").to_string();
        let nums: Vec<&str> = numbers.split('/').collect();
        if nums.len() != 4 {
            anyhow::bail!("bad SeqNo '{}'", seq);
        }

        let error = field(8);
        out.push(TestData {
            started,
            status,
            req_duration_ms: field(3).parse().context("bad ReqDuration")?,
            test_duration_ms: field(4).parse().context("bad TestDuration")?,
            wait_ms: field(5).parse().context("bad Wait")?,
            overage_ms: field(6).parse().context("bad Overage")?,
            scenario: nums[0].parse().context("bad scenario number")?,
            thread: nums[1].parse().context("bad thread number")?,
            repetition: nums[2].parse().context("bad repetition")?,
            test_no: nums[3].parse().context("bad test number")?,
            scenario_name,
            test_name,
            error: if error.is_empty() { None } else { Some(error) },
        });
    }
    Ok(out)
}

// ============================================================================
// ANEL DE STATUS
// ============================================================================

/// Anel dos últimos N status, observado pelo monitor sob mutex: cada
/// leitura enxerga um snapshot consistente da sequência de sobrescrita.
#[derive(Debug)]
pub struct StatusRing {
    slots: Vec<Status>,
    next: usize,
    filled: bool,
}

impl StatusRing {
    pub fn new(capacity: usize) -> StatusRing {
        StatusRing {
            slots: vec![Status::NotRun; capacity],
            next: 0,
            filled: false,
        }
    }

    pub fn push(&mut self, status: Status) {
        self.slots[self.next] = status;
        self.next = (self.next + 1) % self.slots.len();
        if self.next == 0 {
            self.filled = true;
        }
    }

    /// Fração de Fail+Error na janela. Bogus fica de fora: template
    /// quebrado não é erro do servidor sob carga. None enquanto o anel
    /// não encheu; a política de abort só arma depois disso.
    pub fn error_rate(&self) -> Option<f64> {
        if !self.filled {
            return None;
        }
        let bad = self
            .slots
            .iter()
            .filter(|s| matches!(**s, Status::Fail | Status::Error))
            .count();
        Some(bad as f64 / self.slots.len() as f64)
    }
}

// ============================================================================
// LOOP DO GRAVADOR
// ============================================================================

/// Um evento de fim de requisição: o registro compacto e o resultado
/// completo (retido apenas quando o status passa do limiar).
pub struct RecorderEvent {
    pub data: TestData,
    pub result: TestResult,
}

/// Saída agregada do gravador depois do drain.
pub struct RecorderOutput {
    pub events: Vec<TestData>,
    pub collected: Vec<TestResult>,
}

/// Consome eventos até todos os remetentes fecharem. O drain do canal
/// garante que requisições ainda em voo depois do stop são gravadas.
pub async fn record_events<W: Write>(
    mut rx: mpsc::Receiver<RecorderEvent>,
    mut csv: CsvRecorder<W>,
    ring: Arc<Mutex<StatusRing>>,
    collect_from: Status,
) -> anyhow::Result<RecorderOutput> {
    let mut events = Vec::new();
    let mut collected = Vec::new();

    while let Some(event) = rx.recv().await {
        csv.write(&event.data)?;
        ring.lock()
            .expect("status ring poisoned")
            .push(event.data.status);
        if event.data.status >= collect_from {
            collected.push(event.result);
        }
        events.push(event.data);
    }
    csv.flush()?;

    Ok(RecorderOutput { events, collected })
}

// ============================================================================
// TESTES
// ============================================================================
