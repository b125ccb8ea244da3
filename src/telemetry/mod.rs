//! # Módulo de Telemetria OpenTelemetry
//!
//! Integração com OpenTelemetry para observabilidade da execução de
//! testes: cada execução de teste vira um span com método, URL, status
//! e duração da última tentativa (o runner registra os atributos via
//! [`instrumentation::TestSpanContext`]), exportado via OTLP (gRPC)
//! quando um endpoint está configurado.
//!
//! ## Configuração via variáveis de ambiente:
//!
//! - `OTEL_SERVICE_NAME`: nome do serviço nos traces
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: URL do coletor OTLP
//! - `OTEL_TRACES_SAMPLER_ARG`: taxa de sampling (0.0-1.0)
//!
//! ## Exemplo de uso:
//!
//! ```ignore
//! let config = TelemetryConfig::from_env();
//! init_telemetry(config)?;
//!
//! // ... executar suites ...
//!
//! shutdown_telemetry(); // flush dos spans pendentes
//! ```
//!
//! Sem endpoint OTLP, apenas o logging de console é configurado.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Configuração do sistema de telemetria.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Nome do serviço para identificação nos traces.
    pub service_name: String,

    /// Endpoint OTLP (gRPC). None = apenas console.
    pub otlp_endpoint: Option<String>,

    /// Taxa de sampling, de 0.0 (nada) a 1.0 (tudo).
    pub sampling_ratio: f64,

    /// Logging de console junto com o export OTLP.
    pub enable_console_logging: bool,

    /// Nível mínimo de log.
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "apiprobe".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Configuração a partir das variáveis de ambiente OTEL_*.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }
        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }
        config
    }
}

// ============================================================================
// INICIALIZAÇÃO
// ============================================================================

/// Inicializa logging estruturado e, com endpoint configurado, o
/// export de spans via OTLP.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;
        let telemetry_layer = OpenTelemetryLayer::new(tracer.clone());
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(telemetry_layer);

        if config.enable_console_logging {
            subscriber
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        } else {
            subscriber.init();
        }

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "OTEL telemetry initialized"
        );
        Ok(Some(tracer))
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);
        if config.enable_console_logging {
            subscriber
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        } else {
            subscriber.init();
        }
        tracing::info!("telemetry initialized (console only, no OTLP)");
        Ok(None)
    }
}

/// Cria o tracer com exporter OTLP em lote.
fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
    sampling_ratio: f64,
) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        // Baseado no trace ID: spans de um mesmo trace são coletados juntos.
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);
    Ok(tracer)
}

/// Encerra a telemetria, garantindo o flush dos spans em lote.
/// Chamar antes do processo terminar; spans não-flushados são perdidos.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::info!("OTEL telemetry shut down");
}

/// Helpers de instrumentação para spans de execução de teste.
pub mod instrumentation {
    use std::time::Instant;

    /// Contexto de span de uma execução de teste HTTP.
    #[derive(Debug)]
    pub struct TestSpanContext {
        pub method: String,
        pub url: String,
        pub test_name: String,
        pub start_time: Instant,
        /// Tentativa atual (polling), começando em 1.
        pub current_try: u32,
        pub status_code: Option<u16>,
        pub duration_ms: Option<u64>,
    }

    impl TestSpanContext {
        pub fn new(method: &str, url: &str, test_name: &str, current_try: u32) -> Self {
            Self {
                method: method.to_string(),
                url: url.to_string(),
                test_name: test_name.to_string(),
                start_time: Instant::now(),
                current_try,
                status_code: None,
                duration_ms: None,
            }
        }

        /// Finaliza o span com o status da resposta.
        pub fn finish(&mut self, status_code: u16) {
            self.status_code = Some(status_code);
            self.duration_ms = Some(self.start_time.elapsed().as_millis() as u64);
        }

        /// Atributos para o span OTEL.
        pub fn attributes(&self) -> Vec<(&'static str, String)> {
            let mut attrs = vec![
                ("http.method", self.method.clone()),
                ("http.url", self.url.clone()),
                ("test.name", self.test_name.clone()),
                ("test.attempt", self.current_try.to_string()),
            ];
            if let Some(status) = self.status_code {
                attrs.push(("http.status_code", status.to_string()));
            }
            if let Some(duration) = self.duration_ms {
                attrs.push(("http.duration_ms", duration.to_string()));
            }
            attrs
        }
    }
}
