pub mod audit;
pub mod callback;
pub mod config;
pub mod gateway;
pub mod limiter;
pub mod metrics;
pub mod notifier;
pub mod pipeline;
pub mod services;
pub mod stages;
pub mod testing;

pub use audit::{create_audit_system, AuditEvent, AuditFilter, AuditHandle, AuditStore};
pub use callback::{CallbackDispatcher, CallbackEnvelope, DeliveryOutcome};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use gateway::{CallError, CallPolicy, Endpoint, HttpGateway};
pub use limiter::ConcurrencyLimiter;
pub use notifier::KeywordNotifier;
pub use pipeline::{BatchHandle, BatchReport, Orchestrator, Persona, PipelineError, Stage, Task};
pub use stages::StageContext;
