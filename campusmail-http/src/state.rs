use std::sync::Arc;

use campusmail::{
    telemetry::{LogSink, TeeSink},
    Clock, DigestService, DryRunSender, EmailSender, EventEmitter, InvalidTimeout,
    LimiterRegistry, MailComposer, MailService, MailSettings, MailStore, ScheduleCoordinator,
    ScheduledDispatcher, SendGate, SystemClock,
};
use campusmail_jsonl::{JsonlMailStore, JsonlSink};
use campusmail_mailjet::MailjetSender;

use super::{
    auth::{IdentityResolver, StaticResolver, UserInfoResolver},
    config::{Config, ConfigError},
};

/// Everything a handler needs.
#[derive(Debug, Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityResolver>,
    pub mail: MailService,
    pub digest: DigestService,
    pub registry: Arc<LimiterRegistry>,
}

/// Shared pieces built once per process.
#[derive(Debug, Clone)]
pub struct Components {
    pub settings: MailSettings,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn MailStore>,
    pub sender: Arc<dyn EmailSender>,
    pub events: EventEmitter,
}

fn invalid_timeout(err: InvalidTimeout) -> ConfigError {
    ConfigError::Invalid {
        key: "timeouts",
        value: format!("{} {:?}", err.operation, err.duration),
        reason: err.to_string(),
    }
}

impl Components {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let settings = config.settings();
        settings.timeouts().map_err(invalid_timeout)?;
        let sender: Arc<dyn EmailSender> = match (
            settings.mode.is_debug(),
            &config.mailjet_public_key,
            &config.mailjet_private_key,
        ) {
            (false, Some(public), Some(private)) => Arc::new(MailjetSender::with_timeouts(
                public.as_str(),
                private.as_str(),
                settings.send_timeout,
                settings.send_timeout,
            )),
            (false, None, _) => return Err(ConfigError::Missing { key: "MAILJET_PUBLIC_KEY" }),
            (false, _, None) => return Err(ConfigError::Missing { key: "MAILJET_PRIVATE_KEY" }),
            (true, _, _) => Arc::new(DryRunSender::new()),
        };

        let events = match &config.event_log {
            Some(path) => EventEmitter::new(TeeSink::new(LogSink, JsonlSink::new(path))),
            None => EventEmitter::new(LogSink),
        };

        Ok(Self {
            settings,
            clock: Arc::new(SystemClock),
            store: Arc::new(JsonlMailStore::new(&config.store_path)),
            sender,
            events,
        })
    }

    pub fn dispatcher(&self) -> Result<ScheduledDispatcher, ConfigError> {
        let (store_timeout, send_timeout) = self.settings.timeouts().map_err(invalid_timeout)?;
        Ok(ScheduledDispatcher::new(
            self.store.clone(),
            self.sender.clone(),
            MailComposer::new(&self.settings),
            self.clock.clone(),
        )
        .with_grace(self.settings.dispatch_grace)
        .with_timeouts(store_timeout, send_timeout)
        .with_events(self.events.clone()))
    }
}

impl AppState {
    /// Wire the services. Spawns the limiter sweep, so call inside a runtime.
    pub fn build(
        components: &Components,
        identity: Arc<dyn IdentityResolver>,
    ) -> Result<Self, ConfigError> {
        let settings = &components.settings;
        let (store_timeout, send_timeout) = settings.timeouts().map_err(invalid_timeout)?;
        let limiter = settings.limiter_config().map_err(|err| ConfigError::Invalid {
            key: "limiter periods",
            value: format!("{:?}/{:?}", settings.normal_period, settings.test_period),
            reason: err.to_string(),
        })?;
        let registry = LimiterRegistry::new(limiter, components.clock.clone())
            .with_events(components.events.clone())
            .start();
        let gate = SendGate::new(registry.clone()).with_bypass(settings.bypass_limits());

        let coordinator = ScheduleCoordinator::new(components.store.clone(), components.clock.clone())
            .with_margin(settings.schedule_margin)
            .with_timeout(store_timeout)
            .with_events(components.events.clone());
        let mail = MailService::new(
            gate.clone(),
            coordinator,
            MailComposer::new(settings),
            components.sender.clone(),
        )
        .with_send_timeout(send_timeout);
        let digest = DigestService::new(components.store.clone(), gate, components.clock.clone())
            .with_timeout(store_timeout);

        Ok(Self { identity, mail, digest, registry })
    }

    pub fn identity_for(config: &Config) -> Result<Arc<dyn IdentityResolver>, ConfigError> {
        if config.mode.is_debug() {
            return Ok(Arc::new(StaticResolver::debug_user()));
        }
        Ok(Arc::new(UserInfoResolver::new(config.require_auth_domain()?)))
    }
}
