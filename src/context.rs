use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::Store;
use crate::services::{Clock, MailAdapter, PushController, SystemClock};

/// Everything a handler needs, passed explicitly with each request
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub mail: Option<Arc<dyn MailAdapter>>,
    pub push: Option<Arc<dyn PushController>>,
}

impl AppContext {
    pub fn new(config: AppConfig, store: Arc<dyn Store>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock: Arc::new(SystemClock),
            mail: None,
            push: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailAdapter>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn with_push(mut self, push: Arc<dyn PushController>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
