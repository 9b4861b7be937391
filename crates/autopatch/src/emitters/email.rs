//! SMTP delivery of the report.

use super::{EmitError, Emitter};
use async_trait::async_trait;
use autopatch_common::config::{EmailConfig, EmailTls};
use autopatch_common::{Report, RunResult};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub struct EmailEmitter {
    from: Mailbox,
    to: Vec<Mailbox>,
    host: String,
    port: u16,
    tls: EmailTls,
}

impl EmailEmitter {
    pub fn from_config(config: &EmailConfig) -> Result<Self, EmitError> {
        let from = config
            .email_from
            .parse::<Mailbox>()
            .map_err(|e| EmitError::Config(format!("email_from '{}': {}", config.email_from, e)))?;
        let to = config
            .email_to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| EmitError::Config(format!("email_to '{}': {}", addr, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(EmitError::Config("email_to is empty".to_string()));
        }

        Ok(Self {
            from,
            to,
            host: config.email_host.clone(),
            port: config.email_port,
            tls: config.email_tls,
        })
    }

    fn message(&self, report: &Report) -> Result<Message, EmitError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(report.title.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .body(report.body.clone())
            .map_err(|e| EmitError::Mail(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, EmitError> {
        let builder = match self.tls {
            EmailTls::No => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host),
            EmailTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
                .map_err(|e| EmitError::Mail(e.to_string()))?,
            EmailTls::Yes => AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
                .map_err(|e| EmitError::Mail(e.to_string()))?,
        };
        Ok(builder.port(self.port).build())
    }
}

#[async_trait]
impl Emitter for EmailEmitter {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn emit(&self, _result: &RunResult, report: &Report) -> Result<(), EmitError> {
        let message = self.message(report)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| EmitError::Mail(e.to_string()))?;
        info!(
            "Report mailed to {} recipients via {}:{}",
            self.to.len(),
            self.host,
            self.port
        );
        Ok(())
    }
}
