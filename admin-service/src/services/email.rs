use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::SecurityLevel;
use crate::services::alerts::AlertEmail;
use crate::services::error::ServiceError;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
        base_url: &str,
    ) -> Result<(), ServiceError>;

    async fn send_security_alert_email(
        &self,
        to_email: &str,
        alert: &AlertEmail,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &crate::config::SmtpConfig) -> Result<Self, ServiceError> {
        let creds = Credentials::new(config.user.clone(), config.app_password.clone());

        let mailer = SmtpTransport::relay(&config.relay)
            .map_err(|e| ServiceError::Email(e.to_string()))?
            .credentials(creds)
            .port(587)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(relay = %config.relay, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.user.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), ServiceError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| {
                        ServiceError::Email(e.to_string())
                    })?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::Email(e.to_string()))?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| ServiceError::Email(e.to_string()))?;

        // Send in the blocking pool to keep the async runtime free
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), to = %to_email, "Failed to send email");
                Err(ServiceError::Email(e.to_string()))
            }
        }
    }
}

fn severity_color(level: SecurityLevel) -> &'static str {
    match level {
        SecurityLevel::Critical => "e74c3c",
        SecurityLevel::Warning => "f39c12",
        SecurityLevel::Info => "3498db",
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
        base_url: &str,
    ) -> Result<(), ServiceError> {
        let reset_link = format!("{}/auth/password-reset/confirm?token={}", base_url, reset_token);

        let html_body = format!(
            r###"            <html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>Password Reset Request</h2>
                    <p>We received a request to reset your password. Click the link below to set a new password:</p>
                    <p>
                        <a href="{}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                            Reset Password
                        </a>
                    </p>
                    <p style="color: #666; font-size: 12px;">
                        This link will expire in 10 minutes. If you didn't request this, please ignore this email.
                    </p>
                </body>
            </html>
            "###,
            reset_link
        );

        let plain_body = format!(
            "Password Reset Request\n\nWe received a request to reset your password. Please visit the following link to set a new password:\n\n{}\n\nThis link will expire in 10 minutes. If you didn't request this, please ignore this email.",
            reset_link
        );

        self.send_email(to_email, "Reset Your Password", &plain_body, &html_body)
            .await
    }

    async fn send_security_alert_email(
        &self,
        to_email: &str,
        alert: &AlertEmail,
    ) -> Result<(), ServiceError> {
        let subject = format!(
            "[Security Alert] {} severity: {}",
            alert.severity.label(),
            alert.type_name
        );

        let mut detail_items = String::new();
        let mut detail_lines = String::new();
        for (label, value) in alert.detail_rows() {
            detail_items.push_str(&format!("<li>{}: {}</li>", label, value));
            detail_lines.push_str(&format!("- {}: {}\n", label, value));
        }

        let subject_line = match &alert.subject_identity {
            Some(identity) => format!("<p>User: {}</p>", identity),
            None => "<p>User: unknown</p>".to_string(),
        };

        let html_body = format!(
            r###"            <html>
                <body style="font-family: Arial, sans-serif;">
                    <h2 style="color: #{color}">{severity} severity security alert: {type_name}</h2>
                    <p>Alert time: {timestamp}</p>
                    {subject_line}
                    <h3>Alert details:</h3>
                    <ul>
                        {details}
                    </ul>
                    <p>Please review the system's security status promptly.</p>
                </body>
            </html>
            "###,
            color = severity_color(alert.severity),
            severity = alert.severity.label(),
            type_name = alert.type_name,
            timestamp = alert.timestamp.to_rfc3339(),
            subject_line = subject_line,
            details = detail_items,
        );

        let plain_body = format!(
            "{severity} severity security alert: {type_name}\nAlert time: {timestamp}\nUser: {subject}\n\nDetails:\n{details}\nPlease review the system's security status promptly.",
            severity = alert.severity.label(),
            type_name = alert.type_name,
            timestamp = alert.timestamp.to_rfc3339(),
            subject = alert.subject_identity.as_deref().unwrap_or("unknown"),
            details = detail_lines,
        );

        self.send_email(to_email, &subject, &plain_body, &html_body)
            .await
    }
}

/// Recording mock - tests assert on what would have been delivered.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<SentEmail>>,
    fail_sends: bool,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub kind: SentEmailKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmailKind {
    PasswordReset,
    SecurityAlert { type_name: String, severity: SecurityLevel },
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose sends always fail - exercises best-effort delivery.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_sends: true,
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        _reset_token: &str,
        _base_url: &str,
    ) -> Result<(), ServiceError> {
        if self.fail_sends {
            return Err(ServiceError::Email("mock delivery failure".to_string()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to_email.to_string(),
            kind: SentEmailKind::PasswordReset,
        });
        Ok(())
    }

    async fn send_security_alert_email(
        &self,
        to_email: &str,
        alert: &AlertEmail,
    ) -> Result<(), ServiceError> {
        if self.fail_sends {
            return Err(ServiceError::Email("mock delivery failure".to_string()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to_email.to_string(),
            kind: SentEmailKind::SecurityAlert {
                type_name: alert.type_name.clone(),
                severity: alert.severity,
            },
        });
        Ok(())
    }
}
