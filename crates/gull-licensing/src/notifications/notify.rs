use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{DispatchOutcome, Notification, NotificationDispatcher, NotificationError, NotificationTemplate};
use crate::config::NotifyConfig;

const UUID_LEN: usize = 36;

/// Template ids registered with the provider, one per workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyTemplates {
    pub amendment: String,
    pub return_submitted: String,
}

impl NotifyTemplates {
    fn id_for(&self, template: NotificationTemplate) -> &str {
        match template {
            NotificationTemplate::Amendment => &self.amendment,
            NotificationTemplate::Return => &self.return_submitted,
        }
    }
}

#[derive(Clone)]
struct Credentials {
    service_id: String,
    secret: String,
}

impl Credentials {
    /// Keys look like `{name}-{service id}-{secret}` where both ids are 36-character UUIDs.
    fn parse(api_key: &str) -> Result<Self, NotificationError> {
        let key = api_key.trim();
        if !key.is_ascii() || key.len() < 2 * UUID_LEN + 3 {
            return Err(NotificationError::InvalidApiKey);
        }
        let secret_start = key.len() - UUID_LEN;
        let service_start = secret_start - 1 - UUID_LEN;
        if &key[secret_start - 1..secret_start] != "-" || &key[service_start - 1..service_start] != "-"
        {
            return Err(NotificationError::InvalidApiKey);
        }
        Ok(Self {
            service_id: key[service_start..secret_start - 1].to_string(),
            secret: key[secret_start..].to_string(),
        })
    }

    fn token(&self) -> Result<String, NotificationError> {
        let claims = Claims {
            iss: self.service_id.clone(),
            iat: Utc::now().timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    email_address: &'a str,
    template_id: &'a str,
    personalisation: &'a std::collections::BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_reply_to_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmailResponse {
    id: Option<String>,
}

/// GOV.UK Notify email client. Without an API key every send is a logged no-op.
#[derive(Clone)]
pub struct NotifyClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    templates: NotifyTemplates,
    reply_to_id: Option<String>,
}

impl fmt::Debug for NotifyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyClient")
            .field("base_url", &self.base_url)
            .field(
                "service_id",
                &self.credentials.as_ref().map(|credentials| &credentials.service_id),
            )
            .field("templates", &self.templates)
            .field("reply_to_id", &self.reply_to_id)
            .finish_non_exhaustive()
    }
}

impl NotifyClient {
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotificationError> {
        let credentials = config
            .api_key
            .as_deref()
            .map(Credentials::parse)
            .transpose()?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            templates: NotifyTemplates {
                amendment: config.amendment_template_id.clone(),
                return_submitted: config.return_template_id.clone(),
            },
            reply_to_id: config.reply_to_id.clone(),
        })
    }

    /// Client that never contacts the provider.
    pub fn disabled(templates: NotifyTemplates) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: String::new(),
            credentials: None,
            templates,
            reply_to_id: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    fn email_url(&self) -> String {
        format!("{}/v2/notifications/email", self.base_url)
    }
}

#[async_trait]
impl NotificationDispatcher for NotifyClient {
    async fn send(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError> {
        let Some(credentials) = &self.credentials else {
            info!(
                template = ?notification.template,
                "notifications disabled; skipping email"
            );
            return Ok(DispatchOutcome::Disabled);
        };

        let body = EmailRequest {
            email_address: &notification.recipient,
            template_id: self.templates.id_for(notification.template),
            personalisation: &notification.personalisation,
            reference: notification.reference.as_deref(),
            email_reply_to_id: self.reply_to_id.as_deref(),
        };

        let response = self
            .http
            .post(self.email_url())
            .bearer_auth(credentials.token()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmailResponse = response.json().await?;
        debug!(provider_id = ?parsed.id, "notify accepted email");
        Ok(DispatchOutcome::Sent {
            provider_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use jsonwebtoken::{decode, DecodingKey, Validation};

    const SERVICE_ID: &str = "26785a09-ab16-4eb0-8407-a37497a57506";
    const SECRET: &str = "3d844edf-8d35-48ac-975b-e847b4f122b0";

    fn api_key() -> String {
        format!("gull_licensing_test-{SERVICE_ID}-{SECRET}")
    }

    fn config(api_key: Option<String>) -> NotifyConfig {
        NotifyConfig {
            api_key,
            base_url: "http://127.0.0.1:9/".to_string(),
            amendment_template_id: "amendment-template".to_string(),
            return_template_id: "return-template".to_string(),
            reply_to_id: None,
            internal_mailbox: "licensing@example.org".to_string(),
            retry_attempts: 1,
        }
    }

    #[test]
    fn parses_service_id_and_secret_from_api_key() {
        let credentials = Credentials::parse(&api_key()).expect("key parses");
        assert_eq!(credentials.service_id, SERVICE_ID);
        assert_eq!(credentials.secret, SECRET);
    }

    #[test]
    fn rejects_truncated_api_key() {
        assert!(matches!(
            Credentials::parse("short-key"),
            Err(NotificationError::InvalidApiKey)
        ));
    }

    #[test]
    fn token_is_signed_with_secret_and_names_service() {
        let credentials = Credentials::parse(&api_key()).expect("key parses");
        let token = credentials.token().expect("token signs");

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(SECRET.as_bytes()),
            &validation,
        )
        .expect("token verifies");
        assert_eq!(decoded.claims.iss, SERVICE_ID);
    }

    #[test]
    fn debug_output_hides_secret() {
        let client = NotifyClient::from_config(&config(Some(api_key()))).expect("client builds");
        let rendered = format!("{client:?}");
        assert!(rendered.contains(SERVICE_ID));
        assert!(!rendered.contains(SECRET));
        assert_eq!(client.email_url(), "http://127.0.0.1:9/v2/notifications/email");
    }

    #[tokio::test]
    async fn disabled_client_skips_outbound_call() {
        let client = NotifyClient::from_config(&config(None)).expect("client builds");
        assert!(!client.is_enabled());

        let outcome = client
            .send(Notification::new(
                NotificationTemplate::Amendment,
                "holder@example.com",
                BTreeMap::new(),
            ))
            .await
            .expect("disabled send succeeds");
        assert_eq!(outcome, DispatchOutcome::Disabled);
    }
}
