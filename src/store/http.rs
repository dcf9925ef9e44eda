use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::wire::{parse_reminder_list, RecordDoseRequest};
use super::{PrescriptionStore, ReminderRecord, StoreError};
use crate::config::EngineConfig;

/// Prescription Store client for the portal's bearer-authenticated JSON API.
pub struct HttpPrescriptionStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpPrescriptionStore {
    /// `base_url` includes the API prefix, e.g. `https://portal.example.org/api`.
    pub fn new(base_url: &str, token: Option<String>, timeout_secs: u64) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, StoreError> {
        Self::new(
            &config.api_base_url,
            config.api_token.clone(),
            config.request_timeout_secs,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send and return the body of a successful response.
    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        prescription_id: Option<Uuid>,
    ) -> Result<String, StoreError> {
        let response = self.authorize(request).send().map_err(|e| {
            if e.is_connect() {
                StoreError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                StoreError::Timeout(self.timeout_secs)
            } else {
                StoreError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .text()
                .map_err(|e| StoreError::ResponseParsing(e.to_string()));
        }

        let body = response.text().unwrap_or_default();
        Err(match (status.as_u16(), prescription_id) {
            (401 | 403, _) => StoreError::Unauthorized,
            (404, Some(id)) => StoreError::PrescriptionNotFound(id),
            (409 | 422, Some(_)) => StoreError::Rejected(body),
            (status, _) => StoreError::Http { status, body },
        })
    }
}

impl PrescriptionStore for HttpPrescriptionStore {
    fn list_reminders(&self, patient_id: Uuid) -> Result<Vec<ReminderRecord>, StoreError> {
        let url = format!("{}/reminders/{}", self.base_url, patient_id);
        let body = self.send(self.client.get(&url), None)?;
        parse_reminder_list(&body, patient_id)
    }

    fn record_dose(
        &self,
        prescription_id: Uuid,
        patient_id: Uuid,
        taken_at: DateTime<Utc>,
    ) -> Result<Vec<ReminderRecord>, StoreError> {
        let url = format!("{}/reminders/{}/doses", self.base_url, prescription_id);
        let request = self
            .client
            .post(&url)
            .json(&RecordDoseRequest::new(patient_id, taken_at));
        let body = self.send(request, Some(prescription_id))?;
        parse_reminder_list(&body, patient_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    const TOKEN: &str = "test-token";
    const RX: &str = "6f1c2a0e-4b7d-4a53-9c55-2f7b8e0d1a10";
    const PATIENT: &str = "0b8f6a6e-9d0f-4a8e-8f2e-5d7c3b1a2e44";

    /// Serve `router` on an ephemeral port from its own runtime thread.
    fn spawn_server(router: Router) -> String {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, router).await.unwrap();
            });
        });
        let addr = rx.recv().unwrap();
        format!("http://{addr}/api")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {TOKEN}"))
    }

    fn reminder_json(events: Vec<Value>) -> Value {
        json!([{
            "_id": RX,
            "patientId": PATIENT,
            "medicationName": "Amoxicillin",
            "dosage": "500mg",
            "frequency": "every 12 hours",
            "issueDate": "2024-01-01T08:00:00Z",
            "totalDoses": 4,
            "doseEvents": events,
        }])
    }

    fn portal() -> Router {
        Router::new()
            .route(
                "/api/reminders/:id",
                get(|Path(id): Path<String>, headers: HeaderMap| async move {
                    if !authorized(&headers) {
                        return StatusCode::UNAUTHORIZED.into_response();
                    }
                    if id != PATIENT {
                        return (StatusCode::NOT_FOUND, "unknown patient").into_response();
                    }
                    Json(reminder_json(vec![json!({"takenAt": "2024-01-01T08:10:00Z"})]))
                        .into_response()
                }),
            )
            .route(
                "/api/reminders/:id/doses",
                post(
                    |Path(id): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        if !authorized(&headers) {
                            return StatusCode::UNAUTHORIZED.into_response();
                        }
                        if id != RX {
                            return StatusCode::NOT_FOUND.into_response();
                        }
                        if body["patient_id"] != PATIENT {
                            return (StatusCode::CONFLICT, "patient mismatch").into_response();
                        }
                        Json(reminder_json(vec![
                            json!("2024-01-01T08:10:00Z"),
                            json!({"taken_at": body["taken_at"].clone()}),
                        ]))
                        .into_response()
                    },
                ),
            )
    }

    fn store(base: &str, token: Option<&str>) -> HttpPrescriptionStore {
        HttpPrescriptionStore::new(base, token.map(String::from), 5).unwrap()
    }

    fn patient() -> Uuid {
        Uuid::parse_str(PATIENT).unwrap()
    }

    fn rx() -> Uuid {
        Uuid::parse_str(RX).unwrap()
    }

    #[test]
    fn list_reminders_normalizes_response() {
        let base = spawn_server(portal());
        let records = store(&base, Some(TOKEN)).list_reminders(patient()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prescription.id, rx());
        assert_eq!(records[0].prescription.medication_name(), "Amoxicillin");
        assert_eq!(records[0].dose_events.len(), 1);
    }

    #[test]
    fn missing_token_is_unauthorized() {
        let base = spawn_server(portal());
        let err = store(&base, None).list_reminders(patient()).unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized));
        assert!(!err.is_transient());
    }

    #[test]
    fn record_dose_posts_and_returns_updated_list() {
        let base = spawn_server(portal());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 20, 1, 0).unwrap();
        let records = store(&base, Some(TOKEN)).record_dose(rx(), patient(), at).unwrap();
        let times: Vec<_> = records[0].dose_events.iter().map(|e| e.taken_at).collect();
        assert_eq!(times.len(), 2);
        assert_eq!(times[1], at);
    }

    #[test]
    fn record_dose_for_unknown_prescription() {
        let base = spawn_server(portal());
        let other = Uuid::new_v4();
        let err = store(&base, Some(TOKEN))
            .record_dose(other, patient(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::PrescriptionNotFound(id) if id == other));
    }

    #[test]
    fn conflict_is_rejection() {
        let base = spawn_server(portal());
        let err = store(&base, Some(TOKEN))
            .record_dose(rx(), Uuid::new_v4(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(body) if body == "patient mismatch"));
    }

    #[test]
    fn server_errors_are_transient() {
        let router = Router::new().route(
            "/api/reminders/:id",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let base = spawn_server(router);
        let err = store(&base, Some(TOKEN)).list_reminders(patient()).unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 503, ref body } if body == "maintenance"));
        assert!(err.is_transient());
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let base = format!("http://127.0.0.1:{port}/api");
        let err = store(&base, Some(TOKEN)).list_reminders(patient()).unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn from_config_trims_trailing_slash() {
        let config = EngineConfig {
            api_base_url: "https://portal.example.org/api/".into(),
            ..EngineConfig::default()
        };
        let store = HttpPrescriptionStore::from_config(&config).unwrap();
        assert_eq!(store.base_url(), "https://portal.example.org/api");
    }
}
