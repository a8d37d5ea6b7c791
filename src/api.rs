use std::time::Duration;

use chuju_quiz::{
    limit_quizzes_by_count, AnswerOutcome, Category, Completion, HistoryFilter, Quiz, QuizConfig,
    QuizDraft, RawAnswerRecord, Unit, UserProfile, UserStats,
};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("authorization failed: {0}")]
    Unauthorized(String),
    #[error("{message} ({status})")]
    Status { status: StatusCode, message: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::NotLoggedIn)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Auth {
    Anon,
    User,
}

#[derive(Serialize, Debug)]
struct Credentials<'a> {
    name: &'a str,
    password: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: SecretString,
    pub user: UserProfile,
}

#[derive(Deserialize, Debug)]
struct QuizzesResponse {
    #[serde(default)]
    quizzes: Vec<Quiz>,
}

#[derive(Deserialize, Debug)]
struct CategoriesResponse {
    #[serde(default)]
    categories: Vec<Category>,
}

#[derive(Deserialize, Debug)]
struct UnitsResponse {
    #[serde(default)]
    units: Vec<Unit>,
}

#[derive(Deserialize, Debug, Default)]
pub struct StatsResponse {
    #[serde(default)]
    pub stats: UserStats,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

#[derive(Deserialize, Debug)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<RawAnswerRecord>,
}

#[derive(Deserialize, Debug)]
struct CreatedResponse {
    id: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuizQuery {
    pub subject: Option<String>,
    pub unit: Option<String>,
    pub difficulty: Option<u8>,
    pub count: Option<usize>,
    pub history_filter: Option<HistoryFilter>,
}

impl QuizQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();

        if let Some(subject) = &self.subject {
            pairs.push(("subject", subject.clone()));
        }
        if let Some(unit) = &self.unit {
            pairs.push(("unit", unit.clone()));
        }
        if let Some(difficulty) = self.difficulty {
            pairs.push(("difficulty", difficulty.to_string()));
        }
        if let Some(count) = self.count {
            pairs.push(("count", count.to_string()));
        }
        if let Some(history_filter) = self.history_filter {
            pairs.push(("historyFilter", history_filter.as_str().to_owned()));
        }

        pairs
    }
}

impl From<&QuizConfig> for QuizQuery {
    fn from(config: &QuizConfig) -> Self {
        Self {
            subject: config.subject.clone(),
            unit: config.unit.clone(),
            difficulty: config.difficulty,
            count: Some(config.count),
            history_filter: config.history_filter,
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Bug,
    Content,
    Feature,
    Other,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    pub page_context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<String>,
}

/// Each call carries either the public anon key or the user's session token
/// as its bearer credential. No retries, no caching.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    anon_key: SecretString,
    token: Option<SecretString>,
}

impl ApiClient {
    pub fn new(base_url: Url, anon_key: SecretString) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            base_url,
            anon_key,
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.token = token;
        self
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');

        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    fn credential(&self, auth: Auth) -> Result<&SecretString, ApiError> {
        match auth {
            Auth::Anon => Ok(&self.anon_key),
            Auth::User => self.token.as_ref().ok_or(ApiError::NotLoggedIn),
        }
    }

    fn builder(&self, method: Method, path: &str, auth: Auth) -> Result<RequestBuilder, ApiError> {
        self.builder_for_url(method, self.endpoint(path)?, auth)
    }

    fn builder_for_url(
        &self,
        method: Method,
        url: Url,
        auth: Auth,
    ) -> Result<RequestBuilder, ApiError> {
        let credential = self.credential(auth)?;

        Ok(self
            .http
            .request(method, url)
            .bearer_auth(credential.expose_secret()))
    }

    async fn execute<T: DeserializeOwned>(&self, request: Request) -> Result<T, ApiError> {
        let response = self.send(request).await?;

        Ok(response.json().await?)
    }

    async fn execute_ack(&self, request: Request) -> Result<(), ApiError> {
        self.send(request).await?;

        Ok(())
    }

    async fn send(&self, request: Request) -> Result<Response, ApiError> {
        let method = request.method().clone();
        let path = request.url().path().to_owned();

        tracing::debug!(%method, %path, "sending request");

        let response = self.http.execute(request).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(status, &body);

        tracing::debug!(%method, %path, %status, %message, "request failed");

        if is_authorization_failure(status, &message) {
            Err(ApiError::Unauthorized(message))
        } else {
            Err(ApiError::Status { status, message })
        }
    }

    pub(crate) fn login_request(&self, name: &str, password: &str) -> Result<Request, ApiError> {
        Ok(self
            .builder(Method::POST, "login", Auth::Anon)?
            .json(&Credentials { name, password })
            .build()?)
    }

    pub async fn login(&self, name: &str, password: &str) -> Result<LoginResponse, ApiError> {
        self.execute(self.login_request(name, password)?).await
    }

    pub async fn signup(&self, name: &str, password: &str) -> Result<Value, ApiError> {
        let request = self
            .builder(Method::POST, "signup", Auth::Anon)?
            .json(&Credentials { name, password })
            .build()?;

        self.execute(request).await
    }

    /// Uses the session token only when a history filter needs the user's answers.
    pub(crate) fn quizzes_request(&self, query: &QuizQuery) -> Result<Request, ApiError> {
        let auth = if query.history_filter.is_some() {
            Auth::User
        } else {
            Auth::Anon
        };

        Ok(self
            .builder(Method::GET, "quizzes", auth)?
            .query(&query.pairs())
            .build()?)
    }

    pub async fn get_quizzes(&self, query: &QuizQuery) -> Result<Vec<Quiz>, ApiError> {
        let response: QuizzesResponse = self.execute(self.quizzes_request(query)?).await?;

        Ok(limit_quizzes_by_count(response.quizzes, query.count))
    }

    pub async fn get_categories(&self) -> Result<Vec<Category>, ApiError> {
        let request = self.builder(Method::GET, "categories", Auth::Anon)?.build()?;
        let response: CategoriesResponse = self.execute(request).await?;

        Ok(response.categories)
    }

    pub(crate) fn units_request(&self, subject: &str) -> Result<Request, ApiError> {
        Ok(self
            .builder(Method::GET, "units", Auth::Anon)?
            .query(&[("subject", subject)])
            .build()?)
    }

    pub async fn get_units(&self, subject: &str) -> Result<Vec<Unit>, ApiError> {
        let response: UnitsResponse = self.execute(self.units_request(subject)?).await?;

        Ok(response.units)
    }

    pub(crate) fn save_answer_request(&self, outcome: &AnswerOutcome) -> Result<Request, ApiError> {
        Ok(self
            .builder(Method::POST, "answers", Auth::User)?
            .json(outcome)
            .build()?)
    }

    pub async fn save_answer(&self, outcome: &AnswerOutcome) -> Result<(), ApiError> {
        self.execute_ack(self.save_answer_request(outcome)?).await
    }

    pub async fn complete_quiz(&self, completion: &Completion) -> Result<(), ApiError> {
        let request = self
            .builder(Method::POST, "complete-quiz", Auth::User)?
            .json(completion)
            .build()?;

        self.execute_ack(request).await
    }

    pub async fn get_stats(&self) -> Result<StatsResponse, ApiError> {
        let request = self.builder(Method::GET, "stats", Auth::User)?.build()?;

        self.execute(request).await
    }

    pub async fn get_history(&self) -> Result<Vec<RawAnswerRecord>, ApiError> {
        let request = self.builder(Method::GET, "history", Auth::User)?.build()?;
        let response: HistoryResponse = self.execute(request).await?;

        Ok(response.history)
    }

    pub(crate) fn delete_request(&self, collection: &str, id: &str) -> Result<Request, ApiError> {
        let mut url = self.endpoint(collection)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .push(id);

        Ok(self
            .builder_for_url(Method::DELETE, url, Auth::User)?
            .build()?)
    }

    pub async fn delete_answer(&self, id: &str) -> Result<(), ApiError> {
        self.execute_ack(self.delete_request("answers", id)?).await
    }

    pub async fn delete_quiz(&self, id: &str) -> Result<(), ApiError> {
        self.execute_ack(self.delete_request("quizzes", id)?).await
    }

    pub async fn create_quiz(&self, draft: &QuizDraft) -> Result<String, ApiError> {
        let request = self
            .builder(Method::POST, "quizzes", Auth::User)?
            .json(draft)
            .build()?;
        let response: CreatedResponse = self.execute(request).await?;

        Ok(match response.id {
            Value::String(id) => id,
            other => other.to_string(),
        })
    }

    pub(crate) fn feedback_request(&self, feedback: &Feedback) -> Result<Request, ApiError> {
        Ok(self
            .builder(Method::POST, "feedback", Auth::User)?
            .json(feedback)
            .build()?)
    }

    pub async fn submit_feedback(&self, feedback: &Feedback) -> Result<(), ApiError> {
        self.execute_ack(self.feedback_request(feedback)?).await
    }
}

/// Prefers the server's `error` or `message` field over the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        ["error", "message", "msg"]
            .iter()
            .find_map(|key| json.get(key).and_then(Value::as_str).map(str::to_owned))
    });

    from_json
        .or_else(|| Some(body.trim().to_owned()).filter(|body| !body.is_empty()))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        })
}

fn is_authorization_failure(status: StatusCode, message: &str) -> bool {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return true;
    }

    let message = message.to_lowercase();
    ["unauthorized", "invalid jwt", "jwt expired", "invalid token"]
        .iter()
        .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub_server;

    fn client() -> ApiClient {
        ApiClient::new(
            Url::parse("https://example.supabase.co/functions/v1/make-server-quiz/").unwrap(),
            SecretString::new("anon-key".to_owned()),
        )
        .unwrap()
    }

    fn bearer(request: &Request) -> &str {
        request
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    fn body_json(request: &Request) -> Value {
        let bytes = request.body().and_then(|body| body.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn login_uses_anon_key() {
        let request = client().login_request("taro", "secret").unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://example.supabase.co/functions/v1/make-server-quiz/login"
        );
        assert_eq!(bearer(&request), "Bearer anon-key");
        assert_eq!(
            body_json(&request),
            serde_json::json!({"name": "taro", "password": "secret"})
        );
    }

    #[test]
    fn quizzes_query_and_credential() {
        let query = QuizQuery {
            subject: Some("社会".to_owned()),
            difficulty: Some(3),
            count: Some(5),
            ..Default::default()
        };
        let request = client().quizzes_request(&query).unwrap();

        assert_eq!(bearer(&request), "Bearer anon-key");
        let pairs = request.url().query_pairs().into_owned().collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                ("subject".to_owned(), "社会".to_owned()),
                ("difficulty".to_owned(), "3".to_owned()),
                ("count".to_owned(), "5".to_owned()),
            ]
        );

        let filtered = QuizQuery {
            history_filter: Some(HistoryFilter::Unanswered),
            ..Default::default()
        };
        assert!(matches!(
            client().quizzes_request(&filtered),
            Err(ApiError::NotLoggedIn)
        ));

        let request = client()
            .with_token(Some(SecretString::new("user-token".to_owned())))
            .quizzes_request(&filtered)
            .unwrap();
        assert_eq!(bearer(&request), "Bearer user-token");
        assert_eq!(request.url().query(), Some("historyFilter=unanswered"));
    }

    #[test]
    fn writes_need_a_session() {
        let outcome = AnswerOutcome {
            quiz_id: "q1".to_owned(),
            user_answer: "徳川".to_owned(),
            is_correct: true,
        };

        assert!(matches!(
            client().save_answer_request(&outcome),
            Err(ApiError::NotLoggedIn)
        ));

        let request = client()
            .with_token(Some(SecretString::new("user-token".to_owned())))
            .save_answer_request(&outcome)
            .unwrap();

        assert_eq!(request.url().path(), "/functions/v1/make-server-quiz/answers");
        assert_eq!(
            body_json(&request),
            serde_json::json!({"quizId": "q1", "userAnswer": "徳川", "isCorrect": true})
        );
    }

    #[test]
    fn delete_escapes_the_id() {
        let request = client()
            .with_token(Some(SecretString::new("user-token".to_owned())))
            .delete_request("answers", "a/1")
            .unwrap();

        assert_eq!(request.method(), Method::DELETE);
        assert_eq!(
            request.url().path(),
            "/functions/v1/make-server-quiz/answers/a%2F1"
        );
    }

    #[test]
    fn units_and_feedback_bodies() {
        let request = client().units_request("理科").unwrap();
        assert_eq!(
            request.url().query_pairs().into_owned().collect::<Vec<_>>(),
            vec![("subject".to_owned(), "理科".to_owned())]
        );

        let feedback = Feedback {
            kind: FeedbackKind::Content,
            subject: None,
            message: "答えが違います".to_owned(),
            page_context: "quiz".to_owned(),
            quiz_id: Some("q9".to_owned()),
        };
        let request = client()
            .with_token(Some(SecretString::new("user-token".to_owned())))
            .feedback_request(&feedback)
            .unwrap();

        assert_eq!(
            body_json(&request),
            serde_json::json!({
                "type": "content",
                "message": "答えが違います",
                "pageContext": "quiz",
                "quizId": "q9",
            })
        );
    }

    #[tokio::test]
    async fn quizzes_are_capped_client_side() {
        let url = stub_server::respond(
            "200 OK",
            r#"{"quizzes":[
                {"id":"q1","question":"?","answer":"a"},
                {"id":"q2","question":"?","answer":"a"},
                {"id":"q3","question":"?","answer":"a"}
            ]}"#,
        )
        .await;
        let api = ApiClient::new(url, SecretString::new("anon-key".to_owned())).unwrap();

        let quizzes = api
            .get_quizzes(&QuizQuery {
                count: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            quizzes.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(),
            vec!["q1", "q2"]
        );
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let url = stub_server::respond("401 Unauthorized", r#"{"error":"Invalid JWT"}"#).await;
        let api = ApiClient::new(url, SecretString::new("anon-key".to_owned()))
            .unwrap()
            .with_token(Some(SecretString::new("stale".to_owned())));

        let error = api.get_stats().await.unwrap_err();

        assert!(error.is_unauthorized());
        assert!(matches!(error, ApiError::Unauthorized(message) if message == "Invalid JWT"));
    }

    #[tokio::test]
    async fn server_errors_keep_their_message() {
        let url =
            stub_server::respond("500 Internal Server Error", r#"{"message":"db down"}"#).await;
        let api = ApiClient::new(url, SecretString::new("anon-key".to_owned())).unwrap();

        let error = api.get_categories().await.unwrap_err();

        assert!(!error.is_unauthorized());
        assert!(matches!(
            error,
            ApiError::Status { status, message }
                if status == StatusCode::INTERNAL_SERVER_ERROR && message == "db down"
        ));
    }

    #[tokio::test]
    async fn numeric_created_id() {
        let url = stub_server::respond("200 OK", r#"{"id":42}"#).await;
        let api = ApiClient::new(url, SecretString::new("anon-key".to_owned()))
            .unwrap()
            .with_token(Some(SecretString::new("user-token".to_owned())));
        let draft: QuizDraft =
            serde_json::from_value(serde_json::json!({"question": "?", "answer": "a"})).unwrap();

        assert_eq!(api.create_quiz(&draft).await.unwrap(), "42");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let api = ApiClient::new(stub_server::closed(), SecretString::new("anon-key".to_owned()))
            .unwrap();

        let error = api.get_units("社会").await.unwrap_err();

        assert!(matches!(error, ApiError::Transport(_)));
        assert!(!error.is_unauthorized());
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error":"name taken"}"#),
            "name taken"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream down\n"),
            "upstream down"
        );
        assert_eq!(error_message(StatusCode::NOT_FOUND, ""), "Not Found");
    }

    #[test]
    fn authorization_failures() {
        assert!(is_authorization_failure(StatusCode::UNAUTHORIZED, ""));
        assert!(is_authorization_failure(StatusCode::FORBIDDEN, ""));
        assert!(is_authorization_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid JWT"
        ));
        assert!(!is_authorization_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "database timeout"
        ));
    }
}
