use axum::Json;
use axum::extract::{Path, State};
use metrics::counter;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::GradeError;
use crate::types::{AppState, SubmissionRequest, Verdict};

#[derive(Deserialize)]
pub struct SubmitBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
}

pub async fn submit_solution_endpoint(
    State(state): State<AppState>,
    Path(problem_id): Path<String>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<Value>, GradeError> {
    counter!("requests_total").increment(1);

    let summary = state
        .grader
        .submit_solution(SubmissionRequest {
            problem_id,
            user_id: body.user_id,
            code: body.code,
            language: body.language,
        })
        .await?;

    let passed = summary.verdict == Verdict::Accepted;
    Ok(Json(json!({
        "success": passed,
        "passed": passed,
        "result": summary,
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use super::*;
    use crate::executor::ExecutorRegistry;
    use crate::grader::GradingService;
    use crate::handlers::router;
    use crate::store::MemoryStore;
    use crate::testing::{SUM_SOLUTION, ScriptedExecutor, sum_problem};
    use crate::types::{GradingConfig, SandboxConfig};

    async fn app() -> axum::Router {
        let store = Arc::new(MemoryStore::new());
        store.insert_problem(sum_problem()).await;
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(ScriptedExecutor::sum()));
        let grader = GradingService::new(
            store,
            Arc::new(registry),
            &SandboxConfig::default(),
            GradingConfig::default(),
        );
        router(AppState {
            grader: Arc::new(grader),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    async fn post(path: &str, body: Value) -> (StatusCode, Value) {
        let response = app()
            .await
            .oneshot(
                Request::post(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn accepted_submission_returns_redacted_summary() {
        let (status, body) = post(
            "/problems/sum/submit",
            json!({ "user_id": "u1", "code": SUM_SOLUTION, "language": "javascript" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["passed"], json!(true));
        assert_eq!(body["result"]["verdict"], json!("accepted"));
        assert_eq!(body["result"]["passedCount"], json!(2));
        assert_eq!(body["result"]["totalCount"], json!(2));
        assert_eq!(body["result"]["outcomes"][1]["actualOutput"], json!("Hidden"));
        assert_eq!(body["result"]["outcomes"][1]["input"], json!("Hidden"));
    }

    #[tokio::test]
    async fn missing_code_is_a_bad_request() {
        let (status, body) = post(
            "/problems/sum/submit",
            json!({ "user_id": "u1", "language": "javascript" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn unknown_problem_is_not_found() {
        let (status, _) = post(
            "/problems/missing/submit",
            json!({ "user_id": "u1", "code": SUM_SOLUTION, "language": "javascript" }),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsupported_language_is_a_bad_request() {
        let (status, body) = post(
            "/problems/sum/submit",
            json!({ "user_id": "u1", "code": "print(5)", "language": "python" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], json!("language python is not supported"));
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let response = app()
            .await
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }
}
