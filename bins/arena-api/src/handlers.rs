// HTTP route handlers for the Arena API

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use arena_common::types::{Job, Language, NewProblem, ProblemSummary, ProblemView, SessionId, Verdict};
use arena_engine::sanitize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::matchmaking::MatchError;
use crate::metrics;
use crate::problems::{sort_problems, ProblemStore};
use crate::AppState;

/// A problem id sent either as a number or as a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdField {
    Number(u32),
    Text(String),
}

impl IdField {
    fn parse(&self, field: &str) -> Result<u32, ApiError> {
        match self {
            IdField::Number(id) => Ok(*id),
            IdField::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ApiError::Validation(format!("{} must be a problem id", field))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunCodeRequest {
    pub code: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunCodeResponse {
    pub output: String,
    pub runtime: f64,
    #[serde(rename = "memoryUsage", skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCodeRequest {
    pub code: Option<String>,
    pub language: Option<String>,
    #[serde(rename = "PID")]
    pub problem_id: Option<IdField>,
}

#[derive(Debug, Serialize)]
pub struct VerdictResponse {
    pub msg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnterBattleRequest {
    #[serde(rename = "SID")]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Serialize)]
pub struct EnterBattleResponse {
    #[serde(rename = "problemID")]
    pub problem_id: u32,
    #[serde(rename = "battleID")]
    pub battle_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBattleRequest {
    pub code: Option<String>,
    pub language: Option<String>,
    /// Informational only; the battle's own problem is judged
    #[serde(rename = "PID")]
    pub problem_id: Option<IdField>,
    #[serde(rename = "BID")]
    pub battle_id: Option<String>,
    #[serde(rename = "SID")]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub sort: Option<String>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::Validation(format!("{} is required", field))),
    }
}

fn language(value: Option<String>) -> Result<Language, ApiError> {
    let raw = required(value, "language")?;
    Language::from_str(&raw).ok_or_else(|| {
        ApiError::Validation(format!("Unsupported language '{}': expected c or cpp", raw))
    })
}

fn verdict_response(judgement: &arena_engine::Judgement) -> VerdictResponse {
    VerdictResponse {
        msg: judgement.verdict.message(),
        error: judgement.detail.as_deref().map(sanitize::for_display),
    }
}

/// POST /run-code - Compile and run against caller-supplied stdin
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunCodeRequest>, JsonRejection>,
) -> Result<Json<RunCodeResponse>, ApiError> {
    let req = body(payload)?;
    let code = required(req.code, "Code")?;
    let language = language(req.language)?;
    let job = Job::new(code, req.inputs, language);

    let result = state.pipeline.execute(&job).await;
    metrics::record_job("run", result.as_ref().err());
    let result = result?;

    metrics::JOB_RUNTIME_SECONDS.observe(result.runtime_seconds);
    info!(job_id = %job.id, language = %language, runtime_s = result.runtime_seconds, "Code run finished");

    Ok(Json(RunCodeResponse {
        output: sanitize::for_display(&result.output_text()),
        runtime: result.runtime_seconds,
        memory_usage: result.memory_usage_bytes,
    }))
}

/// POST /submit-code - Judge against a problem's hidden test
pub async fn submit_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitCodeRequest>, JsonRejection>,
) -> Result<Json<VerdictResponse>, ApiError> {
    let req = body(payload)?;
    let code = required(req.code, "Code")?;
    let language = language(req.language)?;
    let problem_id = req
        .problem_id
        .ok_or_else(|| ApiError::Validation("PID is required".to_string()))?
        .parse("PID")?;

    let problem = state
        .problems
        .get(problem_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Problem {} not found", problem_id)))?;

    let job = Job::new(code, Vec::new(), language);
    let judgement = state.judge.judge(&problem, &job).await;
    metrics::record_job("submit", judgement.as_ref().err());
    let judgement = judgement?;
    metrics::record_verdict(judgement.verdict);

    if judgement.verdict == Verdict::Accepted {
        // The verdict stands even if the counter cannot be bumped
        if let Err(e) = state.problems.record_success(problem_id).await {
            warn!(problem_id, error = %e, "Failed to record successful submission");
        }
    }

    info!(job_id = %job.id, problem_id, verdict = %judgement.verdict, "Submission judged");
    Ok(Json(verdict_response(&judgement)))
}

/// POST /enter-battle - Wait in the queue until paired
pub async fn enter_battle(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EnterBattleRequest>, JsonRejection>,
) -> Result<Json<EnterBattleResponse>, ApiError> {
    let req = body(payload)?;
    let session_id = required(req.session_id, "SID")?;

    let pairing = state.matchmaker.enqueue(session_id).await?;

    Ok(Json(EnterBattleResponse {
        problem_id: pairing.problem_id,
        battle_id: pairing.duel_id,
    }))
}

/// POST /submit-battle-code - Judge a battle answer; first accept wins
pub async fn submit_battle_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitBattleRequest>, JsonRejection>,
) -> Result<Json<VerdictResponse>, ApiError> {
    let req = body(payload)?;
    let code = required(req.code, "Code")?;
    let language = language(req.language)?;
    // Any malformed battle reference is reported like an unknown one
    let session_id = req
        .session_id
        .filter(|sid| !sid.trim().is_empty())
        .ok_or(MatchError::InvalidDuel)?;
    let battle_id = req
        .battle_id
        .as_deref()
        .and_then(|bid| Uuid::parse_str(bid.trim()).ok())
        .ok_or(MatchError::InvalidDuel)?;

    let job = Job::new(code, Vec::new(), language);
    let judgement = state
        .matchmaker
        .submit_answer(&state.judge, state.problems.as_ref(), battle_id, &session_id, &job)
        .await;

    if let Err(ApiError::Engine(e)) = &judgement {
        metrics::record_job("battle", Some(e));
    }
    let judgement = judgement?;
    metrics::record_job("battle", None);
    metrics::record_verdict(judgement.verdict);

    let claimed_problem = req.problem_id.as_ref().and_then(|pid| pid.parse("PID").ok());
    info!(
        duel_id = %battle_id,
        session_id = %session_id,
        claimed_problem = ?claimed_problem,
        verdict = %judgement.verdict,
        "Battle answer judged"
    );

    Ok(Json(verdict_response(&judgement)))
}

/// GET /problems - Problem list, optionally `?sort=difficulty`
pub async fn list_problems(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ProblemSummary>>, ApiError> {
    let by_difficulty = query
        .sort
        .is_some_and(|sort| sort.eq_ignore_ascii_case("difficulty"));

    let mut problems = state.problems.list().await?;
    sort_problems(&mut problems, by_difficulty);

    Ok(Json(problems.iter().map(|p| p.summary()).collect()))
}

/// GET /problem/:ProblemID - Public view of one problem
pub async fn get_problem(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<ProblemView>, ApiError> {
    let not_found = || ApiError::NotFound(format!("Problem {} not found", raw_id));
    let id: u32 = raw_id.trim().parse().map_err(|_| not_found())?;

    let problem = state.problems.get(id).await?.ok_or_else(not_found)?;
    Ok(Json(problem.public_view()))
}

/// POST /upload - Create a problem under the next free id
pub async fn upload_problem(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewProblem>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let new_problem = body(payload)?;
    if new_problem.name.trim().is_empty() {
        return Err(ApiError::Validation("ProblemName is required".to_string()));
    }

    let problem = state.problems.insert(new_problem).await?;
    info!(problem_id = problem.id, name = %problem.name, "Problem uploaded");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "msg": "Problem uploaded",
            "ProblemID": problem.id,
        })),
    ))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::InMemoryProblemStore;
    use arena_common::config::ExecutorSettings;
    use arena_common::types::Problem;
    use arena_engine::config::LanguageConfigManager;
    use arena_engine::sandbox::scripted::ScriptedSandbox;
    use arena_engine::Pipeline;
    use std::time::Duration;

    fn state_with(sandbox: ScriptedSandbox, problems: Vec<Problem>) -> Arc<AppState> {
        let pipeline = Pipeline::new(Arc::new(sandbox), LanguageConfigManager::builtin(), &ExecutorSettings::default());
        Arc::new(AppState::new(
            Arc::new(pipeline),
            Arc::new(InMemoryProblemStore::with_problems(problems)),
            1..=1,
            Duration::from_secs(30),
            Duration::from_secs(600),
        ))
    }

    fn sum_problem() -> Problem {
        NewProblem {
            name: "Sum".into(),
            difficulty: "Easy".into(),
            hidden_input: "2 3".into(),
            hidden_output: "5\n".into(),
            ..Default::default()
        }
        .into_problem(1)
    }

    fn run_request(code: Option<&str>, language: Option<&str>) -> RunCodeRequest {
        RunCodeRequest {
            code: code.map(String::from),
            inputs: vec!["1".into(), "2".into()],
            language: language.map(String::from),
        }
    }

    fn submit_request(pid: IdField) -> SubmitCodeRequest {
        SubmitCodeRequest {
            code: Some("int main(){}".into()),
            language: Some("cpp".into()),
            problem_id: Some(pid),
        }
    }

    #[tokio::test]
    async fn test_run_code_sanitizes_output() {
        let state = state_with(ScriptedSandbox::new().prints("hi\r\n\x07"), vec![]);
        let Json(response) = run_code(State(state), Ok(Json(run_request(Some("int main(){}"), Some("c")))))
            .await
            .unwrap();
        assert_eq!(response.output, "hi\n");
        assert!(response.runtime >= 0.0);
    }

    #[tokio::test]
    async fn test_run_code_requires_code() {
        let state = state_with(ScriptedSandbox::new(), vec![]);
        let err = run_code(State(state), Ok(Json(run_request(None, Some("c")))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Code is required");
    }

    #[tokio::test]
    async fn test_run_code_rejects_unknown_language() {
        let state = state_with(ScriptedSandbox::new(), vec![]);
        let err = run_code(State(state), Ok(Json(run_request(Some("print(1)"), Some("javascript")))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.public_message().contains("javascript"));
    }

    #[tokio::test]
    async fn test_run_code_compile_failure_is_bad_request() {
        let state = state_with(ScriptedSandbox::new().compile_fails("main.c:1: error: expected ';'"), vec![]);
        let err = run_code(State(state), Ok(Json(run_request(Some("int main(){"), Some("c")))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.public_message().contains("expected ';'"));
    }

    #[tokio::test]
    async fn test_submit_accepted_counts_success() {
        let state = state_with(ScriptedSandbox::new().prints("5\n"), vec![sum_problem()]);
        let Json(response) = submit_code(State(state.clone()), Ok(Json(submit_request(IdField::Text("1".into())))))
            .await
            .unwrap();

        assert_eq!(response.msg, "CodeSubmission: Accepted!!!");
        assert!(response.error.is_none());
        let stored = state.problems.get(1).await.unwrap().unwrap();
        assert_eq!(stored.successful_submissions, 1);
    }

    #[tokio::test]
    async fn test_submit_wrong_answer() {
        let state = state_with(ScriptedSandbox::new().prints("6\n"), vec![sum_problem()]);
        let Json(response) = submit_code(State(state.clone()), Ok(Json(submit_request(IdField::Number(1)))))
            .await
            .unwrap();

        assert_eq!(response.msg, "CodeSubmission: Wrong Answer");
        assert_eq!(state.problems.get(1).await.unwrap().unwrap().successful_submissions, 0);
    }

    #[tokio::test]
    async fn test_submit_compile_error_reports_detail() {
        let state = state_with(ScriptedSandbox::new().compile_fails("main.cpp:3: error: boom"), vec![sum_problem()]);
        let Json(response) = submit_code(State(state), Ok(Json(submit_request(IdField::Number(1)))))
            .await
            .unwrap();

        assert_eq!(response.msg, "CodeSubmission: Compilation or Runtime Error");
        assert!(response.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_submit_unknown_problem_is_not_found() {
        let state = state_with(ScriptedSandbox::new(), vec![sum_problem()]);
        let err = submit_code(State(state), Ok(Json(submit_request(IdField::Number(42)))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_submit_non_numeric_pid_is_bad_request() {
        let state = state_with(ScriptedSandbox::new(), vec![sum_problem()]);
        let err = submit_code(State(state), Ok(Json(submit_request(IdField::Text("abc".into())))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_enter_battle_requires_sid() {
        let state = state_with(ScriptedSandbox::new(), vec![]);
        let err = enter_battle(State(state), Ok(Json(EnterBattleRequest { session_id: None })))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_battle_submission_with_bad_reference() {
        let state = state_with(ScriptedSandbox::new(), vec![sum_problem()]);
        for (bid, sid) in [
            (Some("not-a-uuid".to_string()), Some("A".to_string())),
            (Some(Uuid::new_v4().to_string()), Some("A".to_string())),
            (None, Some("A".to_string())),
            (Some(Uuid::new_v4().to_string()), None),
        ] {
            let req = SubmitBattleRequest {
                code: Some("int main(){}".into()),
                language: Some("c".into()),
                problem_id: Some(IdField::Number(1)),
                battle_id: bid,
                session_id: sid,
            };
            let err = submit_battle_code(State(state.clone()), Ok(Json(req))).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert_eq!(err.public_message(), "Invalid battle or session");
        }
    }

    #[tokio::test]
    async fn test_battle_flow_end_to_end() {
        let state = state_with(ScriptedSandbox::new().prints("5\n"), vec![sum_problem()]);
        let (_, mut a_events) = state.hub.register(Some("A".into())).await;

        let first = {
            let state = state.clone();
            tokio::spawn(async move {
                enter_battle(State(state), Ok(Json(EnterBattleRequest { session_id: Some("A".into()) }))).await
            })
        };
        while state.matchmaker.waiting_len() != 1 {
            tokio::task::yield_now().await;
        }
        let Json(second) = enter_battle(State(state.clone()), Ok(Json(EnterBattleRequest { session_id: Some("B".into()) })))
            .await
            .unwrap();
        let Json(first) = first.await.unwrap().unwrap();

        assert_eq!(first.battle_id, second.battle_id);
        assert_eq!(first.problem_id, 1);

        let req = SubmitBattleRequest {
            code: Some("int main(){}".into()),
            language: Some("c".into()),
            problem_id: Some(IdField::Text("1".into())),
            battle_id: Some(first.battle_id.to_string()),
            session_id: Some("A".into()),
        };
        let Json(verdict) = submit_battle_code(State(state.clone()), Ok(Json(req))).await.unwrap();
        assert_eq!(verdict.msg, "CodeSubmission: Accepted!!!");

        // Battle broadcast, then the winner notice
        assert!(matches!(a_events.try_recv().unwrap(), arena_common::types::PushEvent::Battle { .. }));
        assert!(matches!(a_events.try_recv().unwrap(), arena_common::types::PushEvent::Winner { .. }));
        assert_eq!(state.matchmaker.active_duels(), 0);
    }

    #[tokio::test]
    async fn test_list_problems_by_difficulty() {
        let problems = vec![
            NewProblem { name: "h".into(), difficulty: "Hard".into(), ..Default::default() }.into_problem(1),
            NewProblem { name: "e".into(), difficulty: "Easy".into(), ..Default::default() }.into_problem(2),
        ];
        let state = state_with(ScriptedSandbox::new(), problems);

        let Json(listed) = list_problems(State(state.clone()), Query(ListQuery { sort: Some("difficulty".into()) }))
            .await
            .unwrap();
        assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2, 1]);

        let Json(listed) = list_problems(State(state), Query(ListQuery::default())).await.unwrap();
        assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_get_problem() {
        let state = state_with(ScriptedSandbox::new(), vec![sum_problem()]);

        let Json(view) = get_problem(State(state.clone()), Path("1".into())).await.unwrap();
        assert_eq!(view.name, "Sum");

        let err = get_problem(State(state.clone()), Path("7".into())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = get_problem(State(state), Path("seven".into())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_allocates_next_id() {
        let state = state_with(ScriptedSandbox::new(), vec![sum_problem()]);
        let new_problem = NewProblem {
            name: "Product".into(),
            ..Default::default()
        };

        let response = upload_problem(State(state.clone()), Ok(Json(new_problem)))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.problems.get(2).await.unwrap().unwrap().name, "Product");

        let err = upload_problem(State(state), Ok(Json(NewProblem::default()))).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
