// Problem repository: Redis in production, in-memory for local runs and tests

use crate::error::ApiError;
use arena_common::redis;
use arena_common::types::{difficulty_rank, NewProblem, Problem};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Problem>, ApiError>;

    async fn get(&self, id: u32) -> Result<Option<Problem>, ApiError>;

    /// Store under the next free id (max existing + 1)
    async fn insert(&self, problem: NewProblem) -> Result<Problem, ApiError>;

    async fn record_success(&self, id: u32) -> Result<(), ApiError>;
}

pub struct RedisProblemStore {
    conn: ::redis::aio::ConnectionManager,
}

impl RedisProblemStore {
    pub fn new(conn: ::redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProblemStore for RedisProblemStore {
    async fn list(&self) -> Result<Vec<Problem>, ApiError> {
        let mut conn = self.conn.clone();
        Ok(redis::list_problems(&mut conn).await?)
    }

    async fn get(&self, id: u32) -> Result<Option<Problem>, ApiError> {
        let mut conn = self.conn.clone();
        Ok(redis::get_problem(&mut conn, id).await?)
    }

    async fn insert(&self, problem: NewProblem) -> Result<Problem, ApiError> {
        let mut conn = self.conn.clone();
        Ok(redis::insert_problem(&mut conn, problem).await?)
    }

    async fn record_success(&self, id: u32) -> Result<(), ApiError> {
        let mut conn = self.conn.clone();
        redis::record_success(&mut conn, id).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProblemStore {
    problems: RwLock<BTreeMap<u32, Problem>>,
}

impl InMemoryProblemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_problems(problems: Vec<Problem>) -> Self {
        Self {
            problems: RwLock::new(problems.into_iter().map(|p| (p.id, p)).collect()),
        }
    }
}

#[async_trait]
impl ProblemStore for InMemoryProblemStore {
    async fn list(&self) -> Result<Vec<Problem>, ApiError> {
        Ok(self.problems.read().await.values().cloned().collect())
    }

    async fn get(&self, id: u32) -> Result<Option<Problem>, ApiError> {
        Ok(self.problems.read().await.get(&id).cloned())
    }

    async fn insert(&self, problem: NewProblem) -> Result<Problem, ApiError> {
        let mut problems = self.problems.write().await;
        let id = problems.keys().next_back().map_or(1, |max| max + 1);
        let problem = problem.into_problem(id);
        problems.insert(id, problem.clone());
        Ok(problem)
    }

    async fn record_success(&self, id: u32) -> Result<(), ApiError> {
        if let Some(problem) = self.problems.write().await.get_mut(&id) {
            problem.successful_submissions += 1;
        }
        Ok(())
    }
}

/// Order by id, or by difficulty (Easy < Medium < Hard, unknown last) then id
pub fn sort_problems(problems: &mut [Problem], by_difficulty: bool) {
    if by_difficulty {
        problems.sort_by_key(|p| (difficulty_rank(&p.difficulty), p.id));
    } else {
        problems.sort_by_key(|p| p.id);
    }
}
