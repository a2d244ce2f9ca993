use crate::types::{NewProblem, Problem};
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;

/// Redis layout of the problem document store.
///
/// Problems live in one hash keyed by their numeric id so that the id space
/// can be scanned for allocation. Successful submission counters are kept in
/// a separate hash and merged on read, which keeps HINCRBY atomic.

pub const PROBLEMS_KEY: &str = "arena:problems";
pub const SUCCESSES_KEY: &str = "arena:problem_successes";

/// Hash field holding a problem document
pub fn problem_field(id: u32) -> String {
    id.to_string()
}

fn to_payload(problem: &Problem) -> RedisResult<String> {
    serde_json::to_string(problem)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string())))
}

fn from_payload(payload: &str) -> RedisResult<Problem> {
    serde_json::from_str(payload)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string())))
}

/// Next id after the highest one currently stored
pub fn next_problem_id<I: IntoIterator<Item = String>>(existing: I) -> u32 {
    existing
        .into_iter()
        .filter_map(|field| field.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

/// Fetch one problem, with its submission counter merged in
pub async fn get_problem(
    conn: &mut redis::aio::ConnectionManager,
    id: u32,
) -> RedisResult<Option<Problem>> {
    let payload: Option<String> = conn.hget(PROBLEMS_KEY, problem_field(id)).await?;
    match payload {
        Some(data) => {
            let mut problem = from_payload(&data)?;
            let successes: Option<u64> = conn.hget(SUCCESSES_KEY, problem_field(id)).await?;
            problem.successful_submissions = successes.unwrap_or(0);
            Ok(Some(problem))
        }
        None => Ok(None),
    }
}

/// Fetch every stored problem, unordered
pub async fn list_problems(conn: &mut redis::aio::ConnectionManager) -> RedisResult<Vec<Problem>> {
    let payloads: Vec<String> = conn.hvals(PROBLEMS_KEY).await?;
    let successes: HashMap<String, u64> = conn.hgetall(SUCCESSES_KEY).await?;

    payloads
        .iter()
        .map(|payload| {
            let mut problem = from_payload(payload)?;
            problem.successful_submissions = successes
                .get(&problem_field(problem.id))
                .copied()
                .unwrap_or(0);
            Ok(problem)
        })
        .collect()
}

/// Store a new problem under `max existing id + 1`.
///
/// HSETNX makes the allocation safe against concurrent uploads: a writer
/// that loses the race rescans the ids and tries the next one.
pub async fn insert_problem(
    conn: &mut redis::aio::ConnectionManager,
    new_problem: NewProblem,
) -> RedisResult<Problem> {
    loop {
        let fields: Vec<String> = conn.hkeys(PROBLEMS_KEY).await?;
        let id = next_problem_id(fields);
        let problem = new_problem.clone().into_problem(id);
        let created: bool = conn
            .hset_nx(PROBLEMS_KEY, problem_field(id), to_payload(&problem)?)
            .await?;
        if created {
            return Ok(problem);
        }
    }
}

/// Bump the accepted-submission counter of a problem
pub async fn record_success(conn: &mut redis::aio::ConnectionManager, id: u32) -> RedisResult<u64> {
    conn.hincr(SUCCESSES_KEY, problem_field(id), 1u64).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_field_is_decimal_id() {
        assert_eq!(problem_field(42), "42");
    }

    #[test]
    fn test_next_id_starts_at_one() {
        assert_eq!(next_problem_id(Vec::<String>::new()), 1);
    }

    #[test]
    fn test_next_id_is_max_plus_one() {
        let fields = vec!["3".to_string(), "10".to_string(), "7".to_string()];
        assert_eq!(next_problem_id(fields), 11);
    }

    #[test]
    fn test_next_id_ignores_foreign_fields() {
        let fields = vec!["2".to_string(), "meta".to_string()];
        assert_eq!(next_problem_id(fields), 3);
    }
}
