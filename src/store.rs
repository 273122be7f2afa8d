use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use redis::{AsyncCommands, Script, aio::MultiplexedConnection};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{ActivityEntry, Problem, ProblemStats, SolveRecord, SolvedProblem};

/// Persistence collaborator. Every mutating call is one atomic
/// read-modify-write on the records it touches.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError>;

    async fn increment_submission_stats(
        &self,
        problem_id: &str,
        accepted: bool,
    ) -> Result<ProblemStats, StoreError>;

    /// Records a first solve together with its activity entry, which is
    /// prepended to the user's newest-first list of at most `max_activity`
    /// entries. Returns `false` when the user had already solved the problem,
    /// in which case nothing is changed.
    async fn record_solve(
        &self,
        user_id: &str,
        solve: &SolveRecord,
        activity: &ActivityEntry,
        max_activity: usize,
    ) -> Result<bool, StoreError>;
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProgress {
    pub solved: HashMap<String, SolvedProblem>,
    pub total_points: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active: Option<NaiveDate>,
    pub recent_activity: VecDeque<ActivityEntry>,
}

impl UserProgress {
    /// Same day keeps the streak, the next day extends it, any gap resets it.
    pub fn advance_streak(&mut self, day: NaiveDate) {
        self.current_streak = match self.last_active {
            Some(last) if last == day => self.current_streak.max(1),
            Some(last) if last.succ_opt() == Some(day) => self.current_streak + 1,
            _ => 1,
        };
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.last_active = Some(day);
    }

    fn apply_solve(&mut self, solve: &SolveRecord) -> bool {
        if self.solved.contains_key(&solve.problem_id) {
            return false;
        }
        self.solved.insert(
            solve.problem_id.clone(),
            SolvedProblem {
                language: solve.language,
                code: solve.code.clone(),
                attempts: 1,
                solved_on: solve.solved_on,
            },
        );
        self.total_points += solve.points;
        self.advance_streak(solve.solved_on);
        true
    }

    fn push_activity(&mut self, entry: &ActivityEntry, max_len: usize) {
        self.recent_activity.push_front(entry.clone());
        self.recent_activity.truncate(max_len);
    }
}

/// Reads problems from a JSON file holding an array of problems, or from a
/// directory where every `*.json` file holds one problem.
pub fn load_problems(path: &Path) -> Result<Vec<Problem>, StoreError> {
    if !path.is_dir() {
        return Ok(serde_json::from_str(&fs::read_to_string(path)?)?);
    }

    let mut files: Vec<_> = fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    files.retain(|file| file.extension().is_some_and(|ext| ext == "json"));
    files.sort();

    files
        .iter()
        .map(|file| -> Result<Problem, StoreError> {
            Ok(serde_json::from_str(&fs::read_to_string(file)?)?)
        })
        .collect()
}

#[derive(Default)]
pub struct MemoryStore {
    problems: Mutex<HashMap<String, Problem>>,
    stats: Mutex<HashMap<String, ProblemStats>>,
    progress: Mutex<HashMap<String, UserProgress>>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_problems(problems: Vec<Problem>) -> Self {
        let problems = problems
            .into_iter()
            .map(|problem| (problem.id.clone(), problem))
            .collect();
        Self {
            problems: Mutex::new(problems),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub async fn insert_problem(&self, problem: Problem) {
        self.problems.lock().await.insert(problem.id.clone(), problem);
    }

    #[cfg(test)]
    pub async fn stats(&self, problem_id: &str) -> ProblemStats {
        self.stats
            .lock()
            .await
            .get(problem_id)
            .copied()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub async fn progress(&self, user_id: &str) -> UserProgress {
        self.progress
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError> {
        Ok(self.problems.lock().await.get(problem_id).cloned())
    }

    async fn increment_submission_stats(
        &self,
        problem_id: &str,
        accepted: bool,
    ) -> Result<ProblemStats, StoreError> {
        let mut stats = self.stats.lock().await;
        let entry = stats.entry(problem_id.to_string()).or_default();
        entry.total_submissions += 1;
        if accepted {
            entry.successful_submissions += 1;
        }
        Ok(*entry)
    }

    async fn record_solve(
        &self,
        user_id: &str,
        solve: &SolveRecord,
        activity: &ActivityEntry,
        max_activity: usize,
    ) -> Result<bool, StoreError> {
        let mut progress = self.progress.lock().await;
        let user = progress.entry(user_id.to_string()).or_default();
        if !user.apply_solve(solve) {
            return Ok(false);
        }
        user.push_activity(activity, max_activity);
        Ok(true)
    }
}

// KEYS: solved hash, progress hash, activity list
// ARGV: problem id, solved entry json, points, day number, activity json,
// activity cap
static RECORD_SOLVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
            return 0
        end
        redis.call('HINCRBY', KEYS[2], 'total_points', ARGV[3])
        local today = tonumber(ARGV[4])
        local last = redis.call('HGET', KEYS[2], 'last_active_day')
        local streak = tonumber(redis.call('HGET', KEYS[2], 'current_streak') or '0')
        if last and tonumber(last) == today then
            if streak < 1 then streak = 1 end
        elseif last and tonumber(last) == today - 1 then
            streak = streak + 1
        else
            streak = 1
        end
        local longest = tonumber(redis.call('HGET', KEYS[2], 'longest_streak') or '0')
        if streak > longest then longest = streak end
        redis.call('HSET', KEYS[2], 'current_streak', streak, 'longest_streak', longest,
            'last_active_day', today)
        local keep = tonumber(ARGV[6])
        if keep > 0 then
            redis.call('LPUSH', KEYS[3], ARGV[5])
            redis.call('LTRIM', KEYS[3], 0, keep - 1)
        else
            redis.call('DEL', KEYS[3])
        end
        return 1
        ",
    )
});

/// Redis layout:
/// `problem:{id}` JSON problem, `problem:{id}:stats` counters hash,
/// `user:{id}:solved` problem id -> JSON entry, `user:{id}:progress` hash,
/// `user:{id}:activity` newest-first JSON list.
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub fn new(connection: MultiplexedConnection) -> Self {
        RedisStore { connection }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn load_problem(&self, problem_id: &str) -> Result<Option<Problem>, StoreError> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.get(format!("problem:{}", problem_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn increment_submission_stats(
        &self,
        problem_id: &str,
        accepted: bool,
    ) -> Result<ProblemStats, StoreError> {
        let mut con = self.connection.clone();
        let key = format!("problem:{}:stats", problem_id);
        let (total_submissions, successful_submissions): (u64, u64) = redis::pipe()
            .atomic()
            .hincr(&key, "total_submissions", 1)
            .hincr(&key, "successful_submissions", u64::from(accepted))
            .query_async(&mut con)
            .await?;
        Ok(ProblemStats {
            total_submissions,
            successful_submissions,
        })
    }

    async fn record_solve(
        &self,
        user_id: &str,
        solve: &SolveRecord,
        activity: &ActivityEntry,
        max_activity: usize,
    ) -> Result<bool, StoreError> {
        let mut con = self.connection.clone();
        let entry = serde_json::to_string(&SolvedProblem {
            language: solve.language,
            code: solve.code.clone(),
            attempts: 1,
            solved_on: solve.solved_on,
        })?;
        let inserted: i64 = RECORD_SOLVE
            .key(format!("user:{}:solved", user_id))
            .key(format!("user:{}:progress", user_id))
            .key(format!("user:{}:activity", user_id))
            .arg(&solve.problem_id)
            .arg(entry)
            .arg(solve.points)
            .arg(solve.solved_on.num_days_from_ce())
            .arg(serde_json::to_string(activity)?)
            .arg(max_activity)
            .invoke_async(&mut con)
            .await?;
        Ok(inserted == 1)
    }
}
