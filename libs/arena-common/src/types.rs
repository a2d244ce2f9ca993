use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque client session identifier, generated by the browser.
pub type SessionId = String;

/// Compiled languages accepted by the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    /// Parse the wire name (`"c"` or `"cpp"`), case-insensitive.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "c" => Some(Language::C),
            "cpp" | "c++" => Some(Language::Cpp),
            _ => None,
        }
    }

    pub fn all() -> [Language; 2] {
        [Language::C, Language::Cpp]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::C => write!(f, "c"),
            Language::Cpp => write!(f, "cpp"),
        }
    }
}

/// One request to compile and run source against stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_code: String,
    pub stdin_lines: Vec<String>,
    pub language: Language,
}

impl Job {
    pub fn new(source_code: impl Into<String>, stdin_lines: Vec<String>, language: Language) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_code: source_code.into(),
            stdin_lines,
            language,
        }
    }

    /// Content of the uploaded input file.
    pub fn stdin(&self) -> String {
        self.stdin_lines.join("\n")
    }
}

/// Outcome of a single successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Raw captured stdout of the program, byte for byte
    pub output: Vec<u8>,
    pub runtime_seconds: f64,
    /// Whatever the program wrote to stderr while still exiting cleanly
    pub error: Option<String>,
    /// Best-effort container memory delta across the run, in bytes
    pub memory_usage_bytes: Option<u64>,
}

impl PipelineResult {
    /// Captured stdout decoded for display; invalid UTF-8 becomes U+FFFD.
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    RuntimeOrCompileError,
}

impl Verdict {
    /// Message shown to the submitter.
    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Accepted => "CodeSubmission: Accepted!!!",
            Verdict::WrongAnswer => "CodeSubmission: Wrong Answer",
            Verdict::RuntimeOrCompileError => "CodeSubmission: Compilation or Runtime Error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong_answer",
            Verdict::RuntimeOrCompileError => "error",
        };
        f.write_str(label)
    }
}

/// Problem document as persisted. Field names follow the stored documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "ProblemID")]
    pub id: u32,
    #[serde(rename = "ProblemName", default)]
    pub name: String,
    #[serde(rename = "ProblemStatement", default)]
    pub statement: String,
    #[serde(rename = "ProblemDifficulty", default)]
    pub difficulty: String,
    #[serde(rename = "ProblemTestCasesInput", default)]
    pub sample_input: String,
    #[serde(rename = "ProblemTestCasesOutput", default)]
    pub sample_output: String,
    #[serde(rename = "ProblemHiddenTestCasesInput", default)]
    pub hidden_input: String,
    #[serde(rename = "ProblemHiddenTestCasesOutput", default)]
    pub hidden_output: String,
    #[serde(rename = "ProblemSuccessfullSubmissions", default)]
    pub successful_submissions: u64,
}

impl Problem {
    pub fn summary(&self) -> ProblemSummary {
        ProblemSummary {
            id: self.id,
            name: self.name.clone(),
            difficulty: self.difficulty.clone(),
        }
    }

    /// Everything except the hidden test data.
    pub fn public_view(&self) -> ProblemView {
        ProblemView {
            id: self.id,
            name: self.name.clone(),
            statement: self.statement.clone(),
            difficulty: self.difficulty.clone(),
            sample_input: self.sample_input.clone(),
            sample_output: self.sample_output.clone(),
            successful_submissions: self.successful_submissions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSummary {
    #[serde(rename = "ProblemID")]
    pub id: u32,
    #[serde(rename = "ProblemName")]
    pub name: String,
    #[serde(rename = "ProblemDifficulty")]
    pub difficulty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemView {
    #[serde(rename = "ProblemID")]
    pub id: u32,
    #[serde(rename = "ProblemName")]
    pub name: String,
    #[serde(rename = "ProblemStatement")]
    pub statement: String,
    #[serde(rename = "ProblemDifficulty")]
    pub difficulty: String,
    #[serde(rename = "ProblemTestCasesInput")]
    pub sample_input: String,
    #[serde(rename = "ProblemTestCasesOutput")]
    pub sample_output: String,
    #[serde(rename = "ProblemSuccessfullSubmissions")]
    pub successful_submissions: u64,
}

/// Upload payload; the identifier is allocated by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProblem {
    #[serde(rename = "ProblemName", default)]
    pub name: String,
    #[serde(rename = "ProblemStatement", default)]
    pub statement: String,
    #[serde(rename = "ProblemDifficulty", default)]
    pub difficulty: String,
    #[serde(rename = "ProblemTestCasesInput", default)]
    pub sample_input: String,
    #[serde(rename = "ProblemTestCasesOutput", default)]
    pub sample_output: String,
    #[serde(rename = "ProblemHiddenTestCasesInput", default)]
    pub hidden_input: String,
    #[serde(rename = "ProblemHiddenTestCasesOutput", default)]
    pub hidden_output: String,
}

impl NewProblem {
    pub fn into_problem(self, id: u32) -> Problem {
        Problem {
            id,
            name: self.name,
            statement: self.statement,
            difficulty: self.difficulty,
            sample_input: self.sample_input,
            sample_output: self.sample_output,
            hidden_input: self.hidden_input,
            hidden_output: self.hidden_output,
            successful_submissions: 0,
        }
    }
}

/// Sort rank of a difficulty label; unknown labels sort last.
pub fn difficulty_rank(difficulty: &str) -> u8 {
    match difficulty.trim().to_lowercase().as_str() {
        "easy" => 0,
        "medium" => 1,
        "hard" => 2,
        _ => 3,
    }
}

/// A live two-player duel bound to one problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Duel {
    pub id: Uuid,
    pub participants: [SessionId; 2],
    pub problem_id: u32,
    pub started_at: DateTime<Utc>,
}

impl Duel {
    pub fn has_participant(&self, session_id: &str) -> bool {
        self.participants.iter().any(|p| p == session_id)
    }

    /// The other participant, if `session_id` is one of the two.
    pub fn opponent_of(&self, session_id: &str) -> Option<&SessionId> {
        match &self.participants {
            [a, b] if a == session_id => Some(b),
            [a, b] if b == session_id => Some(a),
            _ => None,
        }
    }
}

/// What an enqueued session receives once matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub duel_id: Uuid,
    pub problem_id: u32,
}

/// Server-pushed events on the notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushEvent {
    Battle {
        #[serde(rename = "battleID")]
        duel_id: Uuid,
        #[serde(rename = "problemID")]
        problem_id: u32,
        #[serde(rename = "participants")]
        participants: [SessionId; 2],
    },
    Winner {
        #[serde(rename = "battleID")]
        duel_id: Uuid,
        #[serde(rename = "SID")]
        session_id: SessionId,
    },
    Loser {
        #[serde(rename = "battleID")]
        duel_id: Uuid,
        #[serde(rename = "SID")]
        session_id: SessionId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_wire_names() {
        assert_eq!(Language::from_str("C"), Some(Language::C));
        assert_eq!(Language::from_str("cpp"), Some(Language::Cpp));
        assert_eq!(Language::from_str("javascript"), None);
        assert_eq!(serde_json::to_string(&Language::Cpp).unwrap(), "\"cpp\"");
    }

    #[test]
    fn test_stdin_is_newline_joined() {
        let job = Job::new("", vec!["1 2".into(), "3".into()], Language::C);
        assert_eq!(job.stdin(), "1 2\n3");
    }

    #[test]
    fn test_public_view_hides_hidden_cases() {
        let problem = NewProblem {
            name: "Sum".into(),
            hidden_input: "secret".into(),
            hidden_output: "answer".into(),
            ..Default::default()
        }
        .into_problem(7);

        let json = serde_json::to_value(problem.public_view()).unwrap();
        assert_eq!(json["ProblemID"], 7);
        assert!(json.get("ProblemHiddenTestCasesInput").is_none());
        assert!(json.get("ProblemHiddenTestCasesOutput").is_none());
    }

    #[test]
    fn test_opponent_lookup() {
        let duel = Duel {
            id: Uuid::new_v4(),
            participants: ["a".into(), "b".into()],
            problem_id: 1,
            started_at: Utc::now(),
        };
        assert_eq!(duel.opponent_of("a").map(String::as_str), Some("b"));
        assert_eq!(duel.opponent_of("b").map(String::as_str), Some("a"));
        assert_eq!(duel.opponent_of("c"), None);
    }

    #[test]
    fn test_push_event_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(PushEvent::Winner {
            duel_id: id,
            session_id: "s1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "winner");
        assert_eq!(json["SID"], "s1");
        assert_eq!(json["battleID"], id.to_string());
    }

    #[test]
    fn test_difficulty_rank_orders_known_labels() {
        assert!(difficulty_rank("Easy") < difficulty_rank("medium"));
        assert!(difficulty_rank("Medium") < difficulty_rank("HARD"));
        assert_eq!(difficulty_rank("legendary"), 3);
    }
}
