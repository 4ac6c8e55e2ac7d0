use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of a job: (group, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Entry name under the job namespace.
    pub fn entry_name(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Requested action on a job.
///
/// Any tag other than the three known operations decodes as `Unknown`, which
/// executors ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOperation {
    Start,
    Restart,
    Pause,
    Unknown,
}

impl JobOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOperation::Start => "Start",
            JobOperation::Restart => "Restart",
            JobOperation::Pause => "Pause",
            JobOperation::Unknown => "Unknown",
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "Start" => JobOperation::Start,
            "Restart" => JobOperation::Restart,
            "Pause" => JobOperation::Pause,
            _ => JobOperation::Unknown,
        }
    }
}

impl std::fmt::Display for JobOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(JobOperation::parse(&tag))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobState {
    #[default]
    Idle,
    Startup,
    Pause,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Startup => write!(f, "startup"),
            JobState::Pause => write!(f, "pause"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// How the execution container treats a run missed while the job was not scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MisfirePolicy {
    #[default]
    None,
    FireOnce,
    FireAll,
}

/// Reference to a job artifact and how to load it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub reference: String,
    #[serde(default)]
    pub scan_targets: Vec<String>,
    #[serde(default)]
    pub framework_integration: bool,
}

impl Artifact {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            scan_targets: Vec::new(),
            framework_integration: false,
        }
    }
}

/// Classified failure of the last operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub category: String,
    pub message: String,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

/// Persisted job record, stored at `<jobs>/<group>.<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: JobKey,
    pub artifact: Artifact,
    /// Artifact the job ran from before its last change; Restart shuts this one down.
    #[serde(default)]
    pub original_artifact: Option<Artifact>,
    pub cron: String,
    #[serde(default)]
    pub misfire_policy: MisfirePolicy,
    #[serde(default)]
    pub operation: Option<JobOperation>,
    #[serde(default)]
    pub assigned_node: Option<String>,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub last_failure: Option<JobFailure>,
    /// Node path that last applied `operation`.
    #[serde(default)]
    pub applied_on: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(key: JobKey, artifact: Artifact, cron: impl Into<String>) -> Self {
        Self {
            key,
            artifact,
            original_artifact: None,
            cron: cron.into(),
            misfire_policy: MisfirePolicy::default(),
            operation: None,
            assigned_node: None,
            state: JobState::Idle,
            last_failure: None,
            applied_on: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_operation(mut self, operation: JobOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_original_artifact(mut self, artifact: Artifact) -> Self {
        self.original_artifact = Some(artifact);
        self
    }

    pub fn with_misfire_policy(mut self, policy: MisfirePolicy) -> Self {
        self.misfire_policy = policy;
        self
    }

    /// The operation, if one is requested and recognised.
    pub fn actionable_operation(&self) -> Option<JobOperation> {
        match self.operation {
            Some(JobOperation::Unknown) | None => None,
            Some(op) => Some(op),
        }
    }

    /// Artifact to shut down on Restart; falls back to the current one.
    pub fn previous_artifact(&self) -> &Artifact {
        self.original_artifact.as_ref().unwrap_or(&self.artifact)
    }

    pub fn is_bound_to(&self, node_path: &str) -> bool {
        self.assigned_node.as_deref() == Some(node_path)
    }

    /// Whether `node_path` still has to apply the requested operation.
    pub fn pending_on(&self, node_path: &str) -> bool {
        self.is_bound_to(node_path) && self.applied_on.as_deref() != Some(node_path)
    }

    /// Request a new operation. Clears the applied marker so the bound node runs it.
    pub fn request(&mut self, operation: JobOperation) {
        self.operation = Some(operation);
        self.applied_on = None;
        self.updated_at = Utc::now();
    }

    pub fn bind(&mut self, node_path: &str) {
        self.assigned_node = Some(node_path.to_string());
        self.updated_at = Utc::now();
    }

    pub fn release(&mut self) {
        self.assigned_node = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_succeeded(&mut self, node_path: &str, state: JobState) {
        self.state = state;
        self.last_failure = None;
        self.applied_on = Some(node_path.to_string());
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, node_path: &str, failure: JobFailure) {
        self.state = JobState::Failed;
        self.last_failure = Some(failure);
        self.applied_on = Some(node_path.to_string());
        self.updated_at = Utc::now();
    }
}
