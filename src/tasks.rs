use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Error;
use crate::events::{Event, Outcome, Phase};


pub const INCOMPLETE: &str = "Incomplete";
pub const NO_DATA: &str = "No Data";
pub const ANALYSIS_DONE: &str = "Analysis Generated";
pub const UPLOAD_DONE: &str = "Done";
pub const DEFAULT_ERROR: &str = "Error";


/// A task as declared in configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct TaskDef {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub kind: TaskKind,
}

impl TaskDef {
    pub fn new(code: &str, name: &str, kind: TaskKind) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            kind,
        }
    }
}


#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Award,
    Analysis,
    Images,
    Upload,
}

impl TaskKind {
    fn phase(self) -> Option<Phase> {
        match self {
            TaskKind::Images => Some(Phase::Images),
            TaskKind::Upload => Some(Phase::Upload),
            TaskKind::Award | TaskKind::Analysis => None,
        }
    }
}


#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}


/// Point-in-time view of one task, as handed to observers.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct TaskSnapshot {
    pub code: String,
    pub name: String,
    pub state: TaskState,
    pub info: String,
}


#[derive(Clone, Debug)]
pub struct Task {
    def: TaskDef,
    state: TaskState,
    info: String,
}

impl Task {
    pub fn new(def: TaskDef) -> Self {
        Self {
            def,
            state: TaskState::Pending,
            info: String::new(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.def.kind
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            code: self.def.code.clone(),
            name: self.def.name.clone(),
            state: self.state,
            info: self.info.clone(),
        }
    }

    pub fn reset(&mut self) {
        self.state = TaskState::Pending;
        self.info.clear();
    }

    fn start(&mut self) -> bool {
        if self.state != TaskState::Pending {
            return false;
        }
        self.state = TaskState::Running;
        self.info.clear();
        true
    }

    fn finish(&mut self, state: TaskState, info: String) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        // A finish whose start was never seen still passes through Running.
        self.start();
        self.state = state;
        self.info = info;
        true
    }

    fn sweep(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TaskState::Failed;
        self.info = INCOMPLETE.to_string();
        true
    }
}


/// Result of applying one event to the registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Change {
    pub task: TaskSnapshot,
    pub terminal: bool,
}


/// The ordered set of tasks tracked during a run.
#[derive(Clone, Debug)]
pub struct Registry {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new(defs: &[TaskDef]) -> Result<Self, Error> {
        let mut tasks = Vec::with_capacity(defs.len());
        let mut index = HashMap::with_capacity(defs.len());

        for def in defs {
            if index.insert(def.code.clone(), tasks.len()).is_some() {
                return Err(Error::DuplicateTask(def.code.clone()));
            }
            tasks.push(Task::new(def.clone()));
        }

        Ok(Self { tasks, index })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&Task> {
        self.index.get(code).map(|&i| &self.tasks[i])
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(Task::snapshot).collect()
    }

    pub fn reset(&mut self) {
        self.tasks.iter_mut().for_each(Task::reset);
    }

    /// Drive the state machine with one event.
    ///
    /// Returns `Ok(None)` when the event names a task that already finished;
    /// such events never re-fire side effects.
    pub fn apply(&mut self, event: &Event) -> Result<Option<Change>, Error> {
        let (task, changed) = match event {
            Event::TaskStart { task } => {
                let task = self.by_code(task)?;
                let changed = task.start();
                (task, changed)
            }
            Event::TaskFinish { task, outcome } => {
                let task = self.by_code(task)?;
                let (state, info) = finish_info(task.kind(), outcome);
                let changed = task.finish(state, info);
                (task, changed)
            }
            Event::PhaseStart { phase } => {
                let task = self.by_phase(*phase)?;
                let changed = task.start();
                (task, changed)
            }
            Event::PhaseFinish { phase, total_updated } => {
                let task = self.by_phase(*phase)?;
                let info = match phase {
                    Phase::Images => format!("{} Images", total_updated),
                    Phase::Upload => UPLOAD_DONE.to_string(),
                };
                let changed = task.finish(TaskState::Succeeded, info);
                (task, changed)
            }
            Event::PipelineFinish => {
                let task = self.by_phase(Phase::Upload)?;
                let changed = task.finish(TaskState::Succeeded, UPLOAD_DONE.to_string());
                (task, changed)
            }
        };

        if !changed {
            return Ok(None);
        }

        Ok(Some(Change {
            terminal: task.state().is_terminal(),
            task: task.snapshot(),
        }))
    }

    /// Force every unfinished task to `Failed`.
    pub fn sweep(&mut self) -> Vec<TaskSnapshot> {
        self.tasks
            .iter_mut()
            .filter_map(|task| task.sweep().then(|| task.snapshot()))
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|task| task.state().is_terminal())
    }

    fn by_code(&mut self, code: &str) -> Result<&mut Task, Error> {
        match self.index.get(code) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(Error::UnknownTask(code.to_string())),
        }
    }

    fn by_phase(&mut self, phase: Phase) -> Result<&mut Task, Error> {
        self.tasks
            .iter_mut()
            .find(|task| task.kind().phase() == Some(phase))
            .ok_or_else(|| Error::UnknownTask(format!("{:?}", phase).to_lowercase()))
    }
}


fn finish_info(kind: TaskKind, outcome: &Outcome) -> (TaskState, String) {
    match outcome {
        Outcome::Success(_) if kind == TaskKind::Analysis => {
            (TaskState::Succeeded, ANALYSIS_DONE.to_string())
        }
        Outcome::Success(stats) if stats.is_empty() => {
            (TaskState::Succeeded, NO_DATA.to_string())
        }
        Outcome::Success(stats) => (TaskState::Succeeded, stats.summary()),
        Outcome::Failure { error } if error.is_empty() => {
            (TaskState::Failed, DEFAULT_ERROR.to_string())
        }
        Outcome::Failure { error } => (TaskState::Failed, error.clone()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{classify, Stats, DEFAULT_SENTINEL};

    fn registry() -> Registry {
        Registry::new(&[
            TaskDef::new("oscar", "OSCARS", TaskKind::Award),
            TaskDef::new("gg", "GOLDEN GLOBES", TaskKind::Award),
            TaskDef::new("gen_analysis", "ANALYSIS GENERATION", TaskKind::Analysis),
            TaskDef::new("tmdb", "TMDB IMAGES", TaskKind::Images),
            TaskDef::new("upload", "FIREBASE UPLOAD", TaskKind::Upload),
        ])
        .unwrap()
    }

    fn feed(registry: &mut Registry, line: &str) -> Result<Option<Change>, Error> {
        registry.apply(&classify(line, DEFAULT_SENTINEL).unwrap())
    }

    fn state_of(registry: &Registry, code: &str) -> (TaskState, String) {
        let task = registry.get(code).unwrap();
        (task.state(), task.info().to_string())
    }

    #[test]
    fn new_registry_is_pending() {
        let registry = registry();
        assert_eq!(registry.len(), 5);
        assert!(registry
            .snapshots()
            .iter()
            .all(|task| task.state == TaskState::Pending && task.info.is_empty()));
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let result = Registry::new(&[
            TaskDef::new("oscar", "OSCARS", TaskKind::Award),
            TaskDef::new("oscar", "AGAIN", TaskKind::Award),
        ]);
        assert!(matches!(result, Err(Error::DuplicateTask(code)) if code == "oscar"));
    }

    #[test]
    fn start_moves_to_running() {
        let mut registry = registry();
        let change = feed(&mut registry, r#"EMIT:{"type":"task_start","task":"oscar"}"#)
            .unwrap()
            .unwrap();
        assert!(!change.terminal);
        assert_eq!(change.task.state, TaskState::Running);
        assert_eq!(state_of(&registry, "oscar"), (TaskState::Running, String::new()));
    }

    #[test]
    fn success_with_counters() {
        let mut registry = registry();
        feed(&mut registry, r#"EMIT:{"type":"task_start","task":"oscar"}"#).unwrap();
        let change = feed(
            &mut registry,
            r#"EMIT:{"type":"task_finish","task":"oscar","success":true,"stats":{"best-film":3}}"#,
        )
        .unwrap()
        .unwrap();
        assert!(change.terminal);
        assert_eq!(
            state_of(&registry, "oscar"),
            (TaskState::Succeeded, "3 Films, 0 Dirs, 0 Actors".to_string())
        );
    }

    #[test]
    fn success_without_counters_is_no_data() {
        let mut registry = registry();
        feed(&mut registry, r#"EMIT:{"type":"task_start","task":"gg"}"#).unwrap();
        feed(&mut registry, r#"EMIT:{"type":"task_finish","task":"gg","success":true,"stats":{}}"#)
            .unwrap();
        assert_eq!(state_of(&registry, "gg"), (TaskState::Succeeded, NO_DATA.to_string()));
    }

    #[test]
    fn failure_uses_error_or_default() {
        let mut registry = registry();
        feed(
            &mut registry,
            r#"EMIT:{"type":"task_finish","task":"oscar","success":false,"error":"timeout"}"#,
        )
        .unwrap();
        feed(&mut registry, r#"EMIT:{"type":"task_finish","task":"gg","success":false}"#)
            .unwrap();
        assert_eq!(state_of(&registry, "oscar"), (TaskState::Failed, "timeout".to_string()));
        assert_eq!(state_of(&registry, "gg"), (TaskState::Failed, DEFAULT_ERROR.to_string()));
    }

    #[test]
    fn analysis_ignores_counters() {
        let mut registry = registry();
        let event = Event::TaskFinish {
            task: "gen_analysis".into(),
            outcome: Outcome::Success(Stats::default()),
        };
        registry.apply(&event).unwrap();
        assert_eq!(
            state_of(&registry, "gen_analysis"),
            (TaskState::Succeeded, ANALYSIS_DONE.to_string())
        );
    }

    #[test]
    fn terminal_tasks_ignore_further_events() {
        let mut registry = registry();
        feed(
            &mut registry,
            r#"EMIT:{"type":"task_finish","task":"oscar","success":false,"error":"timeout"}"#,
        )
        .unwrap();

        let again = feed(
            &mut registry,
            r#"EMIT:{"type":"task_finish","task":"oscar","success":true,"stats":{"best-film":1}}"#,
        )
        .unwrap();
        let restart = feed(&mut registry, r#"EMIT:{"type":"task_start","task":"oscar"}"#).unwrap();

        assert_eq!(again, None);
        assert_eq!(restart, None);
        assert_eq!(state_of(&registry, "oscar"), (TaskState::Failed, "timeout".to_string()));
    }

    #[test]
    fn second_start_is_noop() {
        let mut registry = registry();
        feed(&mut registry, r#"EMIT:{"type":"task_start","task":"oscar"}"#).unwrap();
        let again = feed(&mut registry, r#"EMIT:{"type":"task_start","task":"oscar"}"#).unwrap();
        assert_eq!(again, None);
    }

    #[test]
    fn unknown_task_is_an_error() {
        let mut registry = registry();
        let result = feed(&mut registry, r#"EMIT:{"type":"task_start","task":"emmy"}"#);
        assert!(matches!(result, Err(Error::UnknownTask(code)) if code == "emmy"));
    }

    #[test]
    fn phases() {
        let mut registry = registry();
        feed(&mut registry, r#"EMIT:{"type":"tmdb_start"}"#).unwrap();
        assert_eq!(state_of(&registry, "tmdb").0, TaskState::Running);

        feed(&mut registry, r#"EMIT:{"type":"tmdb_finish","total_updated":42}"#).unwrap();
        assert_eq!(state_of(&registry, "tmdb"), (TaskState::Succeeded, "42 Images".to_string()));

        feed(&mut registry, r#"EMIT:{"type":"upload_start"}"#).unwrap();
        let change = feed(&mut registry, r#"EMIT:{"type":"pipeline_finish"}"#).unwrap().unwrap();
        assert!(change.terminal);
        assert_eq!(state_of(&registry, "upload"), (TaskState::Succeeded, UPLOAD_DONE.to_string()));
    }

    #[test]
    fn phase_without_task_is_unknown() {
        let mut registry =
            Registry::new(&[TaskDef::new("oscar", "OSCARS", TaskKind::Award)]).unwrap();
        let result = feed(&mut registry, r#"EMIT:{"type":"pipeline_finish"}"#);
        assert!(matches!(result, Err(Error::UnknownTask(_))));
    }

    #[test]
    fn sweep_fails_unfinished_tasks() {
        let mut registry = registry();
        feed(&mut registry, r#"EMIT:{"type":"task_start","task":"oscar"}"#).unwrap();
        feed(&mut registry, r#"EMIT:{"type":"task_finish","task":"gg","success":true,"stats":{"best-film":1}}"#)
            .unwrap();

        let swept = registry.sweep();
        let codes: Vec<_> = swept.iter().map(|task| task.code.as_str()).collect();
        assert_eq!(codes, ["oscar", "gen_analysis", "tmdb", "upload"]);
        assert!(swept.iter().all(|task| task.state == TaskState::Failed && task.info == INCOMPLETE));
        assert!(registry.all_terminal());
        assert_eq!(state_of(&registry, "gg").0, TaskState::Succeeded);
        assert!(registry.sweep().is_empty());
    }

    #[test]
    fn reset_returns_to_pending() {
        let mut registry = registry();
        feed(&mut registry, r#"EMIT:{"type":"task_start","task":"oscar"}"#).unwrap();
        registry.sweep();
        registry.reset();
        assert_eq!(state_of(&registry, "oscar"), (TaskState::Pending, String::new()));
        assert!(!registry.all_terminal());
    }
}
