use std::sync::Arc;


#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to launch worker {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("duplicate task: {0}")]
    DuplicateTask(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("failed to parse configuration: {0}")]
    Yaml(Arc<serde_yaml::Error>),
    #[error("monitor is no longer running")]
    MonitorClosed,
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(Arc::new(err))
    }
}
