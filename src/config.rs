use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Error;
use crate::events::DEFAULT_SENTINEL;
use crate::tasks::{TaskDef, TaskKind};


pub const DEFAULT_CONFIG_FILE: &str = "laurel.yaml";

const AWARDS: [(&str, &str); 20] = [
    ("oscar", "OSCARS"),
    ("gg", "GOLDEN GLOBES"),
    ("bafta", "BAFTA"),
    ("sag", "SAG AWARDS"),
    ("critics", "CRITICS CHOICE"),
    ("afi", "AFI AWARDS"),
    ("nbr", "NBR AWARDS"),
    ("venice", "VENICE"),
    ("cannes", "CANNES"),
    ("annie", "ANNIE AWARDS"),
    ("dga", "DGA"),
    ("pga", "PGA"),
    ("lafca", "LAFCA"),
    ("nyfcc", "NYFCC"),
    ("wga", "WGA"),
    ("adg", "ADG"),
    ("gotham", "GOTHAM"),
    ("astra", "ASTRA / HCA"),
    ("spirit", "INDIE SPIRIT"),
    ("bifa", "BIFA"),
];


#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub sentinel: String,
    pub tasks: Vec<TaskDef>,
}

impl Default for Config {
    fn default() -> Self {
        let mut tasks: Vec<TaskDef> = AWARDS
            .iter()
            .map(|(code, name)| TaskDef::new(code, name, TaskKind::Award))
            .collect();
        tasks.push(TaskDef::new("gen_analysis", "ANALYSIS GENERATION", TaskKind::Analysis));
        tasks.push(TaskDef::new("tmdb", "TMDB IMAGES", TaskKind::Images));
        tasks.push(TaskDef::new("upload", "FIREBASE UPLOAD", TaskKind::Upload));

        Self {
            worker: WorkerConfig::default(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            tasks,
        }
    }
}

impl Config {
    /// Load configuration from `path`. When no path is given the default
    /// file is used if present, otherwise built-in defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };

        let config = match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text)?,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(err) => {
                return Err(Error::Io {
                    path: path.display().to_string(),
                    source: Arc::new(err),
                });
            }
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sentinel.is_empty() {
            return Err(Error::Config("sentinel must not be empty".into()));
        }
        if self.worker.program.is_empty() {
            return Err(Error::Config("worker program must not be empty".into()));
        }

        Ok(())
    }
}


/// How the worker process is launched.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let env = [("PYTHONUNBUFFERED", "1"), ("PYTHONIOENCODING", "utf-8")]
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Self {
            program: "python3".to_string(),
            args: vec!["scraper/scrape_and_upload.py".to_string()],
            working_dir: PathBuf::from("."),
            env,
        }
    }
}
