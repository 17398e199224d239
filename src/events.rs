//! Classification of worker output lines into protocol events.

use crate::scan::Payload;


pub const DEFAULT_SENTINEL: &str = "EMIT:";

const PERFORMER_COUNTERS: [&str; 6] = [
    "best-actor",
    "best-actress",
    "best-supporting-actor",
    "best-supporting-actress",
    "best-performance",
    "breakthrough-performance",
];


#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    TaskStart { task: String },
    TaskFinish { task: String, outcome: Outcome },
    PhaseStart { phase: Phase },
    PhaseFinish { phase: Phase, total_updated: u64 },
    PipelineFinish,
}


#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success(Stats),
    Failure { error: String },
}


/// Pipeline stages reported without a task code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Images,
    Upload,
}

impl Phase {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "" | "images" | "tmdb" => Some(Phase::Images),
            "upload" => Some(Phase::Upload),
            _ => None,
        }
    }
}


/// Nomination counters reported by a successful award scrape.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub films: u64,
    pub directors: u64,
    pub performers: u64,
}

impl Stats {
    pub fn from_payload(stats: Payload<'_>) -> Self {
        Self {
            films: stats.integer("best-film"),
            directors: stats.integer("best-director"),
            performers: PERFORMER_COUNTERS
                .iter()
                .map(|key| stats.integer(key))
                .fold(0u64, u64::saturating_add),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.films == 0 && self.directors == 0 && self.performers == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} Films, {} Dirs, {} Actors",
            self.films, self.directors, self.performers
        )
    }
}


/// Why a line did not produce an event.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("line does not carry the event sentinel")]
    NotAnEvent,
    #[error("malformed event: {0}")]
    Malformed(&'static str),
    #[error("unknown event type {0:?}")]
    UnknownKind(String),
}


pub fn classify(line: &str, sentinel: &str) -> Result<Event, Rejected> {
    let fragment = line.strip_prefix(sentinel).ok_or(Rejected::NotAnEvent)?;
    let payload = Payload::new(fragment);

    match payload.string("type") {
        "" => Err(Rejected::Malformed("missing type")),
        "task_start" | "award_start" => Ok(Event::TaskStart {
            task: task_code(&payload)?,
        }),
        "task_finish" | "award_finish" => {
            let task = task_code(&payload)?;
            let outcome = if payload.boolean("success") {
                Outcome::Success(Stats::from_payload(payload.object("stats")))
            } else {
                Outcome::Failure {
                    error: payload.string("error").to_string(),
                }
            };
            Ok(Event::TaskFinish { task, outcome })
        }
        "phase_start" => Ok(Event::PhaseStart {
            phase: phase(&payload)?,
        }),
        "phase_finish" => Ok(Event::PhaseFinish {
            phase: phase(&payload)?,
            total_updated: payload.integer("total_updated"),
        }),
        "tmdb_start" => Ok(Event::PhaseStart { phase: Phase::Images }),
        "tmdb_finish" => Ok(Event::PhaseFinish {
            phase: Phase::Images,
            total_updated: payload.integer("total_updated"),
        }),
        "upload_start" => Ok(Event::PhaseStart { phase: Phase::Upload }),
        "pipeline_finish" => Ok(Event::PipelineFinish),
        other => Err(Rejected::UnknownKind(other.to_string())),
    }
}


fn task_code(payload: &Payload<'_>) -> Result<String, Rejected> {
    let code = match payload.string("task") {
        "" => payload.string("award"),
        code => code,
    };

    if code.is_empty() {
        Err(Rejected::Malformed("missing task code"))
    } else {
        Ok(code.to_string())
    }
}


fn phase(payload: &Payload<'_>) -> Result<Phase, Rejected> {
    Phase::parse(payload.string("phase")).ok_or(Rejected::Malformed("unknown phase"))
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(line: &str) -> Result<Event, Rejected> {
        classify(line, DEFAULT_SENTINEL)
    }

    #[test]
    fn task_start() {
        assert_eq!(
            parse(r#"EMIT:{"type":"task_start","task":"oscar"}"#),
            Ok(Event::TaskStart { task: "oscar".into() })
        );
    }

    #[test]
    fn task_finish_success_folds_counters() {
        let event = parse(
            r#"EMIT:{"type":"task_finish","task":"sag","success":true,"stats":{"best-film":2,"best-director":0,"best-actor":5,"best-actress":5,"breakthrough-performance":1}}"#,
        );
        assert_eq!(
            event,
            Ok(Event::TaskFinish {
                task: "sag".into(),
                outcome: Outcome::Success(Stats { films: 2, directors: 0, performers: 11 }),
            })
        );
    }

    #[test]
    fn task_finish_failure_carries_error() {
        assert_eq!(
            parse(r#"EMIT:{"type":"task_finish","task":"oscar","success":false,"error":"timeout"}"#),
            Ok(Event::TaskFinish {
                task: "oscar".into(),
                outcome: Outcome::Failure { error: "timeout".into() },
            })
        );
    }

    #[test]
    fn missing_success_means_failure() {
        assert_eq!(
            parse(r#"EMIT:{"type":"task_finish","task":"gg"}"#),
            Ok(Event::TaskFinish {
                task: "gg".into(),
                outcome: Outcome::Failure { error: String::new() },
            })
        );
    }

    #[test]
    fn award_aliases() {
        assert_eq!(
            parse(r#"EMIT:{"type": "award_start", "award": "bafta"}"#),
            Ok(Event::TaskStart { task: "bafta".into() })
        );
    }

    #[rstest]
    #[case::phase_start(r#"EMIT:{"type":"phase_start","phase":"upload"}"#, Event::PhaseStart { phase: Phase::Upload })]
    #[case::phase_default(r#"EMIT:{"type":"phase_start"}"#, Event::PhaseStart { phase: Phase::Images })]
    #[case::tmdb_start(r#"EMIT:{"type":"tmdb_start"}"#, Event::PhaseStart { phase: Phase::Images })]
    #[case::tmdb_finish(r#"EMIT:{"type":"tmdb_finish","total_updated":120}"#, Event::PhaseFinish { phase: Phase::Images, total_updated: 120 })]
    #[case::phase_finish(r#"EMIT:{"type":"phase_finish","phase":"tmdb"}"#, Event::PhaseFinish { phase: Phase::Images, total_updated: 0 })]
    #[case::upload_start(r#"EMIT:{"type":"upload_start"}"#, Event::PhaseStart { phase: Phase::Upload })]
    #[case::pipeline_finish(r#"EMIT:{"type":"pipeline_finish"}"#, Event::PipelineFinish)]
    fn pipeline_events(#[case] line: &str, #[case] expected: Event) {
        assert_eq!(parse(line), Ok(expected));
    }

    #[rstest]
    #[case::no_sentinel("not-an-event", Rejected::NotAnEvent)]
    #[case::sentinel_not_at_start(r#"  EMIT:{"type":"task_start","task":"oscar"}"#, Rejected::NotAnEvent)]
    #[case::empty("EMIT:", Rejected::Malformed("missing type"))]
    #[case::garbage("EMIT:}{", Rejected::Malformed("missing type"))]
    #[case::no_task(r#"EMIT:{"type":"task_start"}"#, Rejected::Malformed("missing task code"))]
    #[case::bad_phase(r#"EMIT:{"type":"phase_start","phase":"render"}"#, Rejected::Malformed("unknown phase"))]
    #[case::unknown(r#"EMIT:{"type":"heartbeat"}"#, Rejected::UnknownKind("heartbeat".into()))]
    fn rejected_lines(#[case] line: &str, #[case] expected: Rejected) {
        assert_eq!(parse(line), Err(expected));
    }

    #[test]
    fn custom_sentinel() {
        assert_eq!(
            classify(r#"@@{"type":"pipeline_finish"}"#, "@@"),
            Ok(Event::PipelineFinish)
        );
        assert_eq!(
            classify(r#"EMIT:{"type":"pipeline_finish"}"#, "@@"),
            Err(Rejected::NotAnEvent)
        );
    }

    #[test]
    fn stats_summary() {
        let stats = Stats { films: 10, directors: 5, performers: 20 };
        assert_eq!(stats.summary(), "10 Films, 5 Dirs, 20 Actors");
        assert!(!stats.is_empty());
        assert!(Stats::default().is_empty());
    }
}
