//! Structured events emitted by capture, repair, transform and evaluation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Pass,
    Skipped,
    Fail,
}

impl EventOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Skipped => "skipped",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmEvent {
    pub trace_id: String,
    pub component: String,
    pub event: String,
    pub outcome: EventOutcome,
    pub error_code: Option<String>,
    pub detail: Option<String>,
}

/// Append-only event sink owned by a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    trace_id: String,
    events: Vec<RealmEvent>,
}

impl EventLog {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            events: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn pass(&mut self, component: &str, event: &str) {
        self.push(component, event, EventOutcome::Pass, None, None);
    }

    pub fn skipped(&mut self, component: &str, event: &str, detail: impl Into<String>) {
        self.push(
            component,
            event,
            EventOutcome::Skipped,
            None,
            Some(detail.into()),
        );
    }

    pub fn fail(&mut self, component: &str, event: &str, error_code: &str, detail: impl Into<String>) {
        self.push(
            component,
            event,
            EventOutcome::Fail,
            Some(error_code.to_string()),
            Some(detail.into()),
        );
    }

    fn push(
        &mut self,
        component: &str,
        event: &str,
        outcome: EventOutcome,
        error_code: Option<String>,
        detail: Option<String>,
    ) {
        self.events.push(RealmEvent {
            trace_id: self.trace_id.clone(),
            component: component.to_string(),
            event: event.to_string(),
            outcome,
            error_code,
            detail,
        });
    }

    pub fn events(&self) -> &[RealmEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events for one component, in emission order.
    pub fn for_component<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a RealmEvent> + 'a {
        self.events.iter().filter(move |e| e.component == component)
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_trace_id_and_outcome() {
        let mut log = EventLog::new("trace-1");
        log.pass("unsafe_rec", "capture");
        log.skipped("repair_accessors", "repair", "host already safe");
        log.fail("transforms", "rewrite", "FE-REALM-0004", "boom");

        assert_eq!(log.len(), 3);
        assert!(log.events().iter().all(|e| e.trace_id == "trace-1"));
        assert_eq!(log.events()[1].outcome, EventOutcome::Skipped);
        assert_eq!(log.events()[2].error_code.as_deref(), Some("FE-REALM-0004"));
        assert_eq!(log.for_component("transforms").count(), 1);
    }

    #[test]
    fn json_lines_are_parseable() {
        let mut log = EventLog::new("t");
        log.pass("realm", "create");
        log.pass("realm", "evaluate");
        let text = log.to_json_lines().unwrap();
        let parsed: Vec<RealmEvent> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed, log.events());
        assert!(text.contains("\"outcome\":\"pass\""));
    }
}
