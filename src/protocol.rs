//! JSON envelopes exchanged between clients, managers and the coordinator.
//!
//! Every request is `{"request": <kind>, "data": <payload>}` and every reply
//! is `{"response": <kind>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::error::{FarmError, Result};
use crate::scheduler::{Assignment, ClientRecord, ClientReport, Job, SubmissionAck, TaskRef};

pub const CLIENT_UPDATE: &str = "client-update";
pub const ADD_JOBS: &str = "add-jobs";

/// A parsed inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// The empty request kind; answered with an empty body.
    Noop,
    ClientUpdate(ClientReport),
    AddJobs(Vec<Job>),
}

#[derive(Deserialize)]
struct RawRequest {
    request: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl Request {
    /// Parse a request body. A body that is not a JSON envelope, or whose
    /// payload does not fit its kind, is [`FarmError::MalformedRequest`]; a
    /// well-formed envelope with an unrecognized kind is
    /// [`FarmError::UnknownRequest`].
    pub fn parse(body: &str) -> Result<Self> {
        let raw: RawRequest =
            serde_json::from_str(body).map_err(|e| FarmError::MalformedRequest(e.to_string()))?;

        match raw.request.as_str() {
            "" => Ok(Request::Noop),
            CLIENT_UPDATE => serde_json::from_value(raw.data)
                .map(Request::ClientUpdate)
                .map_err(|e| FarmError::MalformedRequest(e.to_string())),
            ADD_JOBS => parse_jobs(raw.data).map(Request::AddJobs),
            other => Err(FarmError::UnknownRequest(other.to_string())),
        }
    }
}

/// `add-jobs` data and job files hold a list of jobs or a single job object.
pub fn parse_jobs(data: serde_json::Value) -> Result<Vec<Job>> {
    let jobs = if data.is_array() {
        serde_json::from_value(data)
    } else {
        serde_json::from_value(data).map(|job| vec![job])
    };
    jobs.map_err(|e| FarmError::MalformedRequest(e.to_string()))
}

/// Outbound request envelope, built by clients and managers.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    pub request: &'a str,
    pub data: T,
}

/// Reply to a `client-update` poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReply {
    pub client: ClientRecord,
    pub new_tasks: Vec<Assignment>,
    pub tasks_to_remove: Vec<TaskRef>,
}

/// Every reply the coordinator sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", content = "data", rename_all = "lowercase")]
pub enum Response {
    Update(UpdateReply),
    Ok(Vec<SubmissionAck>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskStatus;

    #[test]
    fn parse_client_update() {
        let body = r#"{"request":"client-update","data":{"hostname":"box","id":"","max_threads":4,"free_threads":2,
            "tasks":[{"job":{"id":"j1","name":"x","threads_per_task":1},"task":{"index":3,"status":"working","name":"t","call":"true"}}]}}"#;

        match Request::parse(body).unwrap() {
            Request::ClientUpdate(report) => {
                assert_eq!(report.hostname, "box");
                assert_eq!(report.max_threads, 4);
                assert_eq!(report.free_threads, 2);
                assert_eq!(report.tasks.len(), 1);
                assert_eq!(report.tasks[0], TaskRef::new("j1", 3, TaskStatus::Working));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn parse_add_jobs_accepts_array_and_single_object() {
        let array = r#"{"request":"add-jobs","data":[{"name":"a","tasks":[{"call":"true"}]},{"name":"b","tasks":[]}]}"#;
        let single = r#"{"request":"add-jobs","data":{"name":"a","tasks":[{"call":"true"}]}}"#;

        match Request::parse(array).unwrap() {
            Request::AddJobs(jobs) => assert_eq!(jobs.len(), 2),
            other => panic!("unexpected request: {:?}", other),
        }
        match Request::parse(single).unwrap() {
            Request::AddJobs(jobs) => {
                assert_eq!(jobs.len(), 1);
                assert_eq!(jobs[0].tasks[0].args, Vec::<String>::new());
                assert_eq!(jobs[0].tasks[0].status, TaskStatus::Pending);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn empty_request_kind_is_noop() {
        assert_eq!(Request::parse(r#"{"request":""}"#).unwrap(), Request::Noop);
    }

    #[test]
    fn unknown_kind_is_distinct_from_malformed_body() {
        let unknown = Request::parse(r#"{"request":"reboot","data":{}}"#);
        assert!(matches!(unknown, Err(FarmError::UnknownRequest(kind)) if kind == "reboot"));

        let not_json = Request::parse("{not json");
        assert!(matches!(not_json, Err(FarmError::MalformedRequest(_))));

        let bad_payload = Request::parse(r#"{"request":"add-jobs","data":[{"tasks":[{"args":[]}]}]}"#);
        assert!(matches!(bad_payload, Err(FarmError::MalformedRequest(_))));
    }

    #[test]
    fn response_envelope_shape() {
        let reply = Response::Ok(vec![SubmissionAck {
            id: "id-1".to_string(),
            name: "a".to_string(),
            task_count: 2,
        }]);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["response"], "ok");
        assert_eq!(json["data"][0]["task_count"], 2);
    }
}
