use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use microql_core::{Args, MicroQlError, Service};

/// One recorded invocation of a `StubService` action.
#[derive(Debug, Clone)]
pub struct Call {
    pub action: String,
    pub args: Value,
}

/// A configurable test double implementing `Service` — canned responses per
/// action, with every call recorded for later assertion. Mirrors the
/// spirit of a hand-rolled mock controller in an HTTP test suite, adapted
/// to the `Service` call boundary rather than routes.
pub struct StubService {
    actions: Vec<&'static str>,
    responses: Mutex<Vec<(String, Result<Value, String>)>>,
    calls: Mutex<Vec<Call>>,
}

impl StubService {
    /// A stub exposing `actions`, with no canned responses configured yet —
    /// every call will fail until `respond`/`fail` is called for it.
    pub fn new(actions: Vec<&'static str>) -> Self {
        StubService { actions, responses: Mutex::new(Vec::new()), calls: Mutex::new(Vec::new()) }
    }

    /// Queue a successful response for the next call to `action`. Multiple
    /// queued responses for the same action are consumed in order, letting
    /// a test simulate a flaky service that succeeds on a later attempt.
    pub fn respond(self, action: &str, value: Value) -> Self {
        self.responses.lock().unwrap().push((action.to_string(), Ok(value)));
        self
    }

    /// Queue a failing response for the next call to `action`.
    pub fn fail(self, action: &str, message: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push((action.to_string(), Err(message.into())));
        self
    }

    /// All calls recorded so far, in invocation order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, action: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.action == action).count()
    }
}

#[async_trait]
impl Service for StubService {
    fn actions(&self) -> &[&str] {
        &self.actions
    }

    async fn call(&self, action: &str, args: Args) -> Result<Value, MicroQlError> {
        let args_json = microql_core::args_to_json(&args).unwrap_or(Value::Null);
        self.calls.lock().unwrap().push(Call { action: action.to_string(), args: args_json });

        let mut responses = self.responses.lock().unwrap();
        let index = responses.iter().position(|(a, _)| a == action);
        match index {
            Some(i) => match responses.remove(i).1 {
                Ok(value) => Ok(value),
                Err(message) => Err(MicroQlError::service(message)),
            },
            None => Err(MicroQlError::service(format!("StubService has no queued response for '{action}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_queued_responses_in_order_and_records_calls() {
        let stub = StubService::new(vec!["greet"])
            .respond("greet", Value::String("hi".to_string()))
            .respond("greet", Value::String("hi again".to_string()));

        let first = stub.call("greet", Args::new()).await.unwrap();
        let second = stub.call("greet", Args::new()).await.unwrap();
        assert_eq!(first, Value::String("hi".to_string()));
        assert_eq!(second, Value::String("hi again".to_string()));
        assert_eq!(stub.call_count("greet"), 2);
    }

    #[tokio::test]
    async fn an_unqueued_call_is_a_service_error() {
        let stub = StubService::new(vec!["greet"]);
        let err = stub.call("greet", Args::new()).await.unwrap_err();
        assert!(err.to_string().contains("no queued response"));
    }
}
