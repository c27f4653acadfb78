//! Session Runner
//!
//! The caller-facing boundary: `run(session_id, text) -> reply`. Loads the
//! checkpoint, appends the user turn, drives the graph and saves the result.
//! Runs for the same session are serialized; different sessions proceed
//! independently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::graph::{AgentGraph, GraphEvent, RunReport};
use crate::message::{History, Turn};
use crate::session::{SessionId, SessionStore};

/// Drives the shared graph against stored sessions
pub struct SessionRunner {
    graph: Arc<AgentGraph>,
    store: Arc<dyn SessionStore>,
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionRunner {
    pub fn new(graph: Arc<AgentGraph>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            graph,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Send `text` to the session and return the final assistant reply
    pub async fn run(&self, id: &SessionId, text: &str) -> Result<String> {
        self.run_with_events(id, text, None)
            .await
            .map(|report| report.final_content)
    }

    /// Like [`run`](Self::run), streaming graph progress to `events`
    pub async fn run_with_events(
        &self,
        id: &SessionId,
        text: &str,
        events: Option<&UnboundedSender<GraphEvent>>,
    ) -> Result<RunReport> {
        if text.trim().is_empty() {
            return Err(AgentError::Validation("message must not be empty".into()));
        }

        let lock = self.session_lock(id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.run_locked(id, text, events).await
        };
        self.release_lock(id, lock).await;
        outcome
    }

    async fn run_locked(
        &self,
        id: &SessionId,
        text: &str,
        events: Option<&UnboundedSender<GraphEvent>>,
    ) -> Result<RunReport> {
        let mut history = self.store.load(id).await?;
        if history.is_empty() {
            tracing::info!(session = %id, "Starting new session");
            history = History::with_system_prompt(self.graph.config().system_prompt.clone());
        }
        history.push(Turn::user(text));

        match self.graph.invoke_with_events(&mut history, events).await {
            Ok(report) => {
                self.store.save(id, &history).await?;
                tracing::info!(
                    session = %id,
                    turns = history.len(),
                    reasoning_steps = report.reasoning_steps,
                    "Run complete"
                );
                Ok(report)
            }
            Err(e @ AgentError::RunawayLoop { .. }) => {
                // Keep the partial progress so the session can be resumed
                self.store.save(id, &history).await?;
                tracing::warn!(session = %id, turns = history.len(), "Run stopped at step bound");
                Err(e)
            }
            Err(e) => {
                // Nothing from this run is persisted; a retry starts from the last checkpoint
                tracing::error!(session = %id, error = %e, "Run failed");
                Err(e)
            }
        }
    }

    /// Stored history for a session
    pub async fn history(&self, id: &SessionId) -> Result<History> {
        self.store.load(id).await
    }

    /// Forget a session
    pub async fn reset(&self, id: &SessionId) -> Result<bool> {
        let lock = self.session_lock(id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.store.delete(id).await
        };
        self.release_lock(id, lock).await;
        outcome
    }

    pub fn graph(&self) -> &Arc<AgentGraph> {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    async fn session_lock(&self, id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the session's lock entry once no other run holds or awaits it.
    ///
    /// Clones are only handed out under the map lock, so a count of two
    /// (the map's and ours) cannot grow while we hold it.
    async fn release_lock(&self, id: &SessionId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let idle = Arc::strong_count(&lock) == 2
            && locks.get(id).is_some_and(|held| Arc::ptr_eq(held, &lock));
        if idle {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    async fn lock_entries(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AgentGraphBuilder;
    use crate::message::Role;
    use crate::session::MemorySessionStore;
    use crate::provider::LlmProvider;
    use crate::testing::{call_response, text_response, wait_until, GatedProvider, OkTool, ScriptedProvider};
    use serde_json::json;

    fn runner_with(provider: Arc<dyn LlmProvider>, max_steps: usize) -> SessionRunner {
        let graph = AgentGraphBuilder::new()
            .provider(provider)
            .tool(OkTool::new("lookup"))
            .system_prompt("You are a researcher.")
            .max_steps(max_steps)
            .build()
            .unwrap();
        SessionRunner::new(Arc::new(graph), Arc::new(MemorySessionStore::new()))
    }

    #[tokio::test]
    async fn test_new_session_is_seeded_and_saved() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("Which field?")]));
        let runner = runner_with(provider.clone(), 5);
        let id = SessionId::parse("s").unwrap();

        let reply = runner.run(&id, "search for X").await.unwrap();
        assert_eq!(reply, "Which field?");

        let history = runner.history(&id).await.unwrap();
        let roles: Vec<Role> = history.turns().iter().map(Turn::role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(history.turns()[0].content(), "You are a researcher.");
        assert_eq!(provider.histories()[0][0].role(), Role::System);
    }

    #[tokio::test]
    async fn test_tool_run_saves_three_new_turns() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("call_0", "lookup", json!({})),
            text_response("All done."),
        ]));
        let runner = runner_with(provider, 5);
        let id = SessionId::parse("s").unwrap();

        runner.run(&id, "go").await.unwrap();
        // system + user + assistant(call) + tool + assistant
        assert_eq!(runner.history(&id).await.unwrap().len(), 2 + 3);
    }

    #[tokio::test]
    async fn test_session_resumes_across_runs() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("reply one"),
            text_response("reply two"),
        ]));
        let runner = runner_with(provider.clone(), 5);
        let id = SessionId::parse("resume").unwrap();

        runner.run(&id, "first").await.unwrap();
        runner.run(&id, "second").await.unwrap();

        let history = runner.history(&id).await.unwrap();
        let contents: Vec<&str> = history.turns().iter().map(Turn::content).collect();
        assert_eq!(
            contents,
            vec!["You are a researcher.", "first", "reply one", "second", "reply two"]
        );

        // The second model call saw everything from the first run
        let second_call = &provider.histories()[1];
        assert_eq!(second_call.len(), 4);
        assert_eq!(second_call[1].content(), "first");
        assert_eq!(second_call[3].content(), "second");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("a"), text_response("b")]));
        let runner = runner_with(provider.clone(), 5);

        runner.run(&SessionId::parse("one").unwrap(), "hello one").await.unwrap();
        runner.run(&SessionId::parse("two").unwrap(), "hello two").await.unwrap();

        // Second session started from its own system + user turns only
        assert_eq!(provider.histories()[1].len(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_previous_checkpoint() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("first reply"),
            call_response("call_0", "lookup", json!({})),
            Err(AgentError::BackendUnavailable("down".into())),
        ]));
        let runner = runner_with(provider.clone(), 5);
        let id = SessionId::parse("s").unwrap();

        runner.run(&id, "first").await.unwrap();
        let checkpoint = runner.history(&id).await.unwrap();

        let err = runner.run(&id, "second").await.unwrap_err();
        assert!(matches!(err, AgentError::BackendUnavailable(_)));
        assert_eq!(runner.history(&id).await.unwrap(), checkpoint);

        // Retrying the same message does not duplicate the user turn
        provider.push(text_response("second reply"));
        runner.run(&id, "second").await.unwrap();
        let history = runner.history(&id).await.unwrap();
        let users = history.turns().iter().filter(|t| t.role() == Role::User).count();
        assert_eq!(users, 2);
        assert_eq!(history.len(), checkpoint.len() + 2);
    }

    #[tokio::test]
    async fn test_runaway_loop_saves_progress() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("a", "lookup", json!({})),
            call_response("b", "lookup", json!({})),
        ]));
        let runner = runner_with(provider, 1);
        let id = SessionId::parse("s").unwrap();

        let err = runner.run(&id, "loop forever").await.unwrap_err();
        assert!(matches!(err, AgentError::RunawayLoop { max_steps: 1 }));

        let history = runner.history(&id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history.last().unwrap().role(), Role::Tool);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let runner = runner_with(Arc::new(ScriptedProvider::new(vec![])), 5);
        let id = SessionId::parse("s").unwrap();
        assert!(matches!(runner.run(&id, "   ").await, Err(AgentError::Validation(_))));
        assert!(runner.history(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_runs_on_one_session_do_not_interleave() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("call_0", "lookup", json!({})),
            text_response("one"),
            call_response("call_0", "lookup", json!({})),
            text_response("two"),
        ]));
        let runner = Arc::new(runner_with(provider, 5));
        let id = SessionId::parse("shared").unwrap();

        let (a, b) = tokio::join!(runner.run(&id, "first"), runner.run(&id, "second"));
        a.unwrap();
        b.unwrap();

        let history = runner.history(&id).await.unwrap();
        let roles: Vec<Role> = history.turns().iter().map(Turn::role).collect();
        let one_run = [Role::User, Role::Assistant, Role::Tool, Role::Assistant];
        assert_eq!(roles[0], Role::System);
        assert_eq!(&roles[1..5], &one_run);
        assert_eq!(&roles[5..9], &one_run);
    }

    #[tokio::test]
    async fn test_reset_forgets_session() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("hi")]));
        let runner = runner_with(provider, 5);
        let id = SessionId::parse("s").unwrap();

        runner.run(&id, "hello").await.unwrap();
        assert!(runner.reset(&id).await.unwrap());
        assert!(runner.history(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_does_not_split_queued_runs() {
        let provider = Arc::new(GatedProvider::new());
        let runner = Arc::new(runner_with(provider.clone(), 5));
        let id = SessionId::parse("shared").unwrap();

        let first = tokio::spawn({
            let (runner, id) = (runner.clone(), id.clone());
            async move { runner.run(&id, "zero").await }
        });
        wait_until(|| provider.calls() == 1).await;

        // Queue a reset and then another run behind the one in progress
        let reset = tokio::spawn({
            let (runner, id) = (runner.clone(), id.clone());
            async move { runner.reset(&id).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let (runner, id) = (runner.clone(), id.clone());
            async move { runner.run(&id, "bee").await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        provider.open(1);
        first.await.unwrap().unwrap();
        assert!(reset.await.unwrap().unwrap());
        wait_until(|| provider.calls() == 2).await;

        // Starts after the reset returned, while "bee" is still at the model
        let third = tokio::spawn({
            let (runner, id) = (runner.clone(), id.clone());
            async move { runner.run(&id, "cee").await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.calls(), 2);

        provider.open(2);
        second.await.unwrap().unwrap();
        third.await.unwrap().unwrap();

        assert_eq!(provider.max_in_flight(), 1);
        let history = runner.history(&id).await.unwrap();
        let users: Vec<&str> = history
            .turns()
            .iter()
            .filter(|t| t.role() == Role::User)
            .map(Turn::content)
            .collect();
        assert_eq!(users, vec!["bee", "cee"]);
    }

    #[tokio::test]
    async fn test_finished_sessions_leave_no_lock_entries() {
        let script = (0..100).map(|i| text_response(&format!("reply {}", i))).collect();
        let runner = runner_with(Arc::new(ScriptedProvider::new(script)), 5);

        for _ in 0..100 {
            runner.run(&SessionId::new(), "one-shot question").await.unwrap();
        }
        assert_eq!(runner.lock_entries().await, 0);

        let id = SessionId::parse("gone").unwrap();
        assert!(!runner.reset(&id).await.unwrap());
        assert_eq!(runner.lock_entries().await, 0);
    }
}
