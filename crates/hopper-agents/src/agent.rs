use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use hopper_core::agent::{
    ActionAgent, AgentOutcome, AgentRun, AgentState, AgentStep, Observation, ToolCall,
    ToolInvocation, ToolOutcome,
};
use hopper_core::config::AppConfig;
use hopper_core::conversation::{render_turns, ConversationTurn};
use hopper_core::generation::{GenerationRequest, TextGenerator};
use hopper_core::tool::{Tool, ToolContext};

use crate::action::{parse_reply, validate, ProposedAction};

const CONTEXT_TURNS: usize = 4;

/// Bounded ReAct loop over a fixed set of tools.
pub struct ToolAgent {
    generator: Arc<dyn TextGenerator>,
    tools: BTreeMap<String, Arc<dyn Tool>>,
    max_steps: usize,
    step_timeout: Duration,
}

/// Result of one step: keep looping, or stop in a terminal state.
enum StepResult {
    Continue,
    Finish(String),
    Fail(String),
}

impl ToolAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, tools: Vec<Arc<dyn Tool>>, config: &AppConfig) -> Self {
        Self {
            generator,
            tools: tools.into_iter().map(|t| (t.name().to_string(), t)).collect(),
            max_steps: config.agent.max_steps.max(1),
            step_timeout: Duration::from_secs(config.agent.step_timeout_secs),
        }
    }

    pub fn with_limits(mut self, max_steps: usize, step_timeout: Duration) -> Self {
        self.max_steps = max_steps.max(1);
        self.step_timeout = step_timeout;
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    fn system_prompt(&self) -> String {
        let tools: Vec<String> = self.tools.values().map(|t| format!("- {}", t.schema().describe())).collect();
        format!(
            "You carry out tasks for the user with the tools below.\n\n\
             Tools:\n{}\n\n\
             Reply with exactly one step:\n\
             Thought: <your reasoning>\n\
             Action: <tool> {{\"argument\": \"value\"}}\n\n\
             When the task is complete, reply instead:\n\
             Thought: <your reasoning>\n\
             FINISH: <answer for the user>\n\n\
             Never write an Observation yourself.",
            tools.join("\n")
        )
    }

    fn prompt(&self, task: &str, context: &[ConversationTurn], steps: &[AgentStep]) -> String {
        let mut prompt = String::new();
        let history = render_turns(context, CONTEXT_TURNS);
        if !history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&history);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Task: ");
        prompt.push_str(task);
        prompt.push('\n');

        for step in steps {
            prompt.push_str(&format!("\nThought: {}\n", step.thought));
            if let Some(action) = &step.action {
                prompt.push_str(&format!(
                    "Action: {} {}\n",
                    action.tool,
                    serde_json::Value::Object(action.arguments.clone())
                ));
            }
            if let Some(observation) = &step.observation {
                let label = if observation.is_error { "Observation (error)" } else { "Observation" };
                prompt.push_str(&format!("{label}: {}\n", observation.content));
            }
        }
        prompt
    }

    fn timed_out(&self, step: &AgentStep) -> String {
        format!("step {} timed out after {}ms", step.index + 1, self.step_timeout.as_millis())
    }

    /// One THINKING -> ACTING -> OBSERVING pass under a single deadline. The
    /// step is always filled in, whatever the outcome.
    async fn step(
        &self,
        ctx: &ToolContext,
        task: &str,
        context: &[ConversationTurn],
        steps: &[AgentStep],
        step: &mut AgentStep,
    ) -> StepResult {
        let deadline = tokio::time::Instant::now() + self.step_timeout;
        let request = GenerationRequest::new(self.prompt(task, context, steps))
            .system(self.system_prompt())
            .max_tokens(400)
            .temperature(0.2)
            .stop(["\nObservation"]);

        debug!(step = step.index, state = ?AgentState::Thinking, "Agent step");
        let reply = match tokio::time::timeout_at(deadline, self.generator.generate(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                step.observation = Some(Observation::error(format!("generation failed: {e}")));
                return StepResult::Fail(format!("generation failed: {e}"));
            }
            Err(_) => {
                let reason = self.timed_out(step);
                step.observation = Some(Observation::error(reason.clone()));
                return StepResult::Fail(reason);
            }
        };

        debug!(step = step.index, state = ?AgentState::Acting, "Agent step");
        let parsed = match parse_reply(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                step.thought = reply.trim().to_string();
                step.observation = Some(Observation::error(format!("{e}. Reply with one Action or FINISH line.")));
                return StepResult::Continue;
            }
        };
        step.thought = parsed.thought;

        let call = match parsed.action {
            ProposedAction::Finish(answer) => {
                step.finish = Some(answer.clone());
                return StepResult::Finish(answer);
            }
            ProposedAction::Call { tool, arguments } => match validate(&tool, arguments.clone(), &self.tools) {
                Ok(call) => call,
                Err(e) => {
                    step.action = Some(ToolCall { tool, arguments });
                    step.observation = Some(Observation::error(e.to_string()));
                    return StepResult::Continue;
                }
            },
        };

        debug!(step = step.index, state = ?AgentState::Observing, tool = %call.tool, "Agent step");
        step.action = Some(call.clone());
        self.observe(ctx, call, step, deadline).await
    }

    async fn observe(
        &self,
        ctx: &ToolContext,
        call: ToolCall,
        step: &mut AgentStep,
        deadline: tokio::time::Instant,
    ) -> StepResult {
        let Some(tool) = self.tools.get(&call.tool) else {
            step.observation = Some(Observation::error(format!("unknown tool '{}'", call.tool)));
            return StepResult::Continue;
        };

        let started = Instant::now();
        let result = tokio::time::timeout_at(deadline, tool.invoke(&call.arguments, ctx)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, observation, verdict) = match result {
            Ok(Ok(output)) => (
                ToolOutcome::Success { output: output.clone() },
                Observation::ok(output),
                StepResult::Continue,
            ),
            Ok(Err(e)) => {
                warn!(tool = %call.tool, error = %e, "Tool invocation failed");
                (
                    ToolOutcome::Error { message: e.to_string() },
                    Observation::error(e.to_string()),
                    StepResult::Continue,
                )
            }
            Err(_) => {
                let reason = format!("{} in tool '{}'", self.timed_out(step), call.tool);
                (
                    ToolOutcome::Error { message: reason.clone() },
                    Observation::error(reason.clone()),
                    StepResult::Fail(reason),
                )
            }
        };

        step.invocation = Some(ToolInvocation {
            tool: call.tool,
            arguments: call.arguments,
            outcome,
            duration_ms,
        });
        step.observation = Some(observation);
        verdict
    }
}

#[async_trait]
impl ActionAgent for ToolAgent {
    fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    #[instrument(skip(self, context), fields(max_steps = self.max_steps))]
    async fn run(&self, user_id: &str, task: &str, context: &[ConversationTurn]) -> AgentRun {
        let started_at = Utc::now();
        let ctx = ToolContext::for_user(user_id);
        let mut steps: Vec<AgentStep> = Vec::with_capacity(self.max_steps);
        let mut outcome = None;

        while steps.len() < self.max_steps {
            let mut step = AgentStep::new(steps.len(), "");
            let result = self.step(&ctx, task, context, &steps, &mut step).await;
            steps.push(step);
            match result {
                StepResult::Continue => {}
                StepResult::Finish(answer) => {
                    outcome = Some(AgentOutcome::Done { answer });
                    break;
                }
                StepResult::Fail(reason) => {
                    outcome = Some(AgentOutcome::Failed { reason });
                    break;
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| AgentOutcome::Failed {
            reason: format!("no answer after {} steps", self.max_steps),
        });
        let state = match outcome {
            AgentOutcome::Done { .. } => AgentState::Done,
            AgentOutcome::Failed { .. } => AgentState::Failed,
        };

        info!(steps = steps.len(), state = ?state, "Agent run finished");
        AgentRun {
            task: task.to_string(),
            steps,
            state,
            outcome,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use hopper_core::error::{HopperError, Result};
    use hopper_core::tool::{ArgType, ToolArguments, ToolParam, ToolSchema};

    /// Replays scripted replies, repeating the last one once exhausted.
    struct Script {
        replies: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl Script {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TextGenerator for Script {
        fn name(&self) -> &str {
            "script"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                Ok(replies.pop().unwrap())
            } else {
                replies.last().cloned().ok_or_else(|| HopperError::Generation("empty script".into()))
            }
        }
    }

    struct Echo {
        schema: ToolSchema,
        fail: bool,
        delay: Duration,
    }

    impl Echo {
        fn new(fail: bool) -> Self {
            Self {
                schema: ToolSchema::new("echo", "Echo text", vec![ToolParam::required("text", ArgType::String, "text")]),
                fail,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Tool for Echo {
        fn schema(&self) -> &ToolSchema {
            &self.schema
        }

        async fn invoke(&self, args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(HopperError::tool("echo", "broken"));
            }
            Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    fn agent(script: Script, fail: bool) -> ToolAgent {
        ToolAgent::new(Arc::new(script), vec![Arc::new(Echo::new(fail))], &AppConfig::default())
    }

    #[tokio::test]
    async fn runs_tool_then_finishes() {
        let agent = agent(
            Script::new(&[
                "Thought: echo it\nAction: echo {\"text\": \"salut\"}",
                "Thought: got it\nFINISH: SALUT",
            ]),
            false,
        );
        let run = agent.run("alice", "say salut loudly", &[]).await;

        assert_eq!(run.state, AgentState::Done);
        assert_eq!(run.answer(), Some("SALUT"));
        assert_eq!(run.steps.len(), 2);
        let invocation = run.invocations().next().unwrap();
        assert!(matches!(&invocation.outcome, ToolOutcome::Success { output } if output == "SALUT"));
    }

    #[tokio::test]
    async fn repeated_parse_failures_stop_at_the_ceiling() {
        let agent = agent(Script::new(&["I refuse to follow the format"]), false).with_limits(3, Duration::from_secs(1));
        let run = agent.run("alice", "anything", &[]).await;

        assert_eq!(run.state, AgentState::Failed);
        assert_eq!(run.steps.len(), 3);
        assert!(run.steps.iter().all(|s| s.observation.as_ref().is_some_and(|o| o.is_error)));
    }

    #[tokio::test]
    async fn invalid_action_gets_a_second_chance() {
        let agent = agent(
            Script::new(&[
                "Action: shout {\"text\": \"x\"}",
                "Action: echo {}",
                "FINISH: fine",
            ]),
            false,
        );
        let run = agent.run("alice", "anything", &[]).await;

        assert_eq!(run.state, AgentState::Done);
        assert_eq!(run.steps.len(), 3);
        let first = run.steps[0].observation.as_ref().unwrap();
        assert!(first.is_error && first.content.contains("unknown tool 'shout'"));
        assert!(run.steps[1].observation.as_ref().unwrap().content.contains("requires argument 'text'"));
        assert!(run.steps[0].invocation.is_none());
    }

    #[tokio::test]
    async fn tool_errors_become_observations() {
        let agent = agent(
            Script::new(&["Action: echo {\"text\": \"x\"}", "FINISH: gave up politely"]),
            true,
        );
        let run = agent.run("alice", "anything", &[]).await;

        assert_eq!(run.state, AgentState::Done);
        let observation = run.steps[0].observation.as_ref().unwrap();
        assert!(observation.is_error && observation.content.contains("broken"));
        assert!(matches!(run.steps[0].invocation.as_ref().unwrap().outcome, ToolOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn slow_step_fails_the_run() {
        let mut script = Script::new(&["FINISH: too late"]);
        script.delay = Duration::from_millis(200);
        let agent = agent(script, false).with_limits(5, Duration::from_millis(20));
        let run = agent.run("alice", "anything", &[]).await;

        assert_eq!(run.state, AgentState::Failed);
        assert_eq!(run.steps.len(), 1);
        assert!(matches!(&run.outcome, AgentOutcome::Failed { reason } if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn thinking_and_tool_share_one_step_deadline() {
        let mut script = Script::new(&["Action: echo {\"text\": \"x\"}", "FINISH: done"]);
        script.delay = Duration::from_millis(120);
        let mut echo = Echo::new(false);
        echo.delay = Duration::from_millis(120);
        let agent = ToolAgent::new(Arc::new(script), vec![Arc::new(echo)], &AppConfig::default())
            .with_limits(5, Duration::from_millis(200));

        let run = agent.run("alice", "anything", &[]).await;

        assert_eq!(run.state, AgentState::Failed);
        assert_eq!(run.steps.len(), 1);
        assert!(matches!(&run.outcome, AgentOutcome::Failed { reason } if reason.contains("step 1 timed out")));
        let invocation = run.steps[0].invocation.as_ref().unwrap();
        assert!(matches!(&invocation.outcome, ToolOutcome::Error { message } if message.contains("echo")));
    }

    struct Whoami(ToolSchema);

    #[async_trait]
    impl Tool for Whoami {
        fn schema(&self) -> &ToolSchema {
            &self.0
        }

        async fn invoke(&self, _args: &ToolArguments, ctx: &ToolContext) -> Result<String> {
            Ok(ctx.user_id.clone())
        }
    }

    #[tokio::test]
    async fn tools_run_on_behalf_of_the_requesting_user() {
        let whoami = Whoami(ToolSchema::new("whoami", "Current user", vec![]));
        let agent = ToolAgent::new(
            Arc::new(Script::new(&["Action: whoami {}", "FINISH: ok"])),
            vec![Arc::new(whoami)],
            &AppConfig::default(),
        );

        let run = agent.run("bob", "who am I", &[]).await;

        let invocation = run.invocations().next().unwrap();
        assert!(matches!(&invocation.outcome, ToolOutcome::Success { output } if output == "bob"));
    }

    #[test]
    fn prompt_replays_transcript() {
        let agent = agent(Script::new(&["FINISH: x"]), false);
        let mut step = AgentStep::new(0, "look it up");
        step.action = Some(ToolCall {
            tool: "echo".into(),
            arguments: serde_json::json!({"text": "a"}).as_object().cloned().unwrap(),
        });
        step.observation = Some(Observation::ok("A"));

        let prompt = agent.prompt("task", &[ConversationTurn::user("bonjour")], &[step]);
        assert!(prompt.starts_with("Conversation so far:\nuser: bonjour\n\nTask: task\n"));
        assert!(prompt.contains("Action: echo {\"text\":\"a\"}\nObservation: A\n"));
        assert!(agent.system_prompt().contains("- echo(text: string) - Echo text"));
    }
}
