//! Replays a conversation through every strategy and records prompt sizes

use crate::context::{Message, Role, TokenCounter};
use crate::error::Result;
use crate::manager::ContextManager;
use crate::strategy::StrategyKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Prompt cost before one user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnTokens {
    /// 1-based position of the user message in the conversation
    pub message_index: usize,
    pub prompt_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    pub turns: Vec<TurnTokens>,
    /// Set when the replay stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type EvaluationReport = IndexMap<StrategyKind, StrategyReport>;

pub fn evaluation_session(kind: StrategyKind) -> String {
    format!("eval_{}", kind)
}

pub fn evaluation_prompt(context: &str, text: &str) -> String {
    format!("Context: {}\n\nUser: {}\n\nAssistant:", context, text)
}

/// Replay `conversation` on a fresh `eval_<strategy>` session per strategy.
///
/// A failing strategy gets its error recorded and the others still run.
pub async fn evaluate_conversation(
    manager: &ContextManager,
    conversation: &[Message],
    counter: &dyn TokenCounter,
) -> EvaluationReport {
    let mut report = EvaluationReport::new();
    for kind in StrategyKind::ALL {
        let session = evaluation_session(kind);
        let mut strategy_report = StrategyReport::default();
        if let Err(e) = replay(manager, kind, &session, conversation, counter, &mut strategy_report).await {
            error!("Evaluation of {} failed: {}", kind, e);
            strategy_report.error = Some(e.to_string());
        }
        info!(
            "Evaluated {} over {} messages ({} user turns)",
            kind,
            conversation.len(),
            strategy_report.turns.len()
        );
        report.insert(kind, strategy_report);
    }
    report
}

async fn replay(
    manager: &ContextManager,
    kind: StrategyKind,
    session: &str,
    conversation: &[Message],
    counter: &dyn TokenCounter,
    report: &mut StrategyReport,
) -> Result<()> {
    let strategy = manager.strategy(kind);
    strategy.clear_session(session).await?;

    for (i, message) in conversation.iter().enumerate() {
        if message.role == Role::User {
            let context = strategy.get_context(session).await?;
            let prompt = evaluation_prompt(&context.render(), &message.content);
            report.turns.push(TurnTokens {
                message_index: i + 1,
                prompt_tokens: counter.count(&prompt),
            });
        }
        strategy.add_message(session, message.clone()).await?;
    }
    Ok(())
}
