// Query Routing
//
// Wraps query engines as described tools and forwards each query to
// the one tool a selector picks.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::{LanguageModel, QueryEngine, RagError};

/// Name and description a selector chooses between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
}

/// A query engine with the metadata used to route to it.
pub struct QueryEngineTool {
    pub metadata: ToolMetadata,
    engine: Box<dyn QueryEngine>,
}

impl QueryEngineTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        engine: impl QueryEngine + 'static,
    ) -> Self {
        Self {
            metadata: ToolMetadata {
                name: name.into(),
                description: description.into(),
            },
            engine: Box::new(engine),
        }
    }
}

/// Picks one of several choices for a query.
pub trait Selector: Send + Sync {
    /// Index into `choices` of the selected tool.
    fn select(&self, query: &str, choices: &[ToolMetadata]) -> Result<usize, RagError>;
}

/// Asks the language model to pick a numbered choice.
pub struct LlmSingleSelector {
    llm: Arc<dyn LanguageModel>,
}

impl LlmSingleSelector {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

impl Selector for LlmSingleSelector {
    fn select(&self, query: &str, choices: &[ToolMetadata]) -> Result<usize, RagError> {
        if choices.is_empty() {
            return Err(RagError::NoTools);
        }

        let reply = self.llm.complete(&selection_prompt(query, choices))?;
        parse_choice(&reply, choices.len())
    }
}

fn selection_prompt(query: &str, choices: &[ToolMetadata]) -> String {
    let listing: Vec<String> = choices
        .iter()
        .enumerate()
        .map(|(i, c)| format!("({}) {}", i + 1, c.description))
        .collect();

    format!(
        "Some choices are given below. It is provided in a numbered list \
         (1 to {}), where each item in the list corresponds to a summary.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Using only the choices above and not prior knowledge, return the \
         choice that is most relevant to the question: '{}'\n\
         Reply with the number of the choice only.",
        choices.len(),
        listing.join("\n\n"),
        query
    )
}

/// First integer in the reply, as a zero-based index.
fn parse_choice(reply: &str, count: usize) -> Result<usize, RagError> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    let number: usize = digits
        .parse()
        .map_err(|_| RagError::Selection(format!("no choice number in reply {reply:?}")))?;

    if number == 0 || number > count {
        return Err(RagError::Selection(format!(
            "choice {number} out of range 1..={count}"
        )));
    }
    Ok(number - 1)
}

/// Routes every query to a single selected tool.
pub struct RouterQueryEngine {
    selector: Box<dyn Selector>,
    tools: Vec<QueryEngineTool>,
}

impl RouterQueryEngine {
    pub fn new(selector: impl Selector + 'static, tools: Vec<QueryEngineTool>) -> Self {
        Self {
            selector: Box::new(selector),
            tools,
        }
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolMetadata> {
        self.tools.iter().map(|t| &t.metadata)
    }
}

impl QueryEngine for RouterQueryEngine {
    fn query(&self, query: &str) -> Result<String, RagError> {
        if self.tools.is_empty() {
            return Err(RagError::NoTools);
        }

        let choices: Vec<ToolMetadata> = self.tools().cloned().collect();
        let selected = self.selector.select(query, &choices)?;
        let tool = self.tools.get(selected).ok_or_else(|| {
            RagError::Selection(format!("selector returned unknown tool {selected}"))
        })?;

        info!(tool = %tool.metadata.name, "query routed");
        tool.engine.query(query)
    }
}
