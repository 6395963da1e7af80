use thoughtmap_schemas::{Message, MessageRole, ThoughtBrief, ThoughtId, ThoughtWithCategories};

pub const SYSTEM_PROMPT: &str = "You are an expert at finding non-obvious connections between ideas. \
You look for surprising patterns, complementary concepts, and creative synergies.";

/// What the model sees of one candidate thought
#[derive(Debug, Clone, PartialEq)]
pub struct ThoughtSummary {
    pub id: ThoughtId,
    pub title: String,
    pub snippet: String,
    pub categories: Vec<String>,
    pub is_completed: bool,
}

impl ThoughtSummary {
    pub fn brief(&self) -> ThoughtBrief {
        ThoughtBrief {
            title: self.title.clone(),
            categories: self.categories.clone(),
            is_completed: self.is_completed,
        }
    }
}

/// Summarize a candidate, falling back to the head of the content when the
/// snippet is missing or empty.
pub fn summarize(thought: &ThoughtWithCategories, fallback_chars: usize) -> ThoughtSummary {
    let snippet = match thought.thought.snippet.as_deref() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => thought.thought.content.chars().take(fallback_chars).collect(),
    };

    ThoughtSummary {
        id: thought.thought.id.clone(),
        title: thought.thought.title.clone(),
        snippet,
        categories: thought.category_names(),
        is_completed: thought.thought.is_completed,
    }
}

pub fn build_analysis_prompt(summaries: &[ThoughtSummary]) -> String {
    let listing = summaries
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let marker = if t.is_completed { " [completed]" } else { "" };
            format!(
                "{}. \"{}\" ({}){}\n   {}",
                i + 1,
                t.title,
                t.categories.join(", "),
                marker,
                t.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"Analyze these thoughts and find 3-5 surprising, non-obvious connections between them. Focus on thoughts from DIFFERENT categories that share hidden themes or could inspire each other.

{listing}

Return a JSON object with this structure:
{{
  "connections": [
    {{
      "thought1_index": 0,
      "thought2_index": 3,
      "reason": "Brief explanation of the surprising connection",
      "connection_type": "problem_solution | goal_steps | cause_effect | contradiction | other (optional)"
    }}
  ]
}}

Indices are 0-based positions in the list above.
Focus on quality over quantity. Only include truly interesting connections."#
    )
}

/// System instruction followed by the analysis prompt
pub fn analysis_messages(summaries: &[ThoughtSummary]) -> Vec<Message> {
    vec![
        Message {
            role: MessageRole::System,
            content: SYSTEM_PROMPT.to_string(),
        },
        Message {
            role: MessageRole::User,
            content: build_analysis_prompt(summaries),
        },
    ]
}
