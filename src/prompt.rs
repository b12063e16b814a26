//! Typed prompt templates.
//!
//! A [`PromptTemplate`] is parsed once, when the service starts, into
//! literal text and named slots. Exactly two slots exist: `{context}` (the
//! retrieved chunks) and `{question}` (the user's question, verbatim). Both
//! must appear somewhere across the system and human messages, and no other
//! `{name}` is accepted. Literal braces are written `{{` and `}}`.
//!
//! ```rust
//! use hotswap_rag::prompt::PromptTemplate;
//!
//! let template = PromptTemplate::new("Context: {context}", "{question}").unwrap();
//! let messages = template.render("cats purr", "do cats purr?");
//! assert_eq!(messages[0].content, "Context: cats purr");
//! assert_eq!(messages[1].content, "do cats purr?");
//!
//! assert!(PromptTemplate::new("No context here", "{question}").is_err());
//! ```

use serde::Serialize;
use thiserror::Error;

/// Problems detected while parsing a prompt template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt template has no {{{0}}} slot")]
    MissingSlot(&'static str),
    #[error("prompt template uses unknown slot {{{0}}}")]
    UnknownSlot(String),
    #[error("prompt template has an unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),
}

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One rendered chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Context,
    Question,
}

/// A validated system + human prompt pair.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    system: Vec<Segment>,
    human: Vec<Segment>,
}

impl PromptTemplate {
    pub fn new(system: &str, human: &str) -> Result<Self, PromptError> {
        let system = parse(system)?;
        let human = parse(human)?;

        let has = |slot: &Segment| system.contains(slot) || human.contains(slot);
        if !has(&Segment::Context) {
            return Err(PromptError::MissingSlot("context"));
        }
        if !has(&Segment::Question) {
            return Err(PromptError::MissingSlot("question"));
        }

        Ok(Self { system, human })
    }

    /// Render the system and user messages for one question.
    pub fn render(&self, context: &str, question: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: Role::System,
                content: fill(&self.system, context, question),
            },
            ChatMessage {
                role: Role::User,
                content: fill(&self.human, context, question),
            },
        ]
    }
}

fn fill(segments: &[Segment], context: &str, question: &str) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Literal(s) => out.push_str(s),
            Segment::Context => out.push_str(context),
            Segment::Question => out.push_str(question),
        }
    }
    out
}

fn parse(template: &str) -> Result<Vec<Segment>, PromptError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, nc) in chars.by_ref() {
                    if nc == '}' {
                        closed = true;
                        break;
                    }
                    name.push(nc);
                }
                if !closed {
                    return Err(PromptError::UnbalancedBrace(pos));
                }
                let slot = match name.trim() {
                    "context" => Segment::Context,
                    "question" => Segment::Question,
                    other => return Err(PromptError::UnknownSlot(other.to_string())),
                };
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(slot);
            }
            '}' => return Err(PromptError::UnbalancedBrace(pos)),
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_interpolates_both_slots() {
        let t = PromptTemplate::new("Use this:\n{context}\nEnd.", "Q: {question}").unwrap();
        let msgs = t.render("chunk one\n\nchunk two", "what is it?");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].content, "Use this:\nchunk one\n\nchunk two\nEnd.");
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[1].content, "Q: what is it?");
    }

    #[test]
    fn test_slots_may_live_in_either_message() {
        let t = PromptTemplate::new("Be terse.", "{context}\n\n{question}").unwrap();
        let msgs = t.render("ctx", "q");
        assert_eq!(msgs[0].content, "Be terse.");
        assert_eq!(msgs[1].content, "ctx\n\nq");
    }

    #[test]
    fn test_missing_context_slot() {
        let err = PromptTemplate::new("Be terse.", "{question}").unwrap_err();
        assert_eq!(err, PromptError::MissingSlot("context"));
        assert_eq!(err.to_string(), "prompt template has no {context} slot");
    }

    #[test]
    fn test_missing_question_slot() {
        let err = PromptTemplate::new("{context}", "Answer.").unwrap_err();
        assert_eq!(err, PromptError::MissingSlot("question"));
    }

    #[test]
    fn test_unknown_slot() {
        let err = PromptTemplate::new("{context} {language}", "{question}").unwrap_err();
        assert_eq!(err, PromptError::UnknownSlot("language".to_string()));
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let t = PromptTemplate::new("Reply as {{\"answer\": ...}}. {context}", "{question}")
            .unwrap();
        let msgs = t.render("c", "q");
        assert_eq!(msgs[0].content, "Reply as {\"answer\": ...}. c");
    }

    #[test]
    fn test_unbalanced_braces() {
        assert!(matches!(
            PromptTemplate::new("{context", "{question}"),
            Err(PromptError::UnbalancedBrace(0))
        ));
        assert!(matches!(
            PromptTemplate::new("{context} }", "{question}"),
            Err(PromptError::UnbalancedBrace(_))
        ));
    }

    #[test]
    fn test_question_is_not_reinterpreted() {
        let t = PromptTemplate::new("{context}", "{question}").unwrap();
        let msgs = t.render("{question}", "what about {context}?");
        assert_eq!(msgs[0].content, "{question}");
        assert_eq!(msgs[1].content, "what about {context}?");
    }
}
